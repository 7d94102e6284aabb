//! Preprocessor condition states and state pairs.

use crate::coverage;
use codemodel_parser_api::{LineCol, LineIndex, MacroFingerprint, TextRange};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Inactive blocks of one file under one macro context.
///
/// Blocks are kept sorted and non-overlapping. An invalid state was computed
/// from text that has since changed; readers must discard it. Equality is
/// structural over blocks and validity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PreprocessorConditionState {
    blocks: Vec<TextRange>,
    valid: bool,
}

impl PreprocessorConditionState {
    /// Build a valid state. Blocks are sorted, empty ones dropped and
    /// overlapping ones merged.
    pub fn new(mut blocks: Vec<TextRange>) -> Self {
        blocks.retain(|b| !b.is_empty());
        blocks.sort();
        let mut merged: Vec<TextRange> = Vec::with_capacity(blocks.len());
        for block in blocks {
            match merged.last_mut() {
                Some(last) if block.start < last.end => last.end = last.end.max(block.end),
                _ => merged.push(block),
            }
        }
        Self {
            blocks: merged,
            valid: true,
        }
    }

    /// A state with no inactive code.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn blocks(&self) -> &[TextRange] {
        &self.blocks
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    /// Whether `offset` is in active code.
    pub fn is_in_active_block(&self, offset: usize) -> bool {
        !self.blocks.iter().any(|b| b.contains(offset))
    }

    /// See [`coverage::coverage`].
    pub fn coverage(&self, start: usize, end: usize) -> Option<usize> {
        coverage::coverage(&self.blocks, start, end)
    }

    /// See [`coverage::active_length`].
    pub fn active_length(&self, start: usize, end: usize) -> usize {
        coverage::active_length(&self.blocks, start, end)
    }

    /// Blocks as 1-based line/column spans.
    pub fn line_cols(&self, index: &LineIndex) -> Vec<(LineCol, LineCol)> {
        self.blocks
            .iter()
            .map(|b| index.range_line_cols(*b))
            .collect()
    }
}

impl Default for PreprocessorConditionState {
    fn default() -> Self {
        Self::empty()
    }
}

/// A condition state together with the macro context it was computed under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PreprocessorStatePair {
    pub fingerprint: MacroFingerprint,
    pub state: PreprocessorConditionState,
}

impl PreprocessorStatePair {
    pub fn new(fingerprint: MacroFingerprint, state: PreprocessorConditionState) -> Self {
        Self { fingerprint, state }
    }
}

/// Condition states of one file as seen from one project, one per context.
pub type PairSet = BTreeMap<MacroFingerprint, PreprocessorConditionState>;

/// Valid pairs of a set, in fingerprint order.
pub fn valid_pairs(set: &PairSet) -> Vec<PreprocessorStatePair> {
    set.iter()
        .filter(|(_, state)| state.is_valid())
        .map(|(fp, state)| PreprocessorStatePair::new(*fp, state.clone()))
        .collect()
}

/// Outcome of storing a freshly computed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairUpdate {
    /// No pair existed for the context
    Inserted,
    /// An equal, valid pair was already stored
    Unchanged,
    /// The stored pair differed or had been invalidated
    Changed,
}

impl PairUpdate {
    /// Whether dependents that saw the old state must be reparsed.
    pub fn needs_cascade(self) -> bool {
        self == PairUpdate::Changed
    }
}

/// Store `state` for `fingerprint` and report how it compares to the old one.
pub fn store_pair(
    set: &mut PairSet,
    fingerprint: MacroFingerprint,
    state: PreprocessorConditionState,
) -> PairUpdate {
    match set.insert(fingerprint, state) {
        None => PairUpdate::Inserted,
        Some(old) if old.is_valid() && Some(&old) == set.get(&fingerprint) => {
            PairUpdate::Unchanged
        }
        Some(_) => PairUpdate::Changed,
    }
}
