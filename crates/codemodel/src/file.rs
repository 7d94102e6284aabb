//! Per-file model and its state machine.
//!
//! ```text
//! Initial -> Enqueued -> Parsing -> Parsed
//!               ^           |          |
//!               |           v          v
//!               +------ Invalidated <--+
//!
//! any state -> Removed -> Initial (revived by file-added)
//! ```

use crate::condition::{PairSet, PreprocessorConditionState};
use crate::error::{ModelError, Result};
use crate::ids::ProjectId;
use codemodel_parser_api::{Declaration, FileKind, LineIndex, MacroFingerprint, Timestamp};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Lifecycle state of a FileModel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileState {
    /// Discovered, never scheduled
    Initial,
    /// Waiting in the parser queue
    Enqueued,
    /// Owned by a parse worker
    Parsing,
    /// Results published
    Parsed,
    /// Text changed or could not be read; results are stale
    Invalidated,
    /// Deleted from disk or unlinked from the project
    Removed,
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileState::Initial => "Initial",
            FileState::Enqueued => "Enqueued",
            FileState::Parsing => "Parsing",
            FileState::Parsed => "Parsed",
            FileState::Invalidated => "Invalidated",
            FileState::Removed => "Removed",
        };
        write!(f, "{s}")
    }
}

/// Everything the model knows about one file.
#[derive(Debug, Clone)]
pub struct FileModel {
    path: PathBuf,
    kind: FileKind,
    state: FileState,
    generation: u64,
    declarations: Vec<Declaration>,
    line_index: LineIndex,
    /// Condition states keyed by the project that observed them
    state_pairs: BTreeMap<ProjectId, PairSet>,
    error: Option<String>,
    stamp: Option<Timestamp>,
    content_hash: Option<u64>,
}

impl FileModel {
    pub fn new(path: PathBuf, kind: FileKind) -> Self {
        Self {
            path,
            kind,
            state: FileState::Initial,
            generation: 0,
            declarations: Vec::new(),
            line_index: LineIndex::default(),
            state_pairs: BTreeMap::new(),
            error: None,
            stamp: None,
            content_hash: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn state(&self) -> FileState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    pub fn line_index(&self) -> &LineIndex {
        &self.line_index
    }

    /// Annotation left by the last failed read or parse.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Modification stamp of the text the published results came from.
    pub fn stamp(&self) -> Option<Timestamp> {
        self.stamp
    }

    pub fn content_hash(&self) -> Option<u64> {
        self.content_hash
    }

    pub fn is_removed(&self) -> bool {
        self.state == FileState::Removed
    }

    fn transition_error(&self, to: FileState) -> ModelError {
        ModelError::InvalidTransition {
            path: self.path.clone(),
            from: self.state,
            to,
        }
    }

    /// Request a parse. A file being parsed keeps its state; the queue holds
    /// the re-request until the running parse completes.
    pub fn request_parse(&mut self) -> Result<()> {
        self.check_request()?;
        if self.state != FileState::Parsing {
            self.state = FileState::Enqueued;
        }
        Ok(())
    }

    /// Whether [`request_parse`](Self::request_parse) would succeed.
    pub fn check_request(&self) -> Result<()> {
        match self.state {
            FileState::Removed => Err(self.transition_error(FileState::Enqueued)),
            _ => Ok(()),
        }
    }

    /// Hand the file to a worker; returns the generation the worker must
    /// still see when it publishes.
    pub fn begin_parse(&mut self) -> Result<u64> {
        match self.state {
            FileState::Removed | FileState::Parsing => {
                Err(self.transition_error(FileState::Parsing))
            }
            _ => {
                self.state = FileState::Parsing;
                Ok(self.generation)
            }
        }
    }

    /// Whether a parse that started at `generation` may still publish.
    pub fn accepts(&self, generation: u64) -> bool {
        self.state == FileState::Parsing && self.generation == generation
    }

    /// Install the results of a successful parse.
    pub fn finish_parse(
        &mut self,
        declarations: Vec<Declaration>,
        line_index: LineIndex,
        stamp: Timestamp,
        content_hash: u64,
    ) {
        self.declarations = declarations;
        self.line_index = line_index;
        self.stamp = Some(stamp);
        self.content_hash = Some(content_hash);
        self.error = None;
        self.state = FileState::Parsed;
    }

    /// The text changed: bump the generation so running parses are
    /// discarded. Queued and never-parsed files keep their state.
    pub fn invalidate(&mut self) {
        self.generation += 1;
        if matches!(self.state, FileState::Parsed | FileState::Parsing) {
            debug!("{}: {} -> Invalidated", self.path.display(), self.state);
            self.state = FileState::Invalidated;
        }
    }

    /// Record a failed read or parse. The file stays in the model and is
    /// retried on the next explicit reparse.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
        self.state = FileState::Invalidated;
    }

    /// Drop everything parsed from the file and mark it removed.
    pub fn remove(&mut self) {
        self.generation += 1;
        self.state = FileState::Removed;
        self.declarations.clear();
        self.line_index = LineIndex::default();
        self.state_pairs.clear();
        self.stamp = None;
        self.content_hash = None;
    }

    /// Bring a removed file back as newly discovered.
    pub fn revive(&mut self) -> Result<()> {
        if self.state != FileState::Removed {
            return Err(self.transition_error(FileState::Initial));
        }
        self.state = FileState::Initial;
        self.error = None;
        Ok(())
    }

    /// Record a stamp for unchanged content.
    pub fn touch(&mut self, stamp: Timestamp) {
        self.stamp = Some(stamp);
    }

    pub fn state_pairs(&self) -> &BTreeMap<ProjectId, PairSet> {
        &self.state_pairs
    }

    /// Pairs observed by `viewer`.
    pub fn pairs(&self, viewer: ProjectId) -> Option<&PairSet> {
        self.state_pairs.get(&viewer)
    }

    pub(crate) fn pairs_mut(&mut self, viewer: ProjectId) -> &mut PairSet {
        self.state_pairs.entry(viewer).or_default()
    }

    pub fn pair(
        &self,
        viewer: ProjectId,
        fingerprint: MacroFingerprint,
    ) -> Option<&PreprocessorConditionState> {
        self.state_pairs.get(&viewer)?.get(&fingerprint)
    }

    /// Mark every stored pair invalid.
    pub fn invalidate_pairs(&mut self) {
        for state in self.state_pairs.values_mut().flat_map(|set| set.values_mut()) {
            state.invalidate();
        }
    }

    /// Forget what `viewer` observed.
    pub fn drop_view(&mut self, viewer: ProjectId) -> Option<PairSet> {
        self.state_pairs.remove(&viewer)
    }

    /// Every context this file has been seen under, per viewer.
    pub fn contexts(&self) -> Vec<(ProjectId, MacroFingerprint)> {
        self.state_pairs
            .iter()
            .flat_map(|(viewer, set)| set.keys().map(move |fp| (*viewer, *fp)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codemodel_parser_api::TextRange;

    fn model() -> FileModel {
        FileModel::new(PathBuf::from("/p/a.c"), FileKind::Source)
    }

    #[test]
    fn test_happy_path() {
        let mut file = model();
        assert_eq!(file.state(), FileState::Initial);
        file.request_parse().unwrap();
        assert_eq!(file.state(), FileState::Enqueued);
        let generation = file.begin_parse().unwrap();
        assert!(file.accepts(generation));
        file.finish_parse(Vec::new(), LineIndex::new("int a;\n"), 7, 42);
        assert_eq!(file.state(), FileState::Parsed);
        assert_eq!(file.stamp(), Some(7));
    }

    #[test]
    fn test_invalidation_rejects_running_parse() {
        let mut file = model();
        file.request_parse().unwrap();
        let generation = file.begin_parse().unwrap();
        file.invalidate();
        assert_eq!(file.state(), FileState::Invalidated);
        assert!(!file.accepts(generation));

        // A parse requested meanwhile keeps the file in the queue's hands
        file.request_parse().unwrap();
        assert_eq!(file.state(), FileState::Enqueued);
    }

    #[test]
    fn test_request_while_parsing_keeps_state() {
        let mut file = model();
        file.begin_parse().unwrap();
        file.request_parse().unwrap();
        assert_eq!(file.state(), FileState::Parsing);
        assert!(file.begin_parse().is_err());
    }

    #[test]
    fn test_removed_rejects_requests() {
        let mut file = model();
        file.pairs_mut(ProjectId(1))
            .insert(MacroFingerprint(3), PreprocessorConditionState::empty());
        file.remove();
        assert!(file.state_pairs().is_empty());
        assert!(matches!(
            file.request_parse(),
            Err(ModelError::InvalidTransition { .. })
        ));
        file.revive().unwrap();
        assert_eq!(file.state(), FileState::Initial);
        assert!(file.revive().is_err());
    }

    #[test]
    fn test_failure_annotation() {
        let mut file = model();
        file.begin_parse().unwrap();
        file.fail("permission denied");
        assert_eq!(file.state(), FileState::Invalidated);
        assert_eq!(file.error(), Some("permission denied"));
        file.request_parse().unwrap();
        let generation = file.begin_parse().unwrap();
        assert!(file.accepts(generation));
        file.finish_parse(Vec::new(), LineIndex::default(), 1, 1);
        assert_eq!(file.error(), None);
    }

    #[test]
    fn test_invalidate_pairs() {
        let mut file = model();
        let state = PreprocessorConditionState::new(vec![TextRange::new(0, 4)]);
        file.pairs_mut(ProjectId(1)).insert(MacroFingerprint(1), state.clone());
        file.pairs_mut(ProjectId(2)).insert(MacroFingerprint(9), state);
        file.invalidate_pairs();
        assert!(file
            .contexts()
            .iter()
            .all(|(viewer, fp)| !file.pair(*viewer, *fp).unwrap().is_valid()));
        assert_eq!(file.contexts().len(), 2);
    }
}
