use crate::{
    config::ParserConfig,
    declaration::Declaration,
    errors::ParserError,
    macros::{MacroEnvironment, MacroFingerprint},
    metrics::ParserMetrics,
    text::{LineIndex, TextRange},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Whether a file is compiled on its own or only reached through `#include`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileKind {
    /// Translation unit
    Source,
    Header,
}

/// An `#include` directive as written in the including file
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IncludeDirective {
    /// Name between the delimiters, e.g. `foo/bar.h`
    pub name: String,
    /// `<name>` rather than `"name"`
    pub angled: bool,
    /// Byte offset of the directive line in the includer
    pub offset: usize,
    /// 1-based line of the directive
    pub line: usize,
}

impl IncludeDirective {
    pub fn quoted(name: impl Into<String>, offset: usize, line: usize) -> Self {
        Self {
            name: name.into(),
            angled: false,
            offset,
            line,
        }
    }

    pub fn angled(name: impl Into<String>, offset: usize, line: usize) -> Self {
        Self {
            name: name.into(),
            angled: true,
            offset,
            line,
        }
    }
}

/// Answer of an [`IncludeHandler`] to an include request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncludeEntry {
    /// No file matches the directive
    Unresolved,
    /// `(path, context)` is already being entered on the active include path
    Circular { path: PathBuf },
    /// Include nesting limit reached
    DepthLimited { path: PathBuf },
    /// The file was resolved but could not be read
    Failed { path: PathBuf, message: String },
    /// Enter the file; the parser must call [`IncludeHandler::leave`] when done
    Enter { path: PathBuf, text: String },
}

/// Outcome of one include, as reported in [`IncludeRecord`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IncludeStatus {
    /// Entered and preprocessed
    Resolved,
    /// Broken include: no file matched
    Unresolved,
    Circular,
    DepthLimited,
    /// Entered previously in this pass and marked `#pragma once`
    Once,
    Failed(String),
}

impl IncludeStatus {
    /// True when the includee was preprocessed under the record's context
    pub fn was_entered(&self) -> bool {
        matches!(self, IncludeStatus::Resolved)
    }
}

/// One `#include` evaluated in active code during a parse pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncludeRecord {
    /// File containing the directive
    pub includer: PathBuf,
    /// Context the includer itself was entered with
    pub includer_context: MacroFingerprint,
    pub directive: IncludeDirective,
    /// Fingerprint of the macro environment at the include point
    pub context: MacroFingerprint,
    pub target: Option<PathBuf>,
    pub status: IncludeStatus,
    /// Inactive blocks of the includee under `context` (only when entered)
    pub inactive_blocks: Vec<TextRange>,
}

/// Resolves and enters `#include`s on behalf of a parser.
///
/// A parser calls [`enter`](IncludeHandler::enter) for every include
/// directive in active code, preprocesses the returned text with its live
/// macro table and calls [`leave`](IncludeHandler::leave) afterwards.
pub trait IncludeHandler {
    fn enter(
        &mut self,
        includer: &Path,
        directive: &IncludeDirective,
        macros: &MacroEnvironment,
    ) -> IncludeEntry;

    fn leave(&mut self, path: &Path, context: MacroFingerprint);
}

/// Handler that resolves nothing; every include is reported as broken.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnresolvedIncludes;

impl IncludeHandler for UnresolvedIncludes {
    fn enter(&mut self, _: &Path, _: &IncludeDirective, _: &MacroEnvironment) -> IncludeEntry {
        IncludeEntry::Unresolved
    }

    fn leave(&mut self, _: &Path, _: MacroFingerprint) {}
}

/// Input of one parse pass
#[derive(Debug, Clone, Copy)]
pub struct ParseRequest<'a> {
    pub path: &'a Path,
    pub text: &'a str,
    /// Macro environment the file is entered with
    pub macros: &'a MacroEnvironment,
}

impl<'a> ParseRequest<'a> {
    pub fn new(path: &'a Path, text: &'a str, macros: &'a MacroEnvironment) -> Self {
        Self { path, text, macros }
    }
}

/// Result of one parse pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseOutput {
    pub declarations: Vec<Declaration>,
    /// Sorted, non-overlapping inactive ranges of the parsed file
    pub inactive_blocks: Vec<TextRange>,
    /// Includes evaluated in the file and, transitively, in entered includees
    pub includes: Vec<IncludeRecord>,
    pub line_index: LineIndex,
    /// Syntax errors tolerated while extracting declarations
    pub error_count: usize,
}

/// Contract of a language front end used by the parse workers.
///
/// # Thread Safety
/// Implementations must be `Send + Sync`; several workers call `parse`
/// concurrently.
pub trait SourceParser: Send + Sync {
    /// Returns the language identifier (lowercase, e.g., "c")
    fn language(&self) -> &str;

    /// Returns supported file extensions (e.g., [".c", ".h"])
    fn file_extensions(&self) -> &[&str];

    /// Classify a path as translation unit or header
    fn file_kind(&self, path: &Path) -> FileKind;

    /// Parse one file under `request.macros`, entering includes through
    /// `includes`.
    ///
    /// # Errors
    /// Returns `ParserError` if the text is too large or the front end
    /// cannot process it at all. Syntax errors are tolerated and counted.
    fn parse(
        &self,
        request: &ParseRequest<'_>,
        includes: &mut dyn IncludeHandler,
    ) -> Result<ParseOutput, ParserError>;

    /// Check if this parser can handle the given file
    ///
    /// Default implementation checks file extension.
    fn can_parse(&self, path: &Path) -> bool {
        if let Some(ext) = path.extension() {
            let ext_str = format!(".{}", ext.to_string_lossy());
            self.file_extensions().contains(&ext_str.as_str())
        } else {
            false
        }
    }

    /// Keep only the paths this parser handles
    fn filter_parseable(&self, paths: Vec<PathBuf>) -> Vec<PathBuf> {
        paths.into_iter().filter(|p| self.can_parse(p)).collect()
    }

    /// Get parser configuration
    fn config(&self) -> &ParserConfig;

    /// Get accumulated metrics
    fn metrics(&self) -> ParserMetrics;
}
