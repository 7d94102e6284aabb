//! Implementation of the SourceParser trait for C
//!
//! `CParser` runs the conditional preprocessor over a file (entering
//! includes through the caller's handler) and extracts declarations from
//! the active text with tree-sitter.

use codemodel_parser_api::{
    Declaration, DeclarationKind, FileKind, IncludeHandler, LineIndex, ParseOutput, ParseRequest,
    ParserConfig, ParserError, ParserMetrics, SourceParser,
};
use log::{debug, trace};
use parking_lot::Mutex;
use std::path::Path;
use std::time::Instant;

use crate::extractor::extract_declarations;
use crate::pipeline::evaluate_conditionals;

const HEADER_EXTENSIONS: &[&str] = &["h", "hh", "hpp", "hxx", "inc"];

/// C language parser implementing the SourceParser trait
pub struct CParser {
    config: ParserConfig,
    metrics: Mutex<ParserMetrics>,
}

impl CParser {
    /// Create a new C parser with default configuration
    pub fn new() -> Self {
        Self::with_config(ParserConfig::default())
    }

    /// Create a new C parser with custom configuration
    pub fn with_config(config: ParserConfig) -> Self {
        Self {
            config,
            metrics: Mutex::new(ParserMetrics::default()),
        }
    }

    fn parse_inner(
        &self,
        request: &ParseRequest<'_>,
        includes: &mut dyn IncludeHandler,
    ) -> Result<ParseOutput, ParserError> {
        let path = request.path;
        if request.text.len() > self.config.max_file_size {
            return Err(ParserError::FileTooLarge(
                path.to_path_buf(),
                request.text.len(),
            ));
        }

        let mut macros = request.macros.clone();
        let (preprocessed, records) = evaluate_conditionals(
            path,
            request.text,
            &mut macros,
            includes,
            self.config.max_include_depth,
        );
        if preprocessed.evaluation_errors > 0 {
            debug!(
                "{}: {} conditional expressions could not be evaluated",
                path.display(),
                preprocessed.evaluation_errors
            );
        }

        let line_index = LineIndex::new(request.text);
        let extraction =
            extract_declarations(&preprocessed.active_text, path, &line_index, &self.config)?;

        let mut declarations = extraction.declarations;
        if self.config.extract_macros {
            declarations.extend(preprocessed.macro_sites.iter().map(|site| {
                let (start, end) = line_index.range_line_cols(site.range);
                Declaration::new(
                    site.name.clone(),
                    DeclarationKind::Macro,
                    site.range,
                    start,
                    end,
                )
            }));
        }
        declarations.sort_by_key(|d| (d.range.start, d.range.end));

        trace!(
            "{}: {} declarations, {} inactive blocks, {} includes",
            path.display(),
            declarations.len(),
            preprocessed.inactive_blocks.len(),
            records.len()
        );

        Ok(ParseOutput {
            declarations,
            inactive_blocks: preprocessed.inactive_blocks,
            includes: records,
            line_index,
            error_count: extraction.error_count,
        })
    }
}

impl Default for CParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceParser for CParser {
    fn language(&self) -> &str {
        "c"
    }

    fn file_extensions(&self) -> &[&str] {
        &[".c", ".h", ".cc", ".cpp", ".cxx", ".hh", ".hpp", ".hxx", ".inc"]
    }

    fn file_kind(&self, path: &Path) -> FileKind {
        let is_header = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| HEADER_EXTENSIONS.contains(&e));
        if is_header {
            FileKind::Header
        } else {
            FileKind::Source
        }
    }

    fn parse(
        &self,
        request: &ParseRequest<'_>,
        includes: &mut dyn IncludeHandler,
    ) -> Result<ParseOutput, ParserError> {
        let start = Instant::now();
        let result = self.parse_inner(request, includes);
        self.metrics.lock().record(result.as_ref().ok(), start.elapsed());
        result
    }

    fn config(&self) -> &ParserConfig {
        &self.config
    }

    fn metrics(&self) -> ParserMetrics {
        self.metrics.lock().clone()
    }
}
