//! # codemodel-c
//!
//! C front end for the incremental source model.
//!
//! ## Features
//!
//! - Evaluate `#if`/`#ifdef`/`#elif`/`#else` against a live macro table
//! - Report inactive blocks as byte ranges of the original text
//! - Enter `#include`s through the caller's [`IncludeHandler`], so included
//!   headers see and extend the includer's macros
//! - Extract functions, prototypes, structs, unions, enums, typedefs,
//!   file-scope variables and macros with tree-sitter
//! - Tolerant parsing: syntax errors are counted, not fatal
//!
//! ## Quick Start
//!
//! ```rust
//! use codemodel_c::CParser;
//! use codemodel_parser_api::{
//!     MacroEnvironment, ParseRequest, SourceParser, UnresolvedIncludes,
//! };
//! use std::path::Path;
//!
//! let parser = CParser::new();
//! let env = MacroEnvironment::from_pairs([("FAST", "1")]);
//! let text = "#ifdef FAST\nint fast(void);\n#else\nint slow(void);\n#endif\n";
//! let request = ParseRequest::new(Path::new("main.c"), text, &env);
//!
//! let output = parser.parse(&request, &mut UnresolvedIncludes).unwrap();
//! assert_eq!(output.declarations[0].name, "fast");
//! assert_eq!(output.inactive_blocks.len(), 1);
//! ```
//!
//! [`IncludeHandler`]: codemodel_parser_api::IncludeHandler

pub mod extractor;
mod parser_impl;
pub mod pipeline;
pub mod visitor;

// Re-export parser-api types for convenience
pub use codemodel_parser_api::{
    ParseOutput, ParseRequest, ParserConfig, ParserError, ParserMetrics, SourceParser,
};

// Export the C parser implementation
pub use parser_impl::CParser;

// Export key types from submodules
pub use extractor::{extract_declarations, ExtractionResult};
pub use pipeline::{evaluate_conditionals, MacroSite, Preprocessed};
