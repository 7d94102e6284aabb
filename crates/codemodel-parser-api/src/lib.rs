//! CodeModel Parser API
//!
//! Contracts between the incremental source model and its collaborators.
//!
//! This crate defines:
//!
//! - **SourceParser trait**: the front end invoked by parse workers
//! - **IncludeHandler trait**: how a front end resolves and enters `#include`s
//! - **ContentProvider trait**: file text and modification stamps
//! - **Macro environments**: macro tables and their fingerprints
//! - **Declarations and text positions**: what a parse pass reports
//! - **Configuration, metrics and errors**
//!
//! # Example
//!
//! ```rust
//! use codemodel_parser_api::{MacroEnvironment, MacroDef};
//!
//! let mut env = MacroEnvironment::new();
//! env.define(MacroDef::object("DEBUG", "1"));
//! let debug = env.fingerprint();
//! env.undefine("DEBUG");
//! assert_ne!(debug, env.fingerprint());
//! ```

pub mod config;
pub mod content;
pub mod declaration;
pub mod errors;
pub mod macros;
pub mod metrics;
pub mod text;
pub mod traits;

// Re-export commonly used types
pub use config::ParserConfig;
pub use content::{
    normalize_path, ContentProvider, FileSystemProvider, MemoryContentProvider, Timestamp,
};
pub use declaration::{Declaration, DeclarationKind};
pub use errors::{ParserError, ParserResult};
pub use macros::{MacroDef, MacroEnvironment, MacroFingerprint};
pub use metrics::ParserMetrics;
pub use text::{LineCol, LineIndex, TextRange};
pub use traits::{
    FileKind, IncludeDirective, IncludeEntry, IncludeHandler, IncludeRecord, IncludeStatus,
    ParseOutput, ParseRequest, SourceParser, UnresolvedIncludes,
};
