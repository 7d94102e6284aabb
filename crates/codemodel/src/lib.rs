//! # codemodel
//!
//! Incremental source model for C and C++ trees driven by the preprocessor.
//!
//! A file's dead code depends on the macros visible where it is included.
//! codemodel keeps, for every file, one condition state per macro context it
//! was seen in, and reparses only what a change can actually affect.
//!
//! ## Architecture
//!
//! ```text
//! Engine (projects, lifecycle, queries)
//!     ↓
//! ReparseCoordinator (file-system events)
//!     ↓
//! ParserQueue → parse workers → SourceParser
//!     ↓
//! ProjectModel (FileModels, IncludeGraph, condition state pairs)
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use codemodel::{Engine, EngineConfig, ProjectSettings};
//! use codemodel_parser_api::FileSystemProvider;
//! use std::sync::Arc;
//!
//! let engine = Engine::with_c_parser(EngineConfig::default(), Arc::new(FileSystemProvider::new()));
//! engine.startup();
//! let project = engine
//!     .add_project(ProjectSettings::new("kernel").with_root("./src").with_include_dir("./include"))
//!     .unwrap();
//! engine.wait_parse(project).unwrap();
//!
//! let file = engine.file(project, "./src/main.c").unwrap();
//! for (start, end) in file.inactive_blocks().unwrap() {
//!     println!("dead code {}:{} - {}:{}", start.line, start.column, end.line, end.column);
//! }
//! ```

#![deny(unsafe_code)]

pub mod condition;
pub mod config;
pub mod coordinator;
pub mod coverage;
pub mod engine;
pub mod error;
pub mod file;
pub mod graph;
pub mod ids;
pub mod listener;
pub mod project;
pub mod queue;
pub mod stats;
#[cfg(feature = "watch")]
pub mod watch;

// Re-export main types
pub use condition::{PairSet, PairUpdate, PreprocessorConditionState, PreprocessorStatePair};
pub use config::{EngineConfig, InvalidationPolicy, ProjectSettings};
pub use coordinator::{FileSystemEvent, ReparseCoordinator};
pub use coverage::{active_length, coverage};
pub use engine::{Engine, FileHandle};
pub use error::{ModelError, QueueError, Result};
pub use file::{FileModel, FileState};
pub use graph::{EdgeId, IncludeEdge, IncludeGraph};
pub use ids::{FileId, FileKey, ProjectId};
pub use listener::{FileEvent, ParseListener};
pub use project::ProjectModel;
pub use queue::{ParseScope, ParserQueue, QueueEntry, QueuePosition};
pub use stats::ParseStats;
#[cfg(feature = "watch")]
pub use watch::FileWatcher;
