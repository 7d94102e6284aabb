//! Engine and project configuration.

use crate::error::{ModelError, Result};
use crate::ids::ProjectId;
use codemodel_parser_api::{normalize_path, MacroEnvironment, ParserConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// What happens to the translation units including a file when that file
/// changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationPolicy {
    /// Reparse the file alone; includers follow only if its condition state
    /// turns out different
    #[default]
    Lazy,
    /// Also reparse every translation unit including the file right away
    Eager,
}

/// Configuration for the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of parse worker threads
    pub worker_count: usize,

    /// Cascade policy for changed files
    pub dependent_invalidation: InvalidationPolicy,

    /// Maximum nesting of includes entered from one translation unit
    pub max_include_depth: usize,

    /// Configuration of the built-in C front end
    pub parser: ParserConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: std::thread::available_parallelism()
                .map_or(1, |n| n.get())
                .min(4),
            dependent_invalidation: InvalidationPolicy::Lazy,
            max_include_depth: 200,
            parser: ParserConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ModelError::config("invalid engine configuration", Some(e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(ModelError::config("worker_count must be at least 1", None));
        }
        Ok(())
    }

    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    pub fn with_invalidation(mut self, policy: InvalidationPolicy) -> Self {
        self.dependent_invalidation = policy;
        self
    }

    pub fn with_max_include_depth(mut self, depth: usize) -> Self {
        self.max_include_depth = depth;
        self
    }

    pub fn with_parser_config(mut self, parser: ParserConfig) -> Self {
        self.parser = parser;
        self
    }
}

/// Settings of one project: where its files live, how includes resolve and
/// which macros its translation units start with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSettings {
    pub name: String,
    /// Directories whose files the project owns
    pub roots: Vec<PathBuf>,
    /// Searched for `"..."` and `<...>` includes
    pub include_dirs: Vec<PathBuf>,
    /// Searched after `include_dirs`
    pub system_include_dirs: Vec<PathBuf>,
    /// Object-like macros predefined for every translation unit
    pub macros: BTreeMap<String, String>,
    /// Projects whose headers this project includes
    pub dependencies: Vec<ProjectId>,
}

impl ProjectSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_root(mut self, root: impl AsRef<Path>) -> Self {
        self.roots.push(normalize_path(root.as_ref()));
        self
    }

    pub fn with_include_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.include_dirs.push(normalize_path(dir.as_ref()));
        self
    }

    pub fn with_system_include_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.system_include_dirs.push(normalize_path(dir.as_ref()));
        self
    }

    pub fn with_macro(mut self, name: impl Into<String>, body: impl Into<String>) -> Self {
        self.macros.insert(name.into(), body.into());
        self
    }

    pub fn with_dependency(mut self, project: ProjectId) -> Self {
        self.dependencies.push(project);
        self
    }

    /// Whether `path` lies under one of the roots.
    pub fn contains(&self, path: &Path) -> bool {
        self.roots.iter().any(|root| path.starts_with(root))
    }

    /// Whether `path` lies under one of the include directories.
    pub fn searches(&self, path: &Path) -> bool {
        self.include_dirs
            .iter()
            .chain(&self.system_include_dirs)
            .any(|dir| path.starts_with(dir))
    }

    /// Macro environment translation units are parsed with.
    pub fn base_environment(&self) -> MacroEnvironment {
        MacroEnvironment::from_pairs(self.macros.iter().map(|(k, v)| (k.clone(), v.clone())))
    }
}
