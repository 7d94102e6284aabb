//! File content providers.
//!
//! The model never touches the file system directly; it reads text and
//! modification stamps through a [`ContentProvider`]. [`FileSystemProvider`]
//! serves real files, [`MemoryContentProvider`] serves an in-memory tree with
//! a logical clock for deterministic tests.

use crate::errors::ParserError;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

/// Modification stamp. Only equality is meaningful.
pub type Timestamp = u64;

/// Source of file text and modification stamps.
pub trait ContentProvider: Send + Sync {
    /// Read the whole file as UTF-8 text
    fn read_text(&self, path: &Path) -> Result<String, ParserError>;

    /// Modification stamp of the file
    fn last_modified(&self, path: &Path) -> Result<Timestamp, ParserError>;

    /// Whether a regular file exists at `path`
    fn exists(&self, path: &Path) -> bool;

    /// All regular files under `root`, sorted
    fn list_files(&self, root: &Path) -> Result<Vec<PathBuf>, ParserError>;
}

/// Normalize a path into a file identity: relative paths are joined to the
/// current directory, `.` and `..` are resolved lexically without touching
/// the file system, and case is folded on hosts whose file systems ignore
/// it (Windows, macOS). Symlinks are not resolved.
pub fn normalize_path(path: &Path) -> PathBuf {
    let joined;
    let path = if path.is_relative() {
        match std::env::current_dir() {
            Ok(cwd) => {
                joined = cwd.join(path);
                joined.as_path()
            }
            Err(_) => path,
        }
    } else {
        path
    };
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    fold_case(out)
}

#[cfg(any(windows, target_os = "macos"))]
fn fold_case(path: PathBuf) -> PathBuf {
    PathBuf::from(path.to_string_lossy().to_lowercase())
}

#[cfg(not(any(windows, target_os = "macos")))]
fn fold_case(path: PathBuf) -> PathBuf {
    path
}

/// Provider backed by the local file system
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSystemProvider;

impl FileSystemProvider {
    pub fn new() -> Self {
        Self
    }
}

fn io_error(path: &Path, e: std::io::Error) -> ParserError {
    if e.kind() == std::io::ErrorKind::NotFound {
        ParserError::NotFound(path.to_path_buf())
    } else {
        ParserError::IoError(path.to_path_buf(), e)
    }
}

impl ContentProvider for FileSystemProvider {
    fn read_text(&self, path: &Path) -> Result<String, ParserError> {
        let bytes = fs::read(path).map_err(|e| io_error(path, e))?;
        // Sources with stray non-UTF-8 bytes are still parseable
        Ok(String::from_utf8(bytes)
            .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned()))
    }

    fn last_modified(&self, path: &Path) -> Result<Timestamp, ParserError> {
        let modified = fs::metadata(path)
            .and_then(|m| m.modified())
            .map_err(|e| io_error(path, e))?;
        Ok(modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0))
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn list_files(&self, root: &Path) -> Result<Vec<PathBuf>, ParserError> {
        fn walk_dir(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), ParserError> {
            if !dir.is_dir() {
                return Ok(());
            }

            for entry in fs::read_dir(dir).map_err(|e| io_error(dir, e))? {
                let entry = entry.map_err(|e| io_error(dir, e))?;
                let path = entry.path();
                let file_type = entry.file_type().map_err(|e| io_error(&path, e))?;

                // Symlinked directories are not followed; they may loop
                if file_type.is_dir() {
                    walk_dir(&path, files)?;
                } else if path.is_file() {
                    files.push(normalize_path(&path));
                }
            }

            Ok(())
        }

        let mut files = Vec::new();
        walk_dir(root, &mut files)?;
        files.sort();
        Ok(files)
    }
}

#[derive(Debug, Clone)]
struct MemoryFile {
    text: String,
    stamp: Timestamp,
}

/// In-memory provider with a logical clock.
///
/// Every write advances the clock, so each version of a file has a distinct
/// stamp. Cloning shares the underlying tree.
#[derive(Debug, Clone, Default)]
pub struct MemoryContentProvider {
    files: Arc<RwLock<BTreeMap<PathBuf, MemoryFile>>>,
    unreadable: Arc<RwLock<BTreeSet<PathBuf>>>,
    clock: Arc<AtomicU64>,
}

impl MemoryContentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or overwrite a file; returns its new stamp.
    pub fn write(&self, path: impl AsRef<Path>, text: impl Into<String>) -> Timestamp {
        let stamp = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        self.files.write().insert(
            normalize_path(path.as_ref()),
            MemoryFile {
                text: text.into(),
                stamp,
            },
        );
        stamp
    }

    pub fn remove(&self, path: impl AsRef<Path>) -> bool {
        self.files
            .write()
            .remove(&normalize_path(path.as_ref()))
            .is_some()
    }

    /// Make reads of `path` fail with an I/O error (the file still exists).
    pub fn set_unreadable(&self, path: impl AsRef<Path>, unreadable: bool) {
        let path = normalize_path(path.as_ref());
        let mut set = self.unreadable.write();
        if unreadable {
            set.insert(path);
        } else {
            set.remove(&path);
        }
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

impl ContentProvider for MemoryContentProvider {
    fn read_text(&self, path: &Path) -> Result<String, ParserError> {
        let path = normalize_path(path);
        if self.unreadable.read().contains(&path) {
            return Err(ParserError::IoError(
                path,
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "unreadable"),
            ));
        }
        self.files
            .read()
            .get(&path)
            .map(|f| f.text.clone())
            .ok_or(ParserError::NotFound(path))
    }

    fn last_modified(&self, path: &Path) -> Result<Timestamp, ParserError> {
        let path = normalize_path(path);
        self.files
            .read()
            .get(&path)
            .map(|f| f.stamp)
            .ok_or(ParserError::NotFound(path))
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.read().contains_key(&normalize_path(path))
    }

    fn list_files(&self, root: &Path) -> Result<Vec<PathBuf>, ParserError> {
        let root = normalize_path(root);
        Ok(self
            .files
            .read()
            .keys()
            .filter(|p| p.starts_with(&root))
            .cloned()
            .collect())
    }
}
