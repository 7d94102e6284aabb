//! File-system watcher feeding the reparse coordinator.
//!
//! Uses FSEvents on macOS, inotify on Linux.

use crate::coordinator::{FileSystemEvent, ReparseCoordinator};
use crate::error::{ModelError, Result};
use crossbeam_channel::unbounded;
use log::{debug, info, warn};
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

/// Convert a notify event into coordinator events. Renames become a delete
/// of the old path and an add of the new one.
pub fn translate(event: &Event) -> Vec<FileSystemEvent> {
    match event.kind {
        EventKind::Create(_) => event
            .paths
            .iter()
            .cloned()
            .map(FileSystemEvent::Added)
            .collect(),
        EventKind::Remove(_) => event
            .paths
            .iter()
            .cloned()
            .map(FileSystemEvent::Deleted)
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => event
            .paths
            .iter()
            .cloned()
            .map(FileSystemEvent::Deleted)
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event
            .paths
            .iter()
            .cloned()
            .map(FileSystemEvent::Added)
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match event.paths.as_slice() {
            [from, to] => vec![
                FileSystemEvent::Deleted(from.clone()),
                FileSystemEvent::Added(to.clone()),
            ],
            _ => Vec::new(),
        },
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => event
            .paths
            .iter()
            .cloned()
            .map(FileSystemEvent::Changed)
            .collect(),
        _ => Vec::new(),
    }
}

/// Watches project roots and forwards changes to a [`ReparseCoordinator`]
/// from a background thread. Dropping the watcher stops it.
pub struct FileWatcher {
    watcher: Option<RecommendedWatcher>,
    thread: Option<JoinHandle<()>>,
}

impl FileWatcher {
    pub fn start(coordinator: ReparseCoordinator, roots: &[PathBuf]) -> Result<Self> {
        let (tx, rx) = unbounded::<notify::Result<Event>>();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            Config::default(),
        )
        .map_err(|e| ModelError::Watch {
            message: e.to_string(),
        })?;
        for root in roots {
            watcher
                .watch(root, RecursiveMode::Recursive)
                .map_err(|e| ModelError::Watch {
                    message: format!("{}: {e}", root.display()),
                })?;
        }

        let thread = thread::Builder::new()
            .name("codemodel-watch".to_string())
            .spawn(move || {
                for res in rx {
                    match res {
                        Ok(event) => {
                            debug!("file-system event {:?} on {:?}", event.kind, event.paths);
                            for change in translate(&event) {
                                if let Err(e) = coordinator.handle(&change) {
                                    warn!("{}: {e}", change.path().display());
                                }
                            }
                        }
                        Err(e) => warn!("watch error: {e}"),
                    }
                }
            })
            .map_err(|source| ModelError::Io {
                path: PathBuf::new(),
                source,
            })?;

        info!("watching {} root(s)", roots.len());
        Ok(Self {
            watcher: Some(watcher),
            thread: Some(thread),
        })
    }

    /// Stop watching and wait for pending events to be handled.
    pub fn stop(&mut self) {
        // Dropping the watcher closes the channel and ends the thread
        self.watcher.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("watch thread panicked");
            }
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
