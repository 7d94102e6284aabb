//! Parse progress notifications.
//!
//! Workers never call listeners directly. They post [`Notification`]s to a
//! channel drained by one dispatcher thread, which fires each notification
//! to a snapshot of the listeners registered at that moment. Listeners can
//! therefore be added or removed from inside a callback.

use crate::ids::{FileKey, ProjectId};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// File a notification is about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// Project whose queue scheduled the parse
    pub project: ProjectId,
    pub key: FileKey,
    pub path: PathBuf,
}

/// Receiver of parse progress. Every method has an empty default.
pub trait ParseListener: Send + Sync {
    fn on_file_parsing_started(&self, _file: &FileEvent) {}

    fn on_file_parsing_finished(&self, _file: &FileEvent) {}

    /// The project has no queued or in-flight work left
    fn on_project_parsing_finished(&self, _project: ProjectId) {}
}

#[derive(Debug)]
pub(crate) enum Notification {
    FileStarted(FileEvent),
    FileFinished(FileEvent),
    ProjectFinished(ProjectId),
    /// Answered once everything posted before it has been delivered
    Flush(Sender<()>),
    Stop,
}

type Listeners = Arc<RwLock<Vec<Arc<dyn ParseListener>>>>;

/// Channel-backed listener dispatch.
pub(crate) struct Notifier {
    sender: Sender<Notification>,
    listeners: Listeners,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Notifier {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        let listeners: Listeners = Arc::new(RwLock::new(Vec::new()));
        let dispatcher = {
            let listeners = Arc::clone(&listeners);
            thread::Builder::new()
                .name("codemodel-notify".to_string())
                .spawn(move || dispatch(receiver, listeners))
                .map_err(|e| warn!("cannot spawn notification thread: {e}"))
                .ok()
        };
        Self {
            sender,
            listeners,
            dispatcher: Mutex::new(dispatcher),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn ParseListener>) {
        self.listeners.write().push(listener);
    }

    /// Remove a listener by identity; returns whether it was registered.
    pub fn remove_listener(&self, listener: &Arc<dyn ParseListener>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        before != listeners.len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn send(&self, notification: Notification) {
        // Fails only after stop(); late notifications are dropped
        let _ = self.sender.send(notification);
    }

    /// Block until every notification posted so far has been delivered.
    pub fn flush(&self) {
        let (done, wait) = crossbeam_channel::bounded(1);
        if self.sender.send(Notification::Flush(done)).is_ok() {
            let _ = wait.recv();
        }
    }

    /// Deliver what is pending, then stop the dispatcher.
    pub fn stop(&self) {
        let Some(handle) = self.dispatcher.lock().take() else {
            return;
        };
        let _ = self.sender.send(Notification::Stop);
        if handle.join().is_err() {
            warn!("notification thread panicked");
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.stop();
    }
}

fn dispatch(receiver: Receiver<Notification>, listeners: Listeners) {
    for notification in receiver {
        let snapshot: Vec<Arc<dyn ParseListener>> = listeners.read().clone();
        match notification {
            Notification::FileStarted(event) => {
                for listener in &snapshot {
                    listener.on_file_parsing_started(&event);
                }
            }
            Notification::FileFinished(event) => {
                for listener in &snapshot {
                    listener.on_file_parsing_finished(&event);
                }
            }
            Notification::ProjectFinished(project) => {
                debug!("{project}: parsing finished");
                for listener in &snapshot {
                    listener.on_project_parsing_finished(project);
                }
            }
            Notification::Flush(done) => {
                let _ = done.send(());
            }
            Notification::Stop => break,
        }
    }
}
