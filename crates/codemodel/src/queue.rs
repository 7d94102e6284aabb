//! Priority parse queue shared by the parse workers.
//!
//! Poll order is: every pending `Immediate` entry oldest first, then `Head`
//! entries newest first, then `Tail` entries oldest first. A file has at most
//! one entry. Adding a file that is already queued merges the two requests:
//! a higher position moves the entry, a repeated `Head` moves it back to the
//! front of the lane, anything else leaves it where it is. A file that a
//! worker is parsing is not queued again; the request is held and queued
//! when the worker reports [`ParserQueue::done`].
//!
//! Shutting the queue down stops the workers but keeps every pending
//! request; the next [`ParserQueue::startup`] resumes them.

use crate::error::QueueError;
use crate::ids::{FileKey, ProjectId};
use codemodel_parser_api::MacroFingerprint;
use log::{debug, trace};
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use std::collections::{BTreeSet, VecDeque};

/// Where a request goes in the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueuePosition {
    /// FIFO lane in front of everything else
    Immediate,
    /// Front of the normal lane
    Head,
    /// Back of the normal lane
    Tail,
}

impl QueuePosition {
    fn rank(self) -> u8 {
        match self {
            QueuePosition::Immediate => 2,
            QueuePosition::Head => 1,
            QueuePosition::Tail => 0,
        }
    }
}

/// Which contexts of a file a request asks to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseScope {
    /// Every context the file is known under
    All,
    /// Only these entry contexts
    Contexts(BTreeSet<MacroFingerprint>),
}

impl ParseScope {
    pub fn context(fingerprint: MacroFingerprint) -> Self {
        ParseScope::Contexts(BTreeSet::from([fingerprint]))
    }

    /// Union of two requests.
    pub fn merge(self, other: ParseScope) -> ParseScope {
        match (self, other) {
            (ParseScope::Contexts(mut a), ParseScope::Contexts(b)) => {
                a.extend(b);
                ParseScope::Contexts(a)
            }
            _ => ParseScope::All,
        }
    }
}

/// A request handed to a worker by [`ParserQueue::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub key: FileKey,
    pub scope: ParseScope,
    pub position: QueuePosition,
}

#[derive(Debug, Default)]
struct QueueState {
    immediate: VecDeque<FileKey>,
    lane: VecDeque<FileKey>,
    entries: FxHashMap<FileKey, (ParseScope, QueuePosition)>,
    /// Files owned by a worker, with the request that arrived meanwhile
    in_flight: FxHashMap<FileKey, Option<(ParseScope, QueuePosition)>>,
    /// Queued plus in-flight files per project
    outstanding: FxHashMap<ProjectId, usize>,
    running: bool,
    shut_down: bool,
}

impl QueueState {
    fn push(&mut self, key: FileKey, position: QueuePosition) {
        match position {
            QueuePosition::Immediate => self.immediate.push_back(key),
            QueuePosition::Head => self.lane.push_front(key),
            QueuePosition::Tail => self.lane.push_back(key),
        }
    }

    fn unlink(&mut self, key: FileKey, position: QueuePosition) {
        let lane = match position {
            QueuePosition::Immediate => &mut self.immediate,
            _ => &mut self.lane,
        };
        if let Some(i) = lane.iter().position(|k| *k == key) {
            lane.remove(i);
        }
    }

    fn enqueue(&mut self, key: FileKey, scope: ParseScope, position: QueuePosition) {
        match self.entries.remove(&key) {
            Some((old_scope, old_position)) => {
                let scope = old_scope.merge(scope);
                let moves = position.rank() > old_position.rank()
                    || (position == QueuePosition::Head && old_position == QueuePosition::Head);
                let position = if moves {
                    self.unlink(key, old_position);
                    self.push(key, position);
                    position
                } else {
                    old_position
                };
                trace!("coalesced {key} at {position:?}");
                self.entries.insert(key, (scope, position));
            }
            None => {
                self.push(key, position);
                self.entries.insert(key, (scope, position));
                *self.outstanding.entry(key.project).or_default() += 1;
            }
        }
    }

    fn pop(&mut self) -> Option<QueueEntry> {
        let key = self
            .immediate
            .pop_front()
            .or_else(|| self.lane.pop_front())?;
        let (scope, position) = self.entries.remove(&key)?;
        self.in_flight.insert(key, None);
        Some(QueueEntry {
            key,
            scope,
            position,
        })
    }

    /// One less outstanding file for `project`; true when it reached zero.
    fn settle(&mut self, project: ProjectId) -> bool {
        match self.outstanding.get_mut(&project) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.outstanding.remove(&project);
                true
            }
            None => false,
        }
    }
}

/// Multi-producer, multi-consumer parse queue.
#[derive(Debug, Default)]
pub struct ParserQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    idle: Condvar,
}

impl ParserQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue or reposition a request.
    pub fn add(
        &self,
        key: FileKey,
        scope: ParseScope,
        position: QueuePosition,
    ) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        if state.shut_down {
            return Err(QueueError::Interrupted);
        }
        if let Some(pending) = state.in_flight.get_mut(&key) {
            let merged = match pending.take() {
                Some((old_scope, old_position)) => {
                    let position = if position.rank() > old_position.rank() {
                        position
                    } else {
                        old_position
                    };
                    (old_scope.merge(scope), position)
                }
                None => (scope, position),
            };
            debug!("{key} is being parsed; holding {:?} request", merged.1);
            *pending = Some(merged);
            return Ok(());
        }
        state.enqueue(key, scope, position);
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    /// Take the next request, blocking until one is available and the queue
    /// has been started.
    ///
    /// # Errors
    /// Returns [`QueueError::Interrupted`] once the queue is shut down.
    pub fn poll(&self) -> Result<QueueEntry, QueueError> {
        let mut state = self.state.lock();
        loop {
            if state.shut_down {
                return Err(QueueError::Interrupted);
            }
            if state.running {
                if let Some(entry) = state.pop() {
                    return Ok(entry);
                }
            }
            self.available.wait(&mut state);
        }
    }

    /// Non-blocking [`poll`](Self::poll); ignores the running flag.
    pub fn try_poll(&self) -> Option<QueueEntry> {
        let mut state = self.state.lock();
        if state.shut_down {
            return None;
        }
        state.pop()
    }

    /// Report that the worker is finished with `key`.
    ///
    /// A request held while the file was parsed is queued now. When this was
    /// the project's last outstanding file, `on_idle` runs before waiters of
    /// [`wait_idle`](Self::wait_idle) are released. Returns true in that case.
    pub fn done(&self, key: FileKey, on_idle: impl FnOnce(ProjectId)) -> bool {
        let mut state = self.state.lock();
        let pending = match state.in_flight.remove(&key) {
            Some(pending) => pending,
            None => return false,
        };
        if let Some((scope, position)) = pending {
            // The file stays outstanding: queued again right away
            state.push(key, position);
            state.entries.insert(key, (scope, position));
            let shut_down = state.shut_down;
            drop(state);
            if shut_down {
                self.idle.notify_all();
            } else {
                self.available.notify_one();
            }
            return false;
        }
        let idle = state.settle(key.project);
        if idle {
            on_idle(key.project);
        }
        if idle || state.shut_down {
            self.idle.notify_all();
        }
        idle
    }

    /// Drop the queued request of `key`, if any.
    pub fn remove(&self, key: FileKey) -> bool {
        let mut state = self.state.lock();
        let removed = match state.entries.remove(&key) {
            Some((_, position)) => {
                state.unlink(key, position);
                true
            }
            None => {
                // Forget a held request; the running parse settles itself
                matches!(state.in_flight.get_mut(&key).map(|p| p.take()), Some(Some(_)))
            }
        };
        if removed && !state.in_flight.contains_key(&key) && state.settle(key.project) {
            self.idle.notify_all();
        }
        removed
    }

    /// Drop every queued request of `project`.
    pub fn remove_project(&self, project: ProjectId) -> usize {
        let mut state = self.state.lock();
        let keys: Vec<FileKey> = state
            .entries
            .keys()
            .filter(|k| k.project == project)
            .copied()
            .collect();
        for key in &keys {
            if let Some((_, position)) = state.entries.remove(key) {
                state.unlink(*key, position);
            }
        }
        for pending in state
            .in_flight
            .iter_mut()
            .filter(|(k, _)| k.project == project)
            .map(|(_, p)| p)
        {
            *pending = None;
        }
        let in_flight = state
            .in_flight
            .keys()
            .filter(|k| k.project == project)
            .count();
        if in_flight == 0 {
            state.outstanding.remove(&project);
        } else {
            state.outstanding.insert(project, in_flight);
        }
        drop(state);
        self.idle.notify_all();
        keys.len()
    }

    /// Let workers take requests, including those kept by a shutdown.
    pub fn startup(&self) {
        let mut state = self.state.lock();
        if state.shut_down && !state.entries.is_empty() {
            debug!("resuming {} queued request(s)", state.entries.len());
        }
        state.running = true;
        state.shut_down = false;
        drop(state);
        self.available.notify_all();
    }

    /// Wake every blocked poll with [`QueueError::Interrupted`] and every
    /// idle waiter. Queued requests are kept for the next startup; new ones
    /// are refused until then.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.running = false;
        state.shut_down = true;
        drop(state);
        self.available.notify_all();
        self.idle.notify_all();
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }

    /// Block until `project` has nothing queued or being parsed.
    ///
    /// # Errors
    /// Returns [`QueueError::Interrupted`] when the queue shut down before
    /// the project's requests were parsed.
    pub fn wait_idle(&self, project: ProjectId) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        loop {
            if !state.outstanding.contains_key(&project) {
                return Ok(());
            }
            if state.shut_down && state.in_flight.keys().all(|k| k.project != project) {
                return Err(QueueError::Interrupted);
            }
            self.idle.wait(&mut state);
        }
    }

    pub fn is_idle(&self, project: ProjectId) -> bool {
        !self.state.lock().outstanding.contains_key(&project)
    }

    /// Number of queued requests, not counting files being parsed.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queued keys in poll order.
    pub fn snapshot(&self) -> Vec<FileKey> {
        let state = self.state.lock();
        state
            .immediate
            .iter()
            .chain(state.lane.iter())
            .copied()
            .collect()
    }
}
