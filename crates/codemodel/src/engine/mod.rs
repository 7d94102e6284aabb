//! The engine: projects, parse queue, worker pool and listeners behind one
//! explicit handle.
//!
//! # Example
//!
//! ```
//! use codemodel::{Engine, EngineConfig, ProjectSettings};
//! use codemodel_parser_api::MemoryContentProvider;
//! use std::sync::Arc;
//!
//! let provider = MemoryContentProvider::new();
//! provider.write("/app/main.c", "int main(void) { return 0; }\n");
//!
//! let engine = Engine::with_c_parser(
//!     EngineConfig::default().with_worker_count(1),
//!     Arc::new(provider),
//! );
//! engine.startup();
//! let app = engine
//!     .add_project(ProjectSettings::new("app").with_root("/app"))
//!     .unwrap();
//! engine.wait_parse(app).unwrap();
//! assert_eq!(engine.find_declarations(app, "main").unwrap().len(), 1);
//! engine.shutdown();
//! ```

pub(crate) mod locks;
pub(crate) mod walker;
pub(crate) mod worker;

use crate::condition::{valid_pairs, PreprocessorStatePair};
use crate::config::{EngineConfig, ProjectSettings};
use crate::coordinator::ReparseCoordinator;
use crate::error::{ModelError, Result};
use crate::file::FileState;
use crate::graph::IncludeEdge;
use crate::ids::{FileKey, ProjectId};
use crate::listener::{Notifier, ParseListener};
use crate::project::ProjectModel;
use crate::queue::{ParseScope, ParserQueue, QueuePosition};
use crate::stats::{ParseStats, StatCounters};
use codemodel_parser_api::{
    normalize_path, ContentProvider, Declaration, FileKind, IncludeDirective, LineCol,
    MacroEnvironment, MacroFingerprint, ParserError, ParserMetrics, SourceParser,
};
pub(crate) use locks::ProjectLocks;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use walker::ContextTable;

/// A request to queue once no project lock is held.
pub(crate) type Reschedule = (FileKey, ParseScope, QueuePosition);

/// A registered project.
pub(crate) struct Project {
    pub id: ProjectId,
    pub settings: ProjectSettings,
    pub base_env: Arc<MacroEnvironment>,
    pub base_fingerprint: MacroFingerprint,
    pub model: RwLock<ProjectModel>,
}

/// State shared by the engine handle, the workers, file handles and the
/// coordinator.
pub(crate) struct EngineInner {
    pub config: EngineConfig,
    pub queue: ParserQueue,
    pub projects: RwLock<BTreeMap<ProjectId, Arc<Project>>>,
    pub parser: Arc<dyn SourceParser>,
    pub provider: Arc<dyn ContentProvider>,
    /// Macro environments by fingerprint, for reparsing headers per context
    pub contexts: ContextTable,
    pub notifier: Notifier,
    pub stats: StatCounters,
    next_project: AtomicU32,
}

impl EngineInner {
    pub fn project(&self, id: ProjectId) -> Result<Arc<Project>> {
        self.projects
            .read()
            .get(&id)
            .cloned()
            .ok_or(ModelError::ProjectNotFound { project: id })
    }

    /// Point-in-time copy of the project table. Model locks are only ever
    /// taken on such a copy, never while the table lock is held.
    pub fn snapshot(&self) -> BTreeMap<ProjectId, Arc<Project>> {
        self.projects.read().clone()
    }

    pub fn context_env(&self, fingerprint: MacroFingerprint) -> Option<Arc<MacroEnvironment>> {
        self.contexts.read().get(&fingerprint).cloned()
    }

    pub fn register_contexts(
        &self,
        contexts: FxHashMap<MacroFingerprint, Arc<MacroEnvironment>>,
    ) {
        if contexts.is_empty() {
            return;
        }
        let mut table = self.contexts.write();
        for (fingerprint, env) in contexts {
            table.entry(fingerprint).or_insert(env);
        }
    }

    /// Hand a file to the queue and move it to `Enqueued`. The model lock is
    /// held throughout so no worker sees the request before the state.
    pub fn schedule(&self, key: FileKey, scope: ParseScope, position: QueuePosition) -> Result<()> {
        let project = self.project(key.project)?;
        let mut model = project.model.write();
        let file = model.file_mut(key.file)?;
        file.check_request()?;
        self.queue.add(key, scope, position)?;
        file.request_parse()
    }

    /// Schedule follow-up work; files removed meanwhile are skipped.
    pub fn schedule_all(&self, requests: impl IntoIterator<Item = Reschedule>) {
        for (key, scope, position) in requests {
            if let Err(e) = self.schedule(key, scope, position) {
                debug!("{key}: not rescheduled: {e}");
            }
        }
    }

    /// Live FileModel for `path` in `project`.
    pub fn find_file(&self, project: ProjectId, path: &Path) -> Result<FileKey> {
        let p = self.project(project)?;
        let model = p.model.read();
        model
            .find_live(path)
            .map(|id| FileKey::new(project, id))
            .ok_or_else(|| ModelError::FileNotFound {
                project,
                path: normalize_path(path),
            })
    }
}

/// Incremental source model engine.
///
/// Owns the parser queue, the projects and the parse workers. Nothing is
/// parsed until [`startup`](Self::startup); [`shutdown`](Self::shutdown)
/// (or dropping the engine) stops the workers.
pub struct Engine {
    inner: Arc<EngineInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        parser: Arc<dyn SourceParser>,
        provider: Arc<dyn ContentProvider>,
    ) -> Self {
        let inner = EngineInner {
            config,
            queue: ParserQueue::new(),
            projects: RwLock::new(BTreeMap::new()),
            parser,
            provider,
            contexts: ContextTable::default(),
            notifier: Notifier::new(),
            stats: StatCounters::default(),
            next_project: AtomicU32::new(0),
        };
        Self {
            inner: Arc::new(inner),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Engine using the built-in C front end, configured by `config.parser`.
    #[cfg(feature = "c-frontend")]
    pub fn with_c_parser(config: EngineConfig, provider: Arc<dyn ContentProvider>) -> Self {
        let parser = codemodel_c::CParser::with_config(config.parser.clone());
        Self::new(config, Arc::new(parser), provider)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Start the worker pool. Calling it again while running has no effect.
    pub fn startup(&self) {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return;
        }
        self.inner.queue.startup();
        for index in 0..self.inner.config.worker_count {
            let inner = Arc::clone(&self.inner);
            let spawned = thread::Builder::new()
                .name(format!("codemodel-parse-{index}"))
                .spawn(move || worker::run(inner, index));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => warn!("cannot spawn parse worker {index}: {e}"),
            }
        }
        info!("engine started with {} worker(s)", workers.len());
    }

    /// Interrupt the workers and wait for in-flight parses to finish.
    /// Queued requests stay queued and are parsed after the next
    /// [`startup`](Self::startup).
    pub fn shutdown(&self) {
        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        if workers.is_empty() && self.inner.queue.is_shut_down() {
            return;
        }
        self.inner.queue.shutdown();
        for handle in workers {
            if handle.join().is_err() {
                warn!("parse worker panicked");
            }
        }
        self.inner.notifier.flush();
        info!("engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.queue.is_running()
    }

    /// Register a project, discover its files and schedule them.
    ///
    /// # Errors
    /// [`ModelError::ProjectNotFound`] when a dependency is not registered.
    pub fn add_project(&self, settings: ProjectSettings) -> Result<ProjectId> {
        {
            let projects = self.inner.projects.read();
            if let Some(missing) = settings
                .dependencies
                .iter()
                .find(|dep| !projects.contains_key(dep))
            {
                return Err(ModelError::ProjectNotFound { project: *missing });
            }
        }

        let id = ProjectId(self.inner.next_project.fetch_add(1, Ordering::SeqCst));
        let base_env = Arc::new(settings.base_environment());
        let base_fingerprint = base_env.fingerprint();
        self.inner
            .register_contexts(FxHashMap::from_iter([(base_fingerprint, Arc::clone(&base_env))]));

        let mut discovered: BTreeSet<PathBuf> = BTreeSet::new();
        for root in &settings.roots {
            match self.inner.provider.list_files(root) {
                Ok(paths) => discovered.extend(
                    self.inner
                        .parser
                        .filter_parseable(paths)
                        .iter()
                        .map(|p| normalize_path(p)),
                ),
                Err(e) => warn!("{id}: cannot list {}: {e}", root.display()),
            }
        }

        let mut model = ProjectModel::new(id, settings.clone());
        let mut sources = Vec::new();
        let mut headers = Vec::new();
        for path in &discovered {
            let kind = self.inner.parser.file_kind(path);
            let file = model.add_file(path, kind)?;
            match kind {
                FileKind::Source => sources.push(FileKey::new(id, file)),
                FileKind::Header => headers.push(FileKey::new(id, file)),
            }
        }

        info!(
            "{id}: added project '{}' with {} file(s)",
            settings.name,
            discovered.len()
        );
        let project = Project {
            id,
            settings,
            base_env,
            base_fingerprint,
            model: RwLock::new(model),
        };
        self.inner.projects.write().insert(id, Arc::new(project));

        // Translation units first; they reach most headers anyway
        self.inner.schedule_all(
            sources
                .into_iter()
                .chain(headers)
                .map(|key| (key, ParseScope::All, QueuePosition::Tail)),
        );
        Ok(id)
    }

    /// Close a project: drop its queued work, the views it contributed to
    /// other projects' files and their copies of its headers.
    pub fn remove_project(&self, id: ProjectId) -> Result<()> {
        let removed = self
            .inner
            .projects
            .write()
            .remove(&id)
            .ok_or(ModelError::ProjectNotFound { project: id })?;
        let dropped = self.inner.queue.remove_project(id);

        let removed_keys: Vec<FileKey> = removed
            .model
            .read()
            .files()
            .map(|(file, _)| FileKey::new(id, file))
            .collect();

        let projects = self.inner.snapshot();
        let mut followups = Vec::new();
        {
            let mut locks = ProjectLocks::all(&projects);
            for model in locks.models_mut() {
                model.forget_viewer(id);
                model.forget_owner(id);
                model.graph_mut().remove_origins_of(id);
                for key in &removed_keys {
                    for edge in model.graph_mut().detach_file(*key) {
                        followups.push((edge.origin, ParseScope::All, QueuePosition::Tail));
                    }
                }
            }
        }
        info!("{id}: removed project, {dropped} queued request(s) dropped");
        self.inner.schedule_all(followups);
        Ok(())
    }

    pub fn project_ids(&self) -> Vec<ProjectId> {
        self.inner.projects.read().keys().copied().collect()
    }

    pub fn project_settings(&self, project: ProjectId) -> Result<ProjectSettings> {
        Ok(self.inner.project(project)?.settings.clone())
    }

    /// Add a file explicitly and schedule it.
    ///
    /// # Errors
    /// [`ModelError::DuplicateFile`] when the project already has a live
    /// model for the path.
    pub fn add_file(&self, project: ProjectId, path: impl AsRef<Path>) -> Result<FileHandle> {
        let path = normalize_path(path.as_ref());
        let p = self.inner.project(project)?;
        let id = p
            .model
            .write()
            .add_file(&path, self.inner.parser.file_kind(&path))?;
        let key = FileKey::new(project, id);
        self.inner.schedule(key, ParseScope::All, QueuePosition::Tail)?;
        Ok(self.handle(key, path))
    }

    /// Handle to the live FileModel for `path` in `project`.
    pub fn file(&self, project: ProjectId, path: impl AsRef<Path>) -> Result<FileHandle> {
        let path = normalize_path(path.as_ref());
        let key = self.inner.find_file(project, &path)?;
        Ok(self.handle(key, path))
    }

    fn handle(&self, key: FileKey, path: PathBuf) -> FileHandle {
        FileHandle {
            inner: Arc::clone(&self.inner),
            key,
            path,
        }
    }

    /// Paths of the project's live files.
    pub fn files(&self, project: ProjectId) -> Result<Vec<PathBuf>> {
        let p = self.inner.project(project)?;
        let model = p.model.read();
        Ok(model
            .files()
            .filter(|(_, f)| !f.is_removed())
            .map(|(_, f)| f.path().to_path_buf())
            .collect())
    }

    /// Block until the project has no queued or in-flight parse, and every
    /// notification about it has been delivered.
    ///
    /// # Errors
    /// [`ModelError::NotRunning`] when the engine is not started and the
    /// project still has work; [`ModelError::Queue`] when the engine shuts
    /// down while waiting.
    pub fn wait_parse(&self, project: ProjectId) -> Result<()> {
        self.inner.project(project)?;
        if !self.is_running() && !self.inner.queue.is_idle(project) {
            return Err(ModelError::NotRunning);
        }
        self.inner.queue.wait_idle(project)?;
        self.inner.notifier.flush();
        Ok(())
    }

    /// For a file owned by `project`, the valid pairs every other project
    /// observed when including it.
    pub fn get_included_preproc_state_pairs(
        &self,
        project: ProjectId,
        path: impl AsRef<Path>,
    ) -> Result<BTreeMap<ProjectId, Vec<PreprocessorStatePair>>> {
        let key = self.inner.find_file(project, path.as_ref())?;
        let p = self.inner.project(project)?;
        let model = p.model.read();
        let file = model.file(key.file)?;
        Ok(file
            .state_pairs()
            .iter()
            .filter(|(viewer, _)| **viewer != project)
            .map(|(viewer, set)| (*viewer, valid_pairs(set)))
            .filter(|(_, pairs)| !pairs.is_empty())
            .collect())
    }

    /// The pairs `viewer` keeps for a header owned by another project.
    pub fn file_container_pairs(
        &self,
        viewer: ProjectId,
        path: impl AsRef<Path>,
    ) -> Result<Vec<PreprocessorStatePair>> {
        let path = normalize_path(path.as_ref());
        let projects = self.inner.snapshot();
        let owner = walker::owner_of(&projects, viewer, &path);
        let key = self.inner.find_file(owner, &path)?;
        let p = self.inner.project(viewer)?;
        let model = p.model.read();
        Ok(model
            .container_pairs(key)
            .map(valid_pairs)
            .unwrap_or_default())
    }

    /// Declarations named `name` in the project's files.
    pub fn find_declarations(
        &self,
        project: ProjectId,
        name: &str,
    ) -> Result<Vec<(PathBuf, Declaration)>> {
        let p = self.inner.project(project)?;
        let model = p.model.read();
        Ok(model
            .find_declarations(name)
            .into_iter()
            .filter_map(|(id, decl)| {
                let file = model.file(id).ok()?;
                Some((file.path().to_path_buf(), decl.clone()))
            })
            .collect())
    }

    /// Compare parsed files against the content provider and reschedule
    /// the ones changed or deleted behind the engine's back. Returns how
    /// many files were found out of date.
    pub fn validate(&self, project: ProjectId) -> Result<usize> {
        let p = self.inner.project(project)?;
        let parsed: Vec<(PathBuf, Option<u64>, Option<u64>)> = p
            .model
            .read()
            .files()
            .filter(|(_, f)| f.state() == FileState::Parsed)
            .map(|(_, f)| (f.path().to_path_buf(), f.stamp(), f.content_hash()))
            .collect();

        let coordinator = self.coordinator();
        let mut stale = 0;
        for (path, stamp, hash) in parsed {
            match self.inner.provider.last_modified(&path) {
                Err(ParserError::NotFound(_)) => {
                    coordinator.file_deleted(&path)?;
                    stale += 1;
                }
                Err(e) => debug!("{}: not validated: {e}", path.display()),
                Ok(current) if Some(current) == stamp => {}
                Ok(current) => {
                    let text = match self.inner.provider.read_text(&path) {
                        Ok(text) => text,
                        Err(e) => {
                            debug!("{}: not validated: {e}", path.display());
                            continue;
                        }
                    };
                    if Some(worker::content_hash(&text)) == hash {
                        let key = self.inner.find_file(project, &path)?;
                        if let Ok(file) = p.model.write().file_mut(key.file) {
                            file.touch(current);
                        }
                    } else {
                        coordinator.file_changed(&path)?;
                        stale += 1;
                    }
                }
            }
        }
        if stale > 0 {
            info!("{project}: validation found {stale} out-of-date file(s)");
        }
        Ok(stale)
    }

    /// Handle reacting to file-system events for this engine.
    pub fn coordinator(&self) -> ReparseCoordinator {
        ReparseCoordinator::new(Arc::clone(&self.inner))
    }

    pub fn add_listener(&self, listener: Arc<dyn ParseListener>) {
        self.inner.notifier.add_listener(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ParseListener>) -> bool {
        self.inner.notifier.remove_listener(listener)
    }

    pub fn stats(&self) -> ParseStats {
        self.inner.stats.snapshot()
    }

    pub fn parser_metrics(&self) -> ParserMetrics {
        self.inner.parser.metrics()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
        self.inner.notifier.stop();
    }
}

/// Handle to one FileModel.
///
/// Holds the file's key, not a reference to the model; every call looks the
/// model up and fails with [`ModelError::ProjectNotFound`] once the project
/// is closed.
#[derive(Clone)]
pub struct FileHandle {
    inner: Arc<EngineInner>,
    key: FileKey,
    path: PathBuf,
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("key", &self.key)
            .field("path", &self.path)
            .finish()
    }
}

impl FileHandle {
    pub fn key(&self) -> FileKey {
        self.key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_model<T>(&self, f: impl FnOnce(&ProjectModel) -> Result<T>) -> Result<T> {
        let project = self.inner.project(self.key.project)?;
        let model = project.model.read();
        f(&model)
    }

    /// Request a reparse: `Immediate` when `immediate`, else `Tail`.
    pub fn mark_reparse_needed(&self, immediate: bool) -> Result<()> {
        let position = if immediate {
            QueuePosition::Immediate
        } else {
            QueuePosition::Tail
        };
        self.inner.schedule(self.key, ParseScope::All, position)
    }

    /// Same as [`mark_reparse_needed`](Self::mark_reparse_needed), for
    /// callers outside the model.
    pub fn schedule_parsing(&self, immediate: bool) -> Result<()> {
        self.mark_reparse_needed(immediate)
    }

    pub fn state(&self) -> Result<FileState> {
        self.with_model(|m| Ok(m.file(self.key.file)?.state()))
    }

    pub fn generation(&self) -> Result<u64> {
        self.with_model(|m| Ok(m.file(self.key.file)?.generation()))
    }

    pub fn kind(&self) -> Result<FileKind> {
        self.with_model(|m| Ok(m.file(self.key.file)?.kind()))
    }

    pub fn declarations(&self) -> Result<Vec<Declaration>> {
        self.with_model(|m| Ok(m.file(self.key.file)?.declarations().to_vec()))
    }

    /// Annotation of the last failed read or parse.
    pub fn error(&self) -> Result<Option<String>> {
        self.with_model(|m| Ok(m.file(self.key.file)?.error().map(str::to_string)))
    }

    /// Valid pairs of the file, by the project that observed them.
    pub fn state_pairs(&self) -> Result<BTreeMap<ProjectId, Vec<PreprocessorStatePair>>> {
        self.with_model(|m| {
            Ok(m.file(self.key.file)?
                .state_pairs()
                .iter()
                .map(|(viewer, set)| (*viewer, valid_pairs(set)))
                .filter(|(_, pairs)| !pairs.is_empty())
                .collect())
        })
    }

    /// The valid pair leaving the most of `start..end` active.
    pub fn context_state_pair(
        &self,
        start: usize,
        end: usize,
    ) -> Result<Option<PreprocessorStatePair>> {
        self.with_model(|m| {
            let file = m.file(self.key.file)?;
            let wanted = end.saturating_sub(start);
            let mut best: Option<(usize, PreprocessorStatePair)> = None;
            for (fingerprint, state) in file
                .state_pairs()
                .values()
                .flat_map(|set| set.iter())
                .filter(|(_, state)| state.is_valid())
            {
                let active = state.active_length(start, end);
                if best.as_ref().map_or(true, |(b, _)| active > *b) {
                    best = Some((
                        active,
                        PreprocessorStatePair::new(*fingerprint, state.clone()),
                    ));
                }
                if active == wanted {
                    break;
                }
            }
            Ok(best.map(|(_, pair)| pair))
        })
    }

    /// Inactive blocks as 1-based line/column spans. A translation unit
    /// reports its base-context state; a header the context leaving most of
    /// it active.
    pub fn inactive_blocks(&self) -> Result<Vec<(LineCol, LineCol)>> {
        let project = self.inner.project(self.key.project)?;
        let (kind, text_len) = self.with_model(|m| {
            let file = m.file(self.key.file)?;
            Ok((file.kind(), file.line_index().text_len()))
        })?;
        let state = match kind {
            FileKind::Source => self.with_model(|m| {
                Ok(m.file(self.key.file)?
                    .pair(self.key.project, project.base_fingerprint)
                    .filter(|s| s.is_valid())
                    .cloned())
            })?,
            FileKind::Header => self.context_state_pair(0, text_len)?.map(|p| p.state),
        };
        let Some(state) = state else {
            return Ok(Vec::new());
        };
        self.with_model(|m| Ok(state.line_cols(m.file(self.key.file)?.line_index())))
    }

    /// Include edges whose includer is this file, across every project's
    /// graph.
    pub fn include_edges(&self) -> Result<Vec<IncludeEdge>> {
        let projects = self.inner.snapshot();
        let mut edges = Vec::new();
        for project in projects.values() {
            let model = project.model.read();
            edges.extend(model.graph().outgoing(self.key).into_iter().cloned());
        }
        Ok(edges)
    }

    /// Directives of this file that resolve to no file.
    pub fn broken_includes(&self) -> Result<Vec<IncludeDirective>> {
        let mut directives: Vec<IncludeDirective> = self
            .include_edges()?
            .into_iter()
            .filter(|e| e.is_broken())
            .map(|e| e.directive)
            .collect();
        directives.sort_by_key(|d| (d.offset, d.name.clone()));
        directives.dedup();
        Ok(directives)
    }

    pub fn has_broken_includes(&self) -> Result<bool> {
        Ok(!self.broken_includes()?.is_empty())
    }
}
