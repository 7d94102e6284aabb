//! Reaction to files added, changed or deleted outside the engine.

use crate::config::InvalidationPolicy;
use crate::engine::walker::{owner_of, resolve_include, search_path};
use crate::engine::worker::prune_views;
use crate::engine::{EngineInner, ProjectLocks, Reschedule};
use crate::error::Result;
use crate::graph::EdgeId;
use crate::ids::{FileKey, ProjectId};
use crate::queue::{ParseScope, QueuePosition};
use codemodel_parser_api::{normalize_path, MacroFingerprint};
use log::{debug, info};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A file-system change, as reported by an editor or a watcher.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FileSystemEvent {
    Added(PathBuf),
    Changed(PathBuf),
    Deleted(PathBuf),
}

impl FileSystemEvent {
    pub fn path(&self) -> &Path {
        match self {
            FileSystemEvent::Added(p) | FileSystemEvent::Changed(p) | FileSystemEvent::Deleted(p) => p,
        }
    }
}

/// A broken edge the added file satisfies
struct Repair {
    viewer: ProjectId,
    edge: EdgeId,
    includer: FileKey,
    includer_context: MacroFingerprint,
    origin: FileKey,
}

/// Decides which files to invalidate and reschedule after a file-system
/// event. Cheap to clone; all clones drive the same engine.
#[derive(Clone)]
pub struct ReparseCoordinator {
    inner: Arc<EngineInner>,
}

impl ReparseCoordinator {
    pub(crate) fn new(inner: Arc<EngineInner>) -> Self {
        Self { inner }
    }

    pub fn handle(&self, event: &FileSystemEvent) -> Result<()> {
        match event {
            FileSystemEvent::Added(path) => self.file_added(path),
            FileSystemEvent::Changed(path) => self.file_changed(path),
            FileSystemEvent::Deleted(path) => self.file_deleted(path),
        }
    }

    /// Live FileModels for `path`, in every project.
    fn live_keys(&self, path: &Path) -> Vec<FileKey> {
        self.inner
            .snapshot()
            .values()
            .filter_map(|p| p.model.read().find_live(path).map(|id| FileKey::new(p.id, id)))
            .collect()
    }

    /// The file's text changed: invalidate it and every pair computed from
    /// the old text, then reparse it first. Translation units including it
    /// follow only when its condition state turns out different, unless the
    /// engine uses [`InvalidationPolicy::Eager`]. An unknown path is handled
    /// as added.
    pub fn file_changed(&self, path: &Path) -> Result<()> {
        let path = normalize_path(path);
        let keys = self.live_keys(&path);
        if keys.is_empty() {
            return self.file_added(&path);
        }

        let eager = self.inner.config.dependent_invalidation == InvalidationPolicy::Eager;
        let projects = self.inner.snapshot();
        let mut followups: Vec<Reschedule> = Vec::new();
        {
            let mut locks = ProjectLocks::all(&projects);
            for key in &keys {
                let file = locks.model_mut(key.project)?.file_mut(key.file)?;
                file.invalidate();
                file.invalidate_pairs();
                for model in locks.models_mut() {
                    model.invalidate_container(*key);
                }
                followups.push((*key, ParseScope::All, QueuePosition::Immediate));
                if eager {
                    for viewer in locks.ids() {
                        let origins = locks.model(viewer)?.graph().origins_reaching(*key);
                        followups.extend(
                            origins
                                .into_iter()
                                .filter(|o| o != key)
                                .map(|o| (o, ParseScope::All, QueuePosition::Tail)),
                        );
                    }
                }
            }
        }
        debug!(
            "{}: changed, {} request(s) scheduled",
            path.display(),
            followups.len()
        );
        self.inner.schedule_all(followups);
        Ok(())
    }

    /// A new file appeared: add it to the project owning it and repair every
    /// broken include it satisfies. A path the engine already tracks is
    /// handled as changed.
    pub fn file_added(&self, path: &Path) -> Result<()> {
        let path = normalize_path(path);
        if !self.live_keys(&path).is_empty() {
            return self.file_changed(&path);
        }
        if !self.inner.provider.exists(&path) {
            debug!("{}: added but already gone", path.display());
            return Ok(());
        }

        let projects = self.inner.snapshot();
        let mut followups: Vec<Reschedule> = Vec::new();
        {
            let mut locks = ProjectLocks::all(&projects);

            let mut repairs = Vec::new();
            for viewer in locks.ids() {
                let search = search_path(&projects, viewer);
                let graph = locks.model(viewer)?.graph();
                for edge in graph.broken_edges() {
                    let includer_model = locks.model(edge.includer.project)?;
                    let includer_path = includer_model.file(edge.includer.file)?.path();
                    let resolved = resolve_include(
                        self.inner.provider.as_ref(),
                        &search,
                        includer_path,
                        &edge.directive,
                    );
                    if resolved.as_deref() == Some(path.as_path()) {
                        repairs.push(Repair {
                            viewer,
                            edge: edge.id,
                            includer: edge.includer,
                            includer_context: edge.includer_context,
                            origin: edge.origin,
                        });
                    }
                }
            }

            let by_roots = projects
                .values()
                .find(|p| p.settings.contains(&path) && self.inner.parser.can_parse(&path))
                .map(|p| p.id);
            if by_roots.is_none() && repairs.is_empty() {
                debug!("{}: no project takes this file", path.display());
                return Ok(());
            }

            let kind = self.inner.parser.file_kind(&path);
            let mut added: BTreeMap<ProjectId, FileKey> = BTreeMap::new();
            let owners = by_roots
                .into_iter()
                .chain(repairs.iter().map(|r| owner_of(&projects, r.viewer, &path)));
            for owner in owners {
                if added.contains_key(&owner) {
                    continue;
                }
                let (id, _) = locks.model_mut(owner)?.ensure_file(&path, kind)?;
                let key = FileKey::new(owner, id);
                added.insert(owner, key);
                followups.push((key, ParseScope::All, QueuePosition::Tail));
            }

            for repair in &repairs {
                let owner = owner_of(&projects, repair.viewer, &path);
                let Some(&key) = added.get(&owner) else {
                    continue;
                };
                locks
                    .model_mut(repair.viewer)?
                    .graph_mut()
                    .resolve_edge(repair.edge, key);
                locks.model_mut(repair.includer.project)?.invalidate_pair(
                    repair.includer.file,
                    repair.viewer,
                    repair.includer_context,
                )?;
                if repair.includer.project != repair.viewer {
                    let view = locks
                        .model(repair.includer.project)?
                        .view(repair.includer.file, repair.viewer)?;
                    locks
                        .model_mut(repair.viewer)?
                        .mirror(repair.includer, view);
                }
                followups.push((repair.origin, ParseScope::All, QueuePosition::Tail));
            }
            info!(
                "{}: added, {} broken include(s) repaired",
                path.display(),
                repairs.len()
            );
        }
        self.inner.schedule_all(followups);
        Ok(())
    }

    /// The file is gone: remove its models, cut its edges, turn the includes
    /// that reached it into broken includes and reparse their origins.
    pub fn file_deleted(&self, path: &Path) -> Result<()> {
        let path = normalize_path(path);
        let keys = self.live_keys(&path);
        if keys.is_empty() {
            debug!("{}: deleted but not tracked", path.display());
            return Ok(());
        }

        let projects = self.inner.snapshot();
        let mut followups: Vec<Reschedule> = Vec::new();
        {
            let mut locks = ProjectLocks::all(&projects);
            for key in &keys {
                self.inner.queue.remove(*key);
                locks.model_mut(key.project)?.remove_file(key.file)?;
            }

            for viewer in locks.ids() {
                let Some(project) = projects.get(&viewer) else {
                    continue;
                };
                for key in &keys {
                    let model = locks.model_mut(viewer)?;
                    model.remove_container(*key);
                    let recorded = model.graph_mut().remove_origin(*key);
                    let broken = model.graph_mut().detach_file(*key);
                    for edge in broken.iter().filter(|e| e.origin != *key) {
                        if let Ok(includer) = locks.model_mut(edge.includer.project) {
                            includer.invalidate_pair(
                                edge.includer.file,
                                viewer,
                                edge.includer_context,
                            )?;
                        }
                        followups.push((edge.origin, ParseScope::All, QueuePosition::Tail));
                    }
                    let reached = recorded
                        .iter()
                        .filter_map(|e| e.includee)
                        .filter(|k| !keys.contains(k));
                    prune_views(&mut locks, project, reached.collect::<Vec<_>>())?;
                }
            }
        }
        info!(
            "{}: deleted, {} includer(s) rescheduled",
            path.display(),
            followups.len()
        );
        self.inner.schedule_all(followups);
        Ok(())
    }
}
