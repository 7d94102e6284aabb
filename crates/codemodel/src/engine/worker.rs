//! Parse workers: take a request from the queue, run the parse passes it
//! needs and publish the results under the project locks.

use super::locks::ProjectLocks;
use super::walker::{owner_of, search_path, IncludeWalker};
use super::{EngineInner, Project, Reschedule};
use crate::condition::PreprocessorConditionState;
use crate::error::Result;
use crate::graph::NewEdge;
use crate::ids::{FileKey, ProjectId};
use crate::listener::{FileEvent, Notification};
use crate::queue::{ParseScope, QueueEntry, QueuePosition};
use codemodel_parser_api::{FileKind, MacroEnvironment, MacroFingerprint, ParseOutput, ParseRequest};
use log::{debug, trace, warn};
use rustc_hash::FxHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub(crate) fn content_hash(text: &str) -> u64 {
    let mut hasher = FxHasher::default();
    text.hash(&mut hasher);
    hasher.finish()
}

/// Worker thread body; returns when the queue shuts down.
pub(crate) fn run(inner: Arc<EngineInner>, index: usize) {
    debug!("parse worker {index} started");
    while let Ok(entry) = inner.queue.poll() {
        let key = entry.key;
        process(&inner, entry);
        inner.queue.done(key, |project| {
            inner.notifier.send(Notification::ProjectFinished(project));
        });
    }
    debug!("parse worker {index} stopped");
}

/// One parse of one file under one entry context.
struct Pass {
    viewer: Arc<Project>,
    fingerprint: MacroFingerprint,
    output: ParseOutput,
}

fn process(inner: &EngineInner, entry: QueueEntry) {
    let key = entry.key;
    let Ok(project) = inner.project(key.project) else {
        debug!("{key}: project closed, dropping request");
        return;
    };

    let (path, kind, generation, contexts) = {
        let mut model = project.model.write();
        let file = match model.file_mut(key.file) {
            Ok(file) => file,
            Err(e) => {
                warn!("{key}: {e}");
                return;
            }
        };
        let generation = match file.begin_parse() {
            Ok(generation) => generation,
            Err(e) => {
                debug!("{key}: not parsed: {e}");
                return;
            }
        };
        (
            file.path().to_path_buf(),
            file.kind(),
            generation,
            file.contexts(),
        )
    };

    let read = inner
        .provider
        .last_modified(&path)
        .and_then(|stamp| Ok((stamp, inner.provider.read_text(&path)?)));
    let (stamp, text) = match read {
        Ok(read) => read,
        Err(e) => {
            warn!("{}: {e}", path.display());
            inner.stats.io_failure();
            let mut model = project.model.write();
            if let Ok(file) = model.file_mut(key.file) {
                if file.accepts(generation) {
                    file.fail(e.to_string());
                }
            }
            return;
        }
    };

    let event = FileEvent {
        project: key.project,
        key,
        path: path.clone(),
    };
    inner.notifier.send(Notification::FileStarted(event.clone()));

    let projects = inner.snapshot();
    let plan = plan_passes(inner, &projects, &project, kind, &contexts, &entry.scope);
    let mut passes = Vec::with_capacity(plan.len());
    for (viewer, fingerprint, env) in plan {
        match run_pass(inner, &projects, &viewer, &path, &text, fingerprint, &env) {
            Ok(output) => passes.push(Pass {
                viewer,
                fingerprint,
                output,
            }),
            Err(e) => {
                warn!("{}: {e}", path.display());
                inner.stats.parse_failure();
                let mut model = project.model.write();
                if let Ok(file) = model.file_mut(key.file) {
                    if file.accepts(generation) {
                        file.fail(e.to_string());
                    }
                }
                inner.notifier.send(Notification::FileFinished(event));
                return;
            }
        }
    }

    let published = publish(
        inner,
        &projects,
        key,
        &path,
        generation,
        stamp,
        content_hash(&text),
        passes,
    );
    match published {
        Ok(followups) => inner.schedule_all(followups),
        Err(e) => warn!("{}: publish failed: {e}", path.display()),
    }
    inner.notifier.send(Notification::FileFinished(event));
}

/// Contexts to parse a file under. A translation unit is parsed once under
/// its project's base environment. A header is parsed under every context
/// it has been entered with (restricted to `scope`), or under the base
/// environment when nothing includes it.
fn plan_passes(
    inner: &EngineInner,
    projects: &BTreeMap<ProjectId, Arc<Project>>,
    owner: &Arc<Project>,
    kind: FileKind,
    contexts: &[(ProjectId, MacroFingerprint)],
    scope: &ParseScope,
) -> Vec<(Arc<Project>, MacroFingerprint, Arc<MacroEnvironment>)> {
    let base = || {
        vec![(
            Arc::clone(owner),
            owner.base_fingerprint,
            Arc::clone(&owner.base_env),
        )]
    };
    if kind == FileKind::Source {
        return base();
    }

    let mut selected: Vec<(ProjectId, MacroFingerprint)> = match scope {
        ParseScope::All => contexts.to_vec(),
        ParseScope::Contexts(wanted) => contexts
            .iter()
            .filter(|(_, fp)| wanted.contains(fp))
            .copied()
            .collect(),
    };
    if selected.is_empty() {
        selected = contexts.to_vec();
    }

    let plan: Vec<_> = selected
        .into_iter()
        .filter_map(|(viewer, fp)| {
            let project = projects.get(&viewer)?;
            let env = if fp == project.base_fingerprint {
                Some(Arc::clone(&project.base_env))
            } else {
                inner.context_env(fp)
            };
            match env {
                Some(env) => Some((Arc::clone(project), fp, env)),
                None => {
                    debug!("no environment recorded for context {fp}");
                    None
                }
            }
        })
        .collect();
    if plan.is_empty() {
        base()
    } else {
        plan
    }
}

fn run_pass(
    inner: &EngineInner,
    projects: &BTreeMap<ProjectId, Arc<Project>>,
    viewer: &Project,
    path: &Path,
    text: &str,
    fingerprint: MacroFingerprint,
    env: &MacroEnvironment,
) -> std::result::Result<ParseOutput, codemodel_parser_api::ParserError> {
    let mut walker = IncludeWalker::new(
        inner.provider.as_ref(),
        &inner.contexts,
        search_path(projects, viewer.id),
        inner.config.max_include_depth,
        path,
        fingerprint,
    );
    let request = ParseRequest::new(path, text, env);
    let output = inner.parser.parse(&request, &mut walker)?;
    inner.register_contexts(walker.into_contexts());
    trace!(
        "{}: pass under {fingerprint} for {}: {} includes",
        path.display(),
        viewer.id,
        output.includes.len()
    );
    Ok(output)
}

/// Install the results of `passes` for `origin`.
///
/// Returns the files to schedule once the locks are released: newly
/// discovered includees and translation units whose view of a changed
/// condition state is now stale.
#[allow(clippy::too_many_arguments)]
fn publish(
    inner: &EngineInner,
    projects: &BTreeMap<ProjectId, Arc<Project>>,
    origin: FileKey,
    path: &Path,
    generation: u64,
    stamp: codemodel_parser_api::Timestamp,
    hash: u64,
    passes: Vec<Pass>,
) -> Result<Vec<Reschedule>> {
    // Owners of every file the passes reached, per viewer
    let mut owners: BTreeMap<(ProjectId, PathBuf), ProjectId> = BTreeMap::new();
    for pass in &passes {
        for record in &pass.output.includes {
            for reached in std::iter::once(&record.includer).chain(record.target.as_ref()) {
                owners
                    .entry((pass.viewer.id, reached.clone()))
                    .or_insert_with(|| owner_of(projects, pass.viewer.id, reached));
            }
        }
    }
    let lock_ids = std::iter::once(origin.project)
        .chain(passes.iter().map(|p| p.viewer.id))
        .chain(owners.values().copied());
    let mut locks = ProjectLocks::acquire(projects, lock_ids);

    let mut followups = Vec::new();
    {
        let file = locks.model(origin.project)?.file(origin.file)?;
        let current = inner.provider.last_modified(path).ok();
        if !file.accepts(generation) || current != Some(stamp) {
            inner.stats.stale_discard();
            debug!(
                "{}: discarding stale parse (generation {generation}, stamp {stamp})",
                path.display()
            );
            if !file.is_removed() {
                if file.accepts(generation) {
                    locks.model_mut(origin.project)?.file_mut(origin.file)?.invalidate();
                }
                followups.push((origin, ParseScope::All, QueuePosition::Immediate));
            }
            return Ok(followups);
        }
    }

    let mut created: BTreeSet<FileKey> = BTreeSet::new();
    let mut cascade: BTreeSet<FileKey> = BTreeSet::new();
    let mut touched: BTreeMap<ProjectId, BTreeSet<FileKey>> = BTreeMap::new();
    let mut updates: Vec<(FileKey, ProjectId, MacroFingerprint, PreprocessorConditionState)> =
        Vec::new();
    let mut edges: BTreeMap<ProjectId, Vec<NewEdge>> = BTreeMap::new();
    let viewers: BTreeMap<ProjectId, Arc<Project>> = passes
        .iter()
        .map(|p| (p.viewer.id, Arc::clone(&p.viewer)))
        .collect();

    for pass in &passes {
        let viewer = pass.viewer.id;
        updates.push((
            origin,
            viewer,
            pass.fingerprint,
            PreprocessorConditionState::new(pass.output.inactive_blocks.clone()),
        ));
        for record in &pass.output.includes {
            let mut ensure = |locks: &mut ProjectLocks<'_>, reached: &PathBuf| -> Result<FileKey> {
                let owner = owners
                    .get(&(viewer, reached.clone()))
                    .copied()
                    .unwrap_or(viewer);
                let (id, new) = locks
                    .model_mut(owner)?
                    .ensure_file(reached, inner.parser.file_kind(reached))?;
                let key = FileKey::new(owner, id);
                if new {
                    created.insert(key);
                }
                Ok(key)
            };
            let includer = ensure(&mut locks, &record.includer)?;
            let includee = match &record.target {
                Some(target) => Some(ensure(&mut locks, target)?),
                None => None,
            };
            if let Some(includee) = includee {
                if record.status.was_entered() {
                    updates.push((
                        includee,
                        viewer,
                        record.context,
                        PreprocessorConditionState::new(record.inactive_blocks.clone()),
                    ));
                }
            }
            edges.entry(viewer).or_default().push(NewEdge {
                includer,
                includee,
                directive: record.directive.clone(),
                includer_context: record.includer_context,
                fingerprint: record.context,
                status: record.status.clone(),
            });
        }
    }

    for viewer in viewers.keys() {
        let new_edges = edges.remove(viewer).unwrap_or_default();
        let reached: BTreeSet<FileKey> = new_edges.iter().filter_map(|e| e.includee).collect();
        let old = locks
            .model_mut(*viewer)?
            .graph_mut()
            .replace_origin(origin, new_edges);
        let set = touched.entry(*viewer).or_default();
        set.extend(reached);
        set.extend(old.iter().filter_map(|e| e.includee));
        set.remove(&origin);
    }

    for (key, viewer, fingerprint, state) in updates {
        let update = locks
            .model_mut(key.project)?
            .set_pair(key.file, viewer, fingerprint, state)?;
        if update.needs_cascade() {
            let origins = locks
                .model(viewer)?
                .graph()
                .origins_including(key, fingerprint);
            trace!("{key} changed under {fingerprint}; {} dependents", origins.len());
            cascade.extend(origins.into_iter().filter(|o| *o != origin));
        }
    }

    for (viewer, keys) in touched {
        if let Some(project) = viewers.get(&viewer) {
            prune_views(&mut locks, project, keys)?;
        }
    }
    for viewer in viewers.keys() {
        if origin.project != *viewer {
            let view = locks.model(origin.project)?.view(origin.file, *viewer)?;
            locks.model_mut(*viewer)?.mirror(origin, view);
        }
    }

    let mut passes = passes;
    let first = passes.swap_remove(0);
    locks.model_mut(origin.project)?.publish_declarations(
        origin.file,
        first.output.declarations,
        first.output.line_index,
        stamp,
        hash,
    )?;
    drop(locks);

    inner.stats.parsed();
    if !cascade.is_empty() {
        debug!(
            "{}: condition state changed, rescheduling {} dependent(s)",
            path.display(),
            cascade.len()
        );
        inner.stats.cascades(cascade.len());
    }
    followups.extend(
        created
            .into_iter()
            .chain(cascade)
            .map(|key| (key, ParseScope::All, QueuePosition::Tail)),
    );
    Ok(followups)
}

/// Drop the pairs `viewer` holds for `keys` under contexts no edge of its
/// graph enters them with any more, and refresh its copies of foreign
/// headers.
pub(crate) fn prune_views(
    locks: &mut ProjectLocks<'_>,
    viewer: &Project,
    keys: impl IntoIterator<Item = FileKey>,
) -> Result<()> {
    for key in keys {
        let mut keep = locks.model(viewer.id)?.graph().fingerprints_of(key);
        let Ok(owner) = locks.model_mut(key.project) else {
            continue;
        };
        if owner.file(key.file)?.is_removed() {
            continue;
        }
        if key.project == viewer.id && owner.file(key.file)?.kind() == FileKind::Source {
            keep.insert(viewer.base_fingerprint);
        }
        owner.prune_pairs(key.file, viewer.id, &keep)?;
        if key.project != viewer.id {
            let view = locks.model(key.project)?.view(key.file, viewer.id)?;
            locks.model_mut(viewer.id)?.mirror(key, view);
        }
    }
    Ok(())
}
