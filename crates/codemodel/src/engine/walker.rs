//! Include resolution for parse passes.

use super::Project;
use crate::ids::ProjectId;
use codemodel_parser_api::{
    normalize_path, ContentProvider, IncludeDirective, IncludeEntry, IncludeHandler,
    MacroEnvironment, MacroFingerprint,
};
use log::trace;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub(crate) type ContextTable = RwLock<FxHashMap<MacroFingerprint, Arc<MacroEnvironment>>>;

/// Directories searched for includes seen from `viewer`: its own include
/// directories, then the roots and include directories of its dependencies,
/// transitively.
pub(crate) fn search_path(
    projects: &BTreeMap<ProjectId, Arc<Project>>,
    viewer: ProjectId,
) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    let mut seen_dirs = FxHashSet::default();
    let mut push = |dir: &PathBuf, dirs: &mut Vec<PathBuf>| {
        if seen_dirs.insert(dir.clone()) {
            dirs.push(dir.clone());
        }
    };

    let Some(project) = projects.get(&viewer) else {
        return dirs;
    };
    for dir in project
        .settings
        .include_dirs
        .iter()
        .chain(&project.settings.system_include_dirs)
    {
        push(dir, &mut dirs);
    }

    let mut visited = BTreeSet::from([viewer]);
    let mut pending: VecDeque<ProjectId> = project.settings.dependencies.iter().copied().collect();
    while let Some(id) = pending.pop_front() {
        if !visited.insert(id) {
            continue;
        }
        let Some(dep) = projects.get(&id) else {
            continue;
        };
        for dir in dep
            .settings
            .roots
            .iter()
            .chain(&dep.settings.include_dirs)
            .chain(&dep.settings.system_include_dirs)
        {
            push(dir, &mut dirs);
        }
        pending.extend(dep.settings.dependencies.iter().copied());
    }
    dirs
}

/// Find the file an include directive names. Quoted includes look next to
/// the includer first.
pub(crate) fn resolve_include(
    provider: &dyn ContentProvider,
    search: &[PathBuf],
    includer: &Path,
    directive: &IncludeDirective,
) -> Option<PathBuf> {
    let name = Path::new(&directive.name);
    if name.is_absolute() {
        let path = normalize_path(name);
        return provider.exists(&path).then_some(path);
    }
    let local = if directive.angled {
        None
    } else {
        includer.parent().map(|dir| dir.join(name))
    };
    local
        .into_iter()
        .chain(search.iter().map(|dir| dir.join(name)))
        .map(|candidate| normalize_path(&candidate))
        .find(|candidate| provider.exists(candidate))
}

/// Project that owns the FileModel for `path` when `viewer` reaches it:
/// the viewer if the path is under its roots, else the first project whose
/// roots hold it, else the first project whose include directories hold it,
/// else the viewer. A header outside every root so has one model however
/// many projects include it; the others see it through their pairs.
pub(crate) fn owner_of(
    projects: &BTreeMap<ProjectId, Arc<Project>>,
    viewer: ProjectId,
    path: &Path,
) -> ProjectId {
    if projects
        .get(&viewer)
        .is_some_and(|p| p.settings.contains(path))
    {
        return viewer;
    }
    projects
        .values()
        .find(|p| p.settings.contains(path))
        .or_else(|| projects.values().find(|p| p.settings.searches(path)))
        .map_or(viewer, |p| p.id)
}

/// [`IncludeHandler`] used by the parse workers.
///
/// Tracks the `(file, context)` pairs on the active include path so that a
/// cycle ends in a circular marker, enforces the engine's depth limit and
/// collects macro environments of contexts not seen before.
pub(crate) struct IncludeWalker<'a> {
    provider: &'a dyn ContentProvider,
    known: &'a ContextTable,
    search: Vec<PathBuf>,
    visiting: FxHashSet<(PathBuf, MacroFingerprint)>,
    depth: usize,
    max_depth: usize,
    discovered: FxHashMap<MacroFingerprint, Arc<MacroEnvironment>>,
}

impl<'a> IncludeWalker<'a> {
    pub fn new(
        provider: &'a dyn ContentProvider,
        known: &'a ContextTable,
        search: Vec<PathBuf>,
        max_depth: usize,
        root: &Path,
        context: MacroFingerprint,
    ) -> Self {
        let mut visiting = FxHashSet::default();
        visiting.insert((root.to_path_buf(), context));
        Self {
            provider,
            known,
            search,
            visiting,
            depth: 0,
            max_depth,
            discovered: FxHashMap::default(),
        }
    }

    /// Contexts entered during the pass that the engine did not know yet.
    pub fn into_contexts(self) -> FxHashMap<MacroFingerprint, Arc<MacroEnvironment>> {
        self.discovered
    }
}

impl IncludeHandler for IncludeWalker<'_> {
    fn enter(
        &mut self,
        includer: &Path,
        directive: &IncludeDirective,
        macros: &MacroEnvironment,
    ) -> IncludeEntry {
        let Some(path) = resolve_include(self.provider, &self.search, includer, directive) else {
            trace!("{}: unresolved {}", includer.display(), directive.name);
            return IncludeEntry::Unresolved;
        };
        let context = macros.fingerprint();
        if self.visiting.contains(&(path.clone(), context)) {
            trace!("{}: circular include of {}", includer.display(), path.display());
            return IncludeEntry::Circular { path };
        }
        if self.depth >= self.max_depth {
            return IncludeEntry::DepthLimited { path };
        }
        let text = match self.provider.read_text(&path) {
            Ok(text) => text,
            Err(e) => {
                return IncludeEntry::Failed {
                    message: e.to_string(),
                    path,
                }
            }
        };

        if !self.discovered.contains_key(&context) && !self.known.read().contains_key(&context) {
            self.discovered.insert(context, Arc::new(macros.clone()));
        }
        self.visiting.insert((path.clone(), context));
        self.depth += 1;
        IncludeEntry::Enter { path, text }
    }

    fn leave(&mut self, path: &Path, context: MacroFingerprint) {
        if self.visiting.remove(&(path.to_path_buf(), context)) {
            self.depth = self.depth.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectSettings;
    use crate::project::ProjectModel;
    use codemodel_parser_api::MemoryContentProvider;

    fn walker<'a>(
        provider: &'a MemoryContentProvider,
        known: &'a ContextTable,
        max_depth: usize,
    ) -> IncludeWalker<'a> {
        IncludeWalker::new(
            provider,
            known,
            vec![PathBuf::from("/inc")],
            max_depth,
            Path::new("/src/main.c"),
            MacroEnvironment::new().fingerprint(),
        )
    }

    fn projects(settings: Vec<ProjectSettings>) -> BTreeMap<ProjectId, Arc<Project>> {
        settings
            .into_iter()
            .enumerate()
            .map(|(n, settings)| {
                let id = ProjectId(n as u32);
                let base_env = Arc::new(settings.base_environment());
                let project = Project {
                    id,
                    base_fingerprint: base_env.fingerprint(),
                    base_env,
                    model: RwLock::new(ProjectModel::new(id, settings.clone())),
                    settings,
                };
                (id, Arc::new(project))
            })
            .collect()
    }

    #[test]
    fn test_owner_of_shared_header() {
        let projects = projects(vec![
            ProjectSettings::new("a").with_root("/a").with_include_dir("/sys"),
            ProjectSettings::new("b").with_root("/b").with_include_dir("/sys"),
            ProjectSettings::new("lib").with_root("/lib"),
        ]);
        let (a, b, lib) = (ProjectId(0), ProjectId(1), ProjectId(2));
        // One owner for a header outside every root
        assert_eq!(owner_of(&projects, a, Path::new("/sys/s.h")), a);
        assert_eq!(owner_of(&projects, b, Path::new("/sys/s.h")), a);
        // Roots win over include directories
        assert_eq!(owner_of(&projects, a, Path::new("/lib/l.h")), lib);
        assert_eq!(owner_of(&projects, b, Path::new("/b/local.h")), b);
        assert_eq!(owner_of(&projects, b, Path::new("/elsewhere/x.h")), b);
    }

    #[test]
    fn test_quoted_prefers_includer_directory() {
        let provider = MemoryContentProvider::new();
        provider.write("/src/a.h", "");
        provider.write("/inc/a.h", "");
        let search = vec![PathBuf::from("/inc")];
        let quoted = IncludeDirective::quoted("a.h", 0, 1);
        let angled = IncludeDirective::angled("a.h", 0, 1);
        let includer = Path::new("/src/main.c");
        assert_eq!(
            resolve_include(&provider, &search, includer, &quoted),
            Some(PathBuf::from("/src/a.h"))
        );
        assert_eq!(
            resolve_include(&provider, &search, includer, &angled),
            Some(PathBuf::from("/inc/a.h"))
        );
        let missing = IncludeDirective::quoted("../nope.h", 0, 1);
        assert_eq!(resolve_include(&provider, &search, includer, &missing), None);
    }

    #[test]
    fn test_reentry_is_circular() {
        let provider = MemoryContentProvider::new();
        provider.write("/src/main.c", "");
        provider.write("/inc/a.h", "");
        let known = ContextTable::default();
        let mut walker = walker(&provider, &known, 8);
        let env = MacroEnvironment::new();

        let entry = walker.enter(
            Path::new("/src/main.c"),
            &IncludeDirective::angled("a.h", 0, 1),
            &env,
        );
        assert!(matches!(entry, IncludeEntry::Enter { .. }));
        let again = walker.enter(
            Path::new("/inc/a.h"),
            &IncludeDirective::angled("a.h", 0, 1),
            &env,
        );
        assert_eq!(
            again,
            IncludeEntry::Circular {
                path: PathBuf::from("/inc/a.h")
            }
        );
        walker.leave(Path::new("/inc/a.h"), env.fingerprint());

        // The root itself is on the path from the start
        let root = walker.enter(
            Path::new("/inc/a.h"),
            &IncludeDirective::quoted("../src/main.c", 0, 1),
            &env,
        );
        assert!(matches!(root, IncludeEntry::Circular { .. }));
    }

    #[test]
    fn test_depth_limit_and_contexts() {
        let provider = MemoryContentProvider::new();
        provider.write("/inc/a.h", "");
        let known = ContextTable::default();
        let mut walker = walker(&provider, &known, 0);
        let mut env = MacroEnvironment::new();
        env.define(codemodel_parser_api::MacroDef::object("X", "1"));
        let entry = walker.enter(
            Path::new("/src/main.c"),
            &IncludeDirective::angled("a.h", 0, 1),
            &env,
        );
        assert!(matches!(entry, IncludeEntry::DepthLimited { .. }));

        let mut walker = self::walker(&provider, &known, 4);
        walker.enter(
            Path::new("/src/main.c"),
            &IncludeDirective::angled("a.h", 0, 1),
            &env,
        );
        let contexts = walker.into_contexts();
        assert!(contexts.contains_key(&env.fingerprint()));
    }

    #[test]
    fn test_unreadable_include_fails() {
        let provider = MemoryContentProvider::new();
        provider.write("/inc/a.h", "");
        provider.set_unreadable("/inc/a.h", true);
        let known = ContextTable::default();
        let mut walker = walker(&provider, &known, 4);
        let entry = walker.enter(
            Path::new("/src/main.c"),
            &IncludeDirective::angled("a.h", 0, 1),
            &MacroEnvironment::new(),
        );
        assert!(matches!(entry, IncludeEntry::Failed { .. }));
    }
}
