//! Project model: the FileModel arena, the include graph, the cache of
//! condition states for headers owned by other projects, and the
//! declaration index.

use crate::condition::{store_pair, PairSet, PairUpdate, PreprocessorConditionState};
use crate::config::ProjectSettings;
use crate::error::{ModelError, Result};
use crate::file::{FileModel, FileState};
use crate::graph::IncludeGraph;
use crate::ids::{FileId, FileKey, ProjectId};
use codemodel_parser_api::{normalize_path, Declaration, FileKind, MacroFingerprint};
use log::{debug, trace};
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

pub struct ProjectModel {
    id: ProjectId,
    settings: ProjectSettings,
    base_fingerprint: MacroFingerprint,
    files: Vec<FileModel>,
    by_path: FxHashMap<PathBuf, FileId>,
    graph: IncludeGraph,
    /// Pairs of headers owned by other projects, as this project sees them
    file_container: BTreeMap<FileKey, PairSet>,
    /// Declaration name -> files declaring it
    declaration_index: FxHashMap<String, BTreeSet<FileId>>,
}

impl ProjectModel {
    pub fn new(id: ProjectId, settings: ProjectSettings) -> Self {
        let base_fingerprint = settings.base_environment().fingerprint();
        Self {
            id,
            settings,
            base_fingerprint,
            files: Vec::new(),
            by_path: FxHashMap::default(),
            graph: IncludeGraph::new(),
            file_container: BTreeMap::new(),
            declaration_index: FxHashMap::default(),
        }
    }

    pub fn id(&self) -> ProjectId {
        self.id
    }

    pub fn settings(&self) -> &ProjectSettings {
        &self.settings
    }

    /// Fingerprint of the environment translation units start with.
    pub fn base_fingerprint(&self) -> MacroFingerprint {
        self.base_fingerprint
    }

    pub fn key(&self, file: FileId) -> FileKey {
        FileKey::new(self.id, file)
    }

    /// Add a newly discovered file. A removed file at the same path is
    /// revived; a live one is a duplicate.
    pub fn add_file(&mut self, path: &Path, kind: FileKind) -> Result<FileId> {
        let path = normalize_path(path);
        if let Some(&id) = self.by_path.get(&path) {
            let file = &mut self.files[id.index()];
            if !file.is_removed() {
                return Err(ModelError::DuplicateFile {
                    project: self.id,
                    path,
                });
            }
            file.revive()?;
            debug!("{}: revived {}", self.id, path.display());
            return Ok(id);
        }

        let id = FileId(self.files.len() as u32);
        trace!("{}: new file {id} {}", self.id, path.display());
        self.files.push(FileModel::new(path.clone(), kind));
        self.by_path.insert(path, id);
        Ok(id)
    }

    /// The file at `path`, added (or revived) if needed. The flag is true
    /// when the file was not live before.
    pub fn ensure_file(&mut self, path: &Path, kind: FileKind) -> Result<(FileId, bool)> {
        match self.find(path) {
            Some(id) if !self.files[id.index()].is_removed() => Ok((id, false)),
            _ => Ok((self.add_file(path, kind)?, true)),
        }
    }

    pub fn find(&self, path: &Path) -> Option<FileId> {
        self.by_path.get(&normalize_path(path)).copied()
    }

    /// Live (not removed) file at `path`.
    pub fn find_live(&self, path: &Path) -> Option<FileId> {
        self.find(path)
            .filter(|id| !self.files[id.index()].is_removed())
    }

    pub fn file(&self, id: FileId) -> Result<&FileModel> {
        self.files.get(id.index()).ok_or_else(|| self.unknown(id))
    }

    pub fn file_mut(&mut self, id: FileId) -> Result<&mut FileModel> {
        let err = self.unknown(id);
        self.files.get_mut(id.index()).ok_or(err)
    }

    fn unknown(&self, id: FileId) -> ModelError {
        ModelError::FileNotFound {
            project: self.id,
            path: PathBuf::from(format!("<{id}>")),
        }
    }

    /// All files, including removed ones, in arena order.
    pub fn files(&self) -> impl Iterator<Item = (FileId, &FileModel)> {
        self.files
            .iter()
            .enumerate()
            .map(|(i, f)| (FileId(i as u32), f))
    }

    pub fn file_count(&self) -> usize {
        self.files.iter().filter(|f| !f.is_removed()).count()
    }

    pub fn graph(&self) -> &IncludeGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut IncludeGraph {
        &mut self.graph
    }

    /// Store the state `viewer` observed for `file` under `fingerprint`.
    pub fn set_pair(
        &mut self,
        file: FileId,
        viewer: ProjectId,
        fingerprint: MacroFingerprint,
        state: PreprocessorConditionState,
    ) -> Result<PairUpdate> {
        let model = self.file_mut(file)?;
        let update = store_pair(model.pairs_mut(viewer), fingerprint, state);
        trace!(
            "{}: pair {fingerprint} of {} for {viewer}: {update:?}",
            self.id,
            file
        );
        Ok(update)
    }

    /// Keep only the pairs of `viewer` whose fingerprint is in `keep`.
    pub fn prune_pairs(
        &mut self,
        file: FileId,
        viewer: ProjectId,
        keep: &BTreeSet<MacroFingerprint>,
    ) -> Result<usize> {
        let model = self.file_mut(file)?;
        let set = model.pairs_mut(viewer);
        let before = set.len();
        set.retain(|fp, _| keep.contains(fp));
        let pruned = before - set.len();
        if set.is_empty() {
            model.drop_view(viewer);
        }
        if pruned > 0 {
            debug!("{}: pruned {pruned} unused context(s) of {file}", self.id);
        }
        Ok(pruned)
    }

    pub fn invalidate_pair(
        &mut self,
        file: FileId,
        viewer: ProjectId,
        fingerprint: MacroFingerprint,
    ) -> Result<bool> {
        let model = self.file_mut(file)?;
        Ok(match model.pairs_mut(viewer).get_mut(&fingerprint) {
            Some(state) => {
                state.invalidate();
                true
            }
            None => false,
        })
    }

    /// Pairs `viewer` observed for `file`, cloned for mirroring.
    pub fn view(&self, file: FileId, viewer: ProjectId) -> Result<PairSet> {
        Ok(self.file(file)?.pairs(viewer).cloned().unwrap_or_default())
    }

    /// Replace this project's copy of a foreign header's pairs.
    pub fn mirror(&mut self, key: FileKey, pairs: PairSet) {
        if pairs.is_empty() {
            self.file_container.remove(&key);
        } else {
            self.file_container.insert(key, pairs);
        }
    }

    pub fn container_pairs(&self, key: FileKey) -> Option<&PairSet> {
        self.file_container.get(&key)
    }

    pub fn invalidate_container(&mut self, key: FileKey) {
        if let Some(set) = self.file_container.get_mut(&key) {
            for state in set.values_mut() {
                state.invalidate();
            }
        }
    }

    pub fn remove_container(&mut self, key: FileKey) -> Option<PairSet> {
        self.file_container.remove(&key)
    }

    /// Drop cached pairs of every header owned by `owner`.
    pub fn forget_owner(&mut self, owner: ProjectId) {
        self.file_container.retain(|key, _| key.project != owner);
    }

    /// Drop what `viewer` observed in every file of this project.
    pub fn forget_viewer(&mut self, viewer: ProjectId) {
        for file in &mut self.files {
            file.drop_view(viewer);
        }
    }

    /// Replace the declarations of `file` in the index.
    pub fn index_declarations(&mut self, file: FileId, old: &[Declaration], new: &[Declaration]) {
        for decl in old {
            if let Some(files) = self.declaration_index.get_mut(&decl.name) {
                files.remove(&file);
                if files.is_empty() {
                    self.declaration_index.remove(&decl.name);
                }
            }
        }
        for decl in new {
            self.declaration_index
                .entry(decl.name.clone())
                .or_default()
                .insert(file);
        }
    }

    /// Install parse results and keep the index in sync.
    pub fn publish_declarations(
        &mut self,
        file: FileId,
        declarations: Vec<Declaration>,
        line_index: codemodel_parser_api::LineIndex,
        stamp: codemodel_parser_api::Timestamp,
        content_hash: u64,
    ) -> Result<()> {
        let old = self.file(file)?.declarations().to_vec();
        self.index_declarations(file, &old, &declarations);
        self.file_mut(file)?
            .finish_parse(declarations, line_index, stamp, content_hash);
        Ok(())
    }

    /// Mark a file removed and drop its declarations from the index.
    pub fn remove_file(&mut self, file: FileId) -> Result<()> {
        let old = self.file(file)?.declarations().to_vec();
        self.index_declarations(file, &old, &[]);
        self.file_mut(file)?.remove();
        Ok(())
    }

    /// Declarations named `name`, by file.
    pub fn find_declarations(&self, name: &str) -> Vec<(FileId, &Declaration)> {
        let Some(files) = self.declaration_index.get(name) else {
            return Vec::new();
        };
        files
            .iter()
            .filter_map(|id| self.files.get(id.index()).map(|f| (*id, f)))
            .flat_map(|(id, f)| {
                f.declarations()
                    .iter()
                    .filter(move |d| d.name == name)
                    .map(move |d| (id, d))
            })
            .collect()
    }

    /// Files in the given state.
    pub fn files_in_state(&self, state: FileState) -> Vec<FileId> {
        self.files()
            .filter(|(_, f)| f.state() == state)
            .map(|(id, _)| id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codemodel_parser_api::{DeclarationKind, LineCol, LineIndex, TextRange};

    fn project() -> ProjectModel {
        ProjectModel::new(ProjectId(1), ProjectSettings::new("p").with_root("/p"))
    }

    fn decl(name: &str) -> Declaration {
        Declaration::new(
            name,
            DeclarationKind::Function,
            TextRange::new(0, 1),
            LineCol::new(1, 1),
            LineCol::new(1, 2),
        )
    }

    #[test]
    fn test_one_model_per_path() {
        let mut p = project();
        let a = p.add_file(Path::new("/p/./a.c"), FileKind::Source).unwrap();
        assert!(matches!(
            p.add_file(Path::new("/p/a.c"), FileKind::Source),
            Err(ModelError::DuplicateFile { .. })
        ));
        assert_eq!(p.ensure_file(Path::new("/p/a.c"), FileKind::Source).unwrap(), (a, false));

        p.remove_file(a).unwrap();
        assert_eq!(p.find_live(Path::new("/p/a.c")), None);
        assert_eq!(p.ensure_file(Path::new("/p/a.c"), FileKind::Source).unwrap(), (a, true));
        assert_eq!(p.file(a).unwrap().state(), FileState::Initial);
        assert_eq!(p.file_count(), 1);
    }

    #[test]
    fn test_declaration_index_tracks_publish_and_removal() {
        let mut p = project();
        let a = p.add_file(Path::new("/p/a.c"), FileKind::Source).unwrap();
        p.file_mut(a).unwrap().begin_parse().unwrap();
        p.publish_declarations(a, vec![decl("foo1")], LineIndex::default(), 1, 1)
            .unwrap();
        assert_eq!(p.find_declarations("foo1").len(), 1);

        p.file_mut(a).unwrap().begin_parse().unwrap();
        p.publish_declarations(a, vec![decl("foo2")], LineIndex::default(), 2, 2)
            .unwrap();
        assert!(p.find_declarations("foo1").is_empty());
        assert_eq!(p.find_declarations("foo2")[0].0, a);

        p.remove_file(a).unwrap();
        assert!(p.find_declarations("foo2").is_empty());
    }

    #[test]
    fn test_pairs_and_pruning() {
        let mut p = project();
        let h = p.add_file(Path::new("/p/a.h"), FileKind::Header).unwrap();
        let state = PreprocessorConditionState::new(vec![TextRange::new(3, 9)]);
        let viewer = ProjectId(2);

        assert_eq!(
            p.set_pair(h, viewer, MacroFingerprint(1), state.clone()).unwrap(),
            PairUpdate::Inserted
        );
        p.set_pair(h, viewer, MacroFingerprint(2), state.clone()).unwrap();
        assert!(p.invalidate_pair(h, viewer, MacroFingerprint(1)).unwrap());
        assert_eq!(
            p.set_pair(h, viewer, MacroFingerprint(1), state).unwrap(),
            PairUpdate::Changed
        );

        let pruned = p
            .prune_pairs(h, viewer, &BTreeSet::from([MacroFingerprint(2)]))
            .unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(p.view(h, viewer).unwrap().len(), 1);

        p.prune_pairs(h, viewer, &BTreeSet::new()).unwrap();
        assert!(p.file(h).unwrap().pairs(viewer).is_none());
    }

    #[test]
    fn test_file_container_mirror() {
        let mut p = project();
        let foreign = FileKey::new(ProjectId(0), FileId(4));
        let mut set = PairSet::new();
        set.insert(MacroFingerprint(5), PreprocessorConditionState::empty());
        p.mirror(foreign, set.clone());
        assert_eq!(p.container_pairs(foreign), Some(&set));

        p.invalidate_container(foreign);
        assert!(!p.container_pairs(foreign).unwrap()[&MacroFingerprint(5)].is_valid());

        p.forget_owner(ProjectId(0));
        assert!(p.container_pairs(foreign).is_none());
    }
}
