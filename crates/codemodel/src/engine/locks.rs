//! Ordered acquisition of project write locks.

use super::Project;
use crate::error::{ModelError, Result};
use crate::ids::ProjectId;
use crate::project::ProjectModel;
use log::trace;
use parking_lot::RwLockWriteGuard;
use std::collections::{btree_map, BTreeMap, BTreeSet};
use std::sync::Arc;

/// Write guards over several project models, taken in ascending project id
/// order so that concurrent multi-project updates cannot deadlock.
pub(crate) struct ProjectLocks<'a> {
    guards: BTreeMap<ProjectId, RwLockWriteGuard<'a, ProjectModel>>,
}

impl<'a> ProjectLocks<'a> {
    /// Lock the listed projects. Ids missing from `projects` are skipped.
    pub fn acquire(
        projects: &'a BTreeMap<ProjectId, Arc<Project>>,
        ids: impl IntoIterator<Item = ProjectId>,
    ) -> Self {
        let ids: BTreeSet<ProjectId> = ids.into_iter().collect();
        let mut guards = BTreeMap::new();
        for id in ids {
            if let Some(project) = projects.get(&id) {
                guards.insert(id, project.model.write());
            }
        }
        trace!("locked projects {:?}", guards.keys().collect::<Vec<_>>());
        Self { guards }
    }

    /// Lock every project in `projects`.
    pub fn all(projects: &'a BTreeMap<ProjectId, Arc<Project>>) -> Self {
        Self::acquire(projects, projects.keys().copied())
    }

    pub fn ids(&self) -> Vec<ProjectId> {
        self.guards.keys().copied().collect()
    }

    pub fn model(&self, id: ProjectId) -> Result<&ProjectModel> {
        self.guards
            .get(&id)
            .map(|guard| &**guard)
            .ok_or(ModelError::ProjectNotFound { project: id })
    }

    pub fn model_mut(&mut self, id: ProjectId) -> Result<&mut ProjectModel> {
        self.guards
            .get_mut(&id)
            .map(|guard| &mut **guard)
            .ok_or(ModelError::ProjectNotFound { project: id })
    }

    /// Every locked model, in ascending project order.
    pub fn models_mut(&mut self) -> ModelsMut<'_, 'a> {
        ModelsMut {
            guards: self.guards.values_mut(),
        }
    }
}

/// Iterator returned by [`ProjectLocks::models_mut`].
pub(crate) struct ModelsMut<'s, 'a> {
    guards: btree_map::ValuesMut<'s, ProjectId, RwLockWriteGuard<'a, ProjectModel>>,
}

impl<'s> Iterator for ModelsMut<'s, '_> {
    type Item = &'s mut ProjectModel;

    fn next(&mut self) -> Option<Self::Item> {
        self.guards.next().map(|guard| &mut **guard)
    }
}
