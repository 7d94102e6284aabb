//! Include graph of one project.
//!
//! Every edge records one `#include` evaluated while parsing a file (its
//! origin, usually a translation unit): who included what, under which
//! macro context. The
//! includer and includee may belong to other projects. Edges are replaced
//! wholesale when their origin is reparsed.

use crate::ids::{FileKey, ProjectId};
use codemodel_parser_api::{IncludeDirective, IncludeStatus, MacroFingerprint};
use log::trace;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;

/// Unique identifier for an edge (monotonic counter).
pub type EdgeId = u64;

/// One evaluated `#include`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeEdge {
    pub id: EdgeId,
    /// Translation unit whose pass recorded the edge
    pub origin: FileKey,
    pub includer: FileKey,
    /// `None` for a broken include
    pub includee: Option<FileKey>,
    pub directive: IncludeDirective,
    /// Context the includer itself was entered with
    pub includer_context: MacroFingerprint,
    /// Context at the include point, i.e. the one the includee was entered with
    pub fingerprint: MacroFingerprint,
    pub status: IncludeStatus,
}

impl IncludeEdge {
    pub fn is_broken(&self) -> bool {
        self.includee.is_none()
    }

    pub fn is_circular(&self) -> bool {
        self.status == IncludeStatus::Circular
    }

    /// Whether the includee was actually entered (and so has a pair for
    /// this edge's fingerprint).
    pub fn entered(&self) -> bool {
        self.includee.is_some() && self.status.was_entered()
    }
}

/// Edge payload before an id is assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEdge {
    pub includer: FileKey,
    pub includee: Option<FileKey>,
    pub directive: IncludeDirective,
    pub includer_context: MacroFingerprint,
    pub fingerprint: MacroFingerprint,
    pub status: IncludeStatus,
}

#[derive(Debug, Default)]
pub struct IncludeGraph {
    edge_counter: EdgeId,
    edges: FxHashMap<EdgeId, IncludeEdge>,
    by_origin: FxHashMap<FileKey, FxHashSet<EdgeId>>,
    // Adjacency indexes for O(1) neighbor lookups
    adjacency_out: FxHashMap<FileKey, FxHashSet<EdgeId>>,
    adjacency_in: FxHashMap<FileKey, FxHashSet<EdgeId>>,
    broken: FxHashSet<EdgeId>,
}

impl IncludeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn edge(&self, id: EdgeId) -> Option<&IncludeEdge> {
        self.edges.get(&id)
    }

    fn next_edge_id(&mut self) -> EdgeId {
        let id = self.edge_counter;
        self.edge_counter += 1;
        id
    }

    fn insert(&mut self, origin: FileKey, edge: NewEdge) -> EdgeId {
        let id = self.next_edge_id();
        trace!(
            "edge {id}: {} -> {:?} under {}",
            edge.includer,
            edge.includee,
            edge.fingerprint
        );
        self.by_origin.entry(origin).or_default().insert(id);
        self.adjacency_out.entry(edge.includer).or_default().insert(id);
        match edge.includee {
            Some(includee) => {
                self.adjacency_in.entry(includee).or_default().insert(id);
            }
            None => {
                self.broken.insert(id);
            }
        }
        self.edges.insert(
            id,
            IncludeEdge {
                id,
                origin,
                includer: edge.includer,
                includee: edge.includee,
                directive: edge.directive,
                includer_context: edge.includer_context,
                fingerprint: edge.fingerprint,
                status: edge.status,
            },
        );
        id
    }

    fn unlink(&mut self, id: EdgeId) -> Option<IncludeEdge> {
        let edge = self.edges.remove(&id)?;
        if let Some(set) = self.by_origin.get_mut(&edge.origin) {
            set.remove(&id);
        }
        if let Some(set) = self.adjacency_out.get_mut(&edge.includer) {
            set.remove(&id);
        }
        if let Some(includee) = edge.includee {
            if let Some(set) = self.adjacency_in.get_mut(&includee) {
                set.remove(&id);
            }
        }
        self.broken.remove(&id);
        Some(edge)
    }

    /// Replace every edge recorded by `origin`; returns the old edges.
    pub fn replace_origin(&mut self, origin: FileKey, edges: Vec<NewEdge>) -> Vec<IncludeEdge> {
        let removed = self.remove_origin(origin);
        for edge in edges {
            self.insert(origin, edge);
        }
        removed
    }

    /// Drop every edge recorded by `origin`.
    pub fn remove_origin(&mut self, origin: FileKey) -> Vec<IncludeEdge> {
        let ids = self.by_origin.remove(&origin).unwrap_or_default();
        let mut removed: Vec<IncludeEdge> = ids.into_iter().filter_map(|id| self.unlink(id)).collect();
        removed.sort_by_key(|e| e.id);
        removed
    }

    /// Drop every edge recorded by an origin of `project`.
    pub fn remove_origins_of(&mut self, project: ProjectId) -> Vec<IncludeEdge> {
        let origins: Vec<FileKey> = self
            .by_origin
            .keys()
            .filter(|k| k.project == project)
            .copied()
            .collect();
        let mut removed: Vec<IncludeEdge> = origins
            .into_iter()
            .flat_map(|origin| self.remove_origin(origin))
            .collect();
        removed.sort_by_key(|e| e.id);
        removed
    }

    fn collect(&self, ids: Option<&FxHashSet<EdgeId>>) -> Vec<&IncludeEdge> {
        let mut edges: Vec<&IncludeEdge> = ids
            .into_iter()
            .flatten()
            .filter_map(|id| self.edges.get(id))
            .collect();
        edges.sort_by_key(|e| e.id);
        edges
    }

    /// Edges recorded by `origin`, in directive order.
    pub fn edges_from_origin(&self, origin: FileKey) -> Vec<&IncludeEdge> {
        self.collect(self.by_origin.get(&origin))
    }

    /// Edges whose includer is `key`.
    pub fn outgoing(&self, key: FileKey) -> Vec<&IncludeEdge> {
        self.collect(self.adjacency_out.get(&key))
    }

    /// Edges whose includee is `key`.
    pub fn incoming(&self, key: FileKey) -> Vec<&IncludeEdge> {
        self.collect(self.adjacency_in.get(&key))
    }

    /// Origins whose passes entered `key` under `fingerprint`.
    pub fn origins_including(&self, key: FileKey, fingerprint: MacroFingerprint) -> BTreeSet<FileKey> {
        self.incoming(key)
            .into_iter()
            .filter(|e| e.entered() && e.fingerprint == fingerprint)
            .map(|e| e.origin)
            .collect()
    }

    /// Every origin whose pass reached `key`, entered or not.
    pub fn origins_reaching(&self, key: FileKey) -> BTreeSet<FileKey> {
        self.incoming(key).into_iter().map(|e| e.origin).collect()
    }

    /// Contexts `key` was entered with by any origin.
    pub fn fingerprints_of(&self, key: FileKey) -> BTreeSet<MacroFingerprint> {
        self.incoming(key)
            .into_iter()
            .filter(|e| e.entered())
            .map(|e| e.fingerprint)
            .collect()
    }

    pub fn broken_edges(&self) -> Vec<&IncludeEdge> {
        self.collect(Some(&self.broken))
    }

    /// Broken edges whose includer is `key`.
    pub fn broken_from(&self, key: FileKey) -> Vec<&IncludeEdge> {
        self.outgoing(key).into_iter().filter(|e| e.is_broken()).collect()
    }

    /// Point a broken edge at a file that now exists.
    pub fn resolve_edge(&mut self, id: EdgeId, includee: FileKey) -> bool {
        let Some(edge) = self.edges.get_mut(&id) else {
            return false;
        };
        if edge.includee.is_some() {
            return false;
        }
        edge.includee = Some(includee);
        edge.status = IncludeStatus::Resolved;
        self.broken.remove(&id);
        self.adjacency_in.entry(includee).or_default().insert(id);
        true
    }

    /// Detach a deleted file: edges it recorded or that leave it are dropped,
    /// edges into it become broken. Returns the edges that became broken.
    pub fn detach_file(&mut self, key: FileKey) -> Vec<IncludeEdge> {
        self.remove_origin(key);
        let outgoing: Vec<EdgeId> = self
            .adjacency_out
            .remove(&key)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        for id in outgoing {
            self.unlink(id);
        }

        let incoming: Vec<EdgeId> = self
            .adjacency_in
            .remove(&key)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        let mut broken = Vec::with_capacity(incoming.len());
        for id in incoming {
            if let Some(edge) = self.edges.get_mut(&id) {
                edge.includee = None;
                edge.status = IncludeStatus::Unresolved;
                self.broken.insert(id);
                broken.push(edge.clone());
            }
        }
        broken.sort_by_key(|e| e.id);
        broken
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{FileId, ProjectId};

    fn key(n: u32) -> FileKey {
        FileKey::new(ProjectId(1), FileId(n))
    }

    fn edge(includer: u32, includee: Option<u32>, fp: u64) -> NewEdge {
        NewEdge {
            includer: key(includer),
            includee: includee.map(key),
            directive: IncludeDirective::quoted("x.h", 0, 1),
            includer_context: MacroFingerprint(0),
            fingerprint: MacroFingerprint(fp),
            status: if includee.is_some() {
                IncludeStatus::Resolved
            } else {
                IncludeStatus::Unresolved
            },
        }
    }

    #[test]
    fn test_replace_origin() {
        let mut graph = IncludeGraph::new();
        graph.replace_origin(key(0), vec![edge(0, Some(1), 5), edge(1, Some(2), 5)]);
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.origins_including(key(2), MacroFingerprint(5)), BTreeSet::from([key(0)]));

        let old = graph.replace_origin(key(0), vec![edge(0, Some(1), 6)]);
        assert_eq!(old.len(), 2);
        assert_eq!(graph.len(), 1);
        assert!(graph.incoming(key(2)).is_empty());
        assert_eq!(graph.fingerprints_of(key(1)), BTreeSet::from([MacroFingerprint(6)]));
    }

    #[test]
    fn test_origins_filter_by_fingerprint() {
        let mut graph = IncludeGraph::new();
        graph.replace_origin(key(0), vec![edge(0, Some(9), 1)]);
        graph.replace_origin(key(3), vec![edge(3, Some(9), 2)]);
        graph.replace_origin(key(4), vec![edge(4, Some(9), 1)]);
        assert_eq!(
            graph.origins_including(key(9), MacroFingerprint(1)),
            BTreeSet::from([key(0), key(4)])
        );
        assert_eq!(graph.origins_reaching(key(9)).len(), 3);
    }

    #[test]
    fn test_circular_edges_are_not_entered() {
        let mut graph = IncludeGraph::new();
        let mut circular = edge(2, Some(0), 1);
        circular.status = IncludeStatus::Circular;
        graph.replace_origin(key(0), vec![edge(0, Some(2), 1), circular]);
        assert!(graph.origins_including(key(0), MacroFingerprint(1)).is_empty());
        assert!(graph.outgoing(key(2))[0].is_circular());
    }

    #[test]
    fn test_broken_edge_resolution() {
        let mut graph = IncludeGraph::new();
        graph.replace_origin(key(0), vec![edge(0, None, 1)]);
        assert_eq!(graph.broken_edges().len(), 1);
        assert_eq!(graph.broken_from(key(0)).len(), 1);

        let id = graph.broken_edges()[0].id;
        assert!(graph.resolve_edge(id, key(7)));
        assert!(!graph.resolve_edge(id, key(8)));
        assert!(graph.broken_edges().is_empty());
        assert_eq!(graph.incoming(key(7)).len(), 1);
    }

    #[test]
    fn test_detach_file() {
        let mut graph = IncludeGraph::new();
        graph.replace_origin(key(0), vec![edge(0, Some(1), 1), edge(1, Some(2), 1)]);
        let broken = graph.detach_file(key(1));
        assert_eq!(broken.len(), 1);
        assert_eq!(broken[0].includer, key(0));
        assert!(graph.outgoing(key(1)).is_empty());
        assert!(graph.incoming(key(2)).is_empty());
        assert_eq!(graph.broken_from(key(0)).len(), 1);
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_remove_origins_of_project() {
        let mut graph = IncludeGraph::new();
        let foreign = FileKey::new(ProjectId(2), FileId(0));
        graph.replace_origin(key(0), vec![edge(0, Some(1), 1)]);
        graph.replace_origin(
            foreign,
            vec![NewEdge {
                includer: foreign,
                ..edge(0, Some(1), 2)
            }],
        );
        let removed = graph.remove_origins_of(ProjectId(2));
        assert_eq!(removed.len(), 1);
        assert_eq!(graph.fingerprints_of(key(1)), BTreeSet::from([MacroFingerprint(1)]));
    }
}
