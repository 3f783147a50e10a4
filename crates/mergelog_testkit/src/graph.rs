//! Commit-DAG builder for seeding test repositories.

use crate::repo::MemoryRepository;
use mergelog_engine::{EngineResult, Repository};
use mergelog_protocol::{Commit, Diff};
use std::collections::{BTreeMap, BTreeSet};

/// One parent edge of the DAG under construction.
#[derive(Debug, Clone)]
pub struct Edge<D> {
    /// Parent id.
    pub from: u64,
    /// Child id.
    pub to: u64,
    /// Diffs from the parent's state to the child's.
    pub diffs: Vec<D>,
}

/// Creates a single-diff edge.
pub fn edge<D>(from: u64, to: u64, diff: D) -> Edge<D> {
    Edge {
        from,
        to,
        diffs: vec![diff],
    }
}

/// Builds a commit DAG with explicit ids into a [`MemoryRepository`].
///
/// Ids that appear only as a `from` become root commits. Edges sharing a
/// `to` produce one merge commit with several parents.
pub struct GraphBuilder<'a, D> {
    repository: &'a MemoryRepository<D>,
}

impl<'a, D: Diff> GraphBuilder<'a, D> {
    /// Creates a builder over the repository.
    pub fn new(repository: &'a MemoryRepository<D>) -> Self {
        Self { repository }
    }

    /// Pushes the commits described by `edges`.
    pub async fn build(&self, edges: Vec<Edge<D>>) -> EngineResult<()> {
        let mut by_child: BTreeMap<u64, BTreeMap<u64, Vec<D>>> = BTreeMap::new();
        let mut parents_only: BTreeSet<u64> = BTreeSet::new();
        for edge in edges {
            parents_only.insert(edge.from);
            by_child
                .entry(edge.to)
                .or_default()
                .insert(edge.from, edge.diffs);
        }

        let mut commits: Vec<Commit<u64, D>> = Vec::new();
        for root in parents_only {
            if !by_child.contains_key(&root) {
                commits.push(Commit::of_root(root));
            }
        }
        for (child, parents) in by_child {
            commits.push(Commit::of_merge(child, parents));
        }
        self.repository.push(commits).await
    }
}
