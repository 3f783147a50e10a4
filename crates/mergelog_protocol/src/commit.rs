//! Commit model for the replicated operation log.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::hash::Hash;

/// Bounds required of a commit id key.
///
/// Ids are opaque to the engine: allocated by the repository, compared
/// structurally, and ordered so that tie-breaks are deterministic across
/// replicas.
pub trait CommitId: Clone + Eq + Ord + Hash + Debug + Send + Sync + 'static {}

impl<T: Clone + Eq + Ord + Hash + Debug + Send + Sync + 'static> CommitId for T {}

/// Bounds required of a diff value.
///
/// Diffs are immutable domain-defined values; the engine only moves them
/// around and feeds them through an [`crate::OtSystem`].
pub trait Diff: Clone + Debug + Send + Sync + 'static {}

impl<T: Clone + Debug + Send + Sync + 'static> Diff for T {}

/// An immutable node of the commit DAG.
///
/// Each parent edge carries the diff sequence that transforms the parent's
/// state into this commit's state. A root commit has no parents; a merge
/// commit has several.
///
/// # Invariants
///
/// - The parent graph induced by all commits is acyclic.
/// - Every non-root commit has at least one parent.
/// - A commit is created once and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit<K: Ord, D> {
    /// Repository-allocated id.
    pub id: K,
    /// Parent id to the diffs leading from that parent to this commit.
    pub parents: BTreeMap<K, Vec<D>>,
    /// Creation time, milliseconds since the epoch. Informational only;
    /// causal order is carried by the parent edges.
    pub timestamp: i64,
    /// Whether a squashed snapshot is stored for this commit.
    pub snapshot: bool,
}

impl<K: Ord, D> Commit<K, D> {
    /// Creates a root commit with no parents.
    pub fn of_root(id: K) -> Self {
        Self {
            id,
            parents: BTreeMap::new(),
            timestamp: 0,
            snapshot: false,
        }
    }

    /// Creates a commit with a single parent.
    pub fn of_commit(id: K, parent: K, diffs: Vec<D>) -> Self {
        let mut parents = BTreeMap::new();
        parents.insert(parent, diffs);
        Self {
            id,
            parents,
            timestamp: 0,
            snapshot: false,
        }
    }

    /// Creates a merge commit with one edge per reconciled head.
    pub fn of_merge(id: K, parents: BTreeMap<K, Vec<D>>) -> Self {
        Self {
            id,
            parents,
            timestamp: 0,
            snapshot: false,
        }
    }

    /// Sets the creation timestamp.
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Marks the commit as snapshotted.
    pub fn with_snapshot(mut self, snapshot: bool) -> Self {
        self.snapshot = snapshot;
        self
    }

    /// Returns true if this commit has no parents.
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    /// Returns true if this commit reconciles more than one parent.
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    /// Iterates over the parent ids.
    pub fn parent_ids(&self) -> impl Iterator<Item = &K> {
        self.parents.keys()
    }
}
