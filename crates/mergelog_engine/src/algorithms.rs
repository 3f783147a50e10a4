//! Graph algorithms over the repository and the loaded graph.

use crate::error::{EngineError, EngineResult};
use crate::graph::LoadedGraph;
use crate::repository::Repository;
use mergelog_protocol::{Commit, CommitId, Diff, OtSystem};
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, HashSet, VecDeque};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, trace};

/// Strategy controlling how per-edge diffs fold into a running accumulator
/// during [`GraphAlgorithms::reduce_edges`].
pub trait DiffsReducer<D, A> {
    /// The accumulator for an empty path.
    fn initial(&self) -> A;

    /// Folds one parent edge in front of an accumulated suffix.
    fn accumulate(&self, acc: A, edge: &[D]) -> A;

    /// Combines two accumulations that met at a common ancestor. Both
    /// describe the same state change; the strategy picks which to keep.
    fn combine(&self, a: A, b: A) -> A;
}

/// Accumulates the plain diff sequence along the path.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListReducer;

impl<D: Diff> DiffsReducer<D, Vec<D>> for ListReducer {
    fn initial(&self) -> Vec<D> {
        Vec::new()
    }

    fn accumulate(&self, acc: Vec<D>, edge: &[D]) -> Vec<D> {
        let mut path = Vec::with_capacity(edge.len() + acc.len());
        path.extend_from_slice(edge);
        path.extend(acc);
        path
    }

    fn combine(&self, a: Vec<D>, b: Vec<D>) -> Vec<D> {
        if b.len() < a.len() {
            b
        } else {
            a
        }
    }
}

/// Counts the diffs along the path instead of materializing them.
#[derive(Debug, Clone, Copy, Default)]
pub struct CountReducer;

impl<D: Diff> DiffsReducer<D, u64> for CountReducer {
    fn initial(&self) -> u64 {
        0
    }

    fn accumulate(&self, acc: u64, edge: &[D]) -> u64 {
        acc + edge.len() as u64
    }

    fn combine(&self, a: u64, b: u64) -> u64 {
        a.min(b)
    }
}

/// Graph-loading, reduction and merge over a repository.
pub struct GraphAlgorithms<K, D, S, R>
where
    K: CommitId,
    D: Diff,
    S: OtSystem<D>,
    R: Repository<K, D>,
{
    system: Arc<S>,
    repository: Arc<R>,
    _marker: PhantomData<fn() -> (K, D)>,
}

impl<K, D, S, R> GraphAlgorithms<K, D, S, R>
where
    K: CommitId,
    D: Diff,
    S: OtSystem<D>,
    R: Repository<K, D>,
{
    /// Creates the algorithm driver over a diff system and a repository.
    pub fn new(system: Arc<S>, repository: Arc<R>) -> Self {
        Self {
            system,
            repository,
            _marker: PhantomData,
        }
    }

    /// The diff system driving transforms and squashes.
    pub fn system(&self) -> &Arc<S> {
        &self.system
    }

    /// The repository commits are loaded from.
    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    /// Extends `graph` until every id reachable from `heads` is loaded,
    /// a known node of `graph`, or a walk boundary (root or snapshotted
    /// commit).
    ///
    /// Re-invoking with a previously returned graph and a new head set
    /// loads only the newly reachable region.
    pub async fn load_graph(
        &self,
        heads: &BTreeSet<K>,
        graph: &mut LoadedGraph<K, D>,
    ) -> EngineResult<()> {
        self.load_graph_inner(heads, graph, true).await
    }

    async fn load_graph_inner(
        &self,
        heads: &BTreeSet<K>,
        graph: &mut LoadedGraph<K, D>,
        stop_at_snapshots: bool,
    ) -> EngineResult<()> {
        let mut queue: VecDeque<K> = heads.iter().cloned().collect();
        let mut loaded = 0usize;

        while let Some(id) = queue.pop_front() {
            if graph.is_loaded(&id) {
                continue;
            }
            let commit = self.repository.load_commit(&id).await?;
            loaded += 1;
            if commit.is_root() || (stop_at_snapshots && commit.snapshot) {
                trace!(id = ?id, snapshot = commit.snapshot, "graph walk boundary");
                graph.add_root(id);
                continue;
            }
            for (parent, diffs) in commit.parents {
                if !graph.is_loaded(&parent) {
                    queue.push_back(parent.clone());
                }
                graph.add_edge(id.clone(), parent, diffs);
            }
        }

        debug!(loaded, nodes = graph.len(), "graph load finished");
        Ok(())
    }

    /// For each head, folds the edge diffs of every path from `base` into
    /// a single accumulated value.
    ///
    /// Nodes are visited in strictly decreasing level order, so each node's
    /// accumulator is final before it is folded into any parent; two paths
    /// meeting at a common ancestor are combined through the reducer. The
    /// result is therefore independent of traversal order.
    pub fn reduce_edges<A: Clone>(
        &self,
        graph: &LoadedGraph<K, D>,
        heads: &BTreeSet<K>,
        base: &K,
        reducer: &impl DiffsReducer<D, A>,
    ) -> EngineResult<HashMap<K, A>> {
        let levels = graph.levels()?;
        let base_level = *levels
            .get(base)
            .ok_or_else(|| EngineError::not_found(base))?;

        // Per-node accumulators keyed by head, folded backwards from the
        // heads towards the base.
        let mut acc: HashMap<K, BTreeMap<K, A>> = HashMap::new();
        let mut heap: BinaryHeap<(u64, K)> = BinaryHeap::new();
        let mut scheduled: HashSet<K> = HashSet::new();

        for head in heads {
            let level = *levels
                .get(head)
                .ok_or_else(|| EngineError::not_found(head))?;
            acc.entry(head.clone())
                .or_default()
                .insert(head.clone(), reducer.initial());
            if scheduled.insert(head.clone()) {
                heap.push((level, head.clone()));
            }
        }

        while let Some((level, id)) = heap.pop() {
            if id == *base || level <= base_level {
                continue;
            }
            let Some(reached) = acc.remove(&id) else {
                continue;
            };
            let Some(edges) = graph.parent_edges(&id) else {
                continue;
            };
            for (parent, edge_diffs) in edges {
                let parent_acc = acc.entry(parent.clone()).or_default();
                for (head, suffix) in &reached {
                    let candidate = reducer.accumulate(suffix.clone(), edge_diffs);
                    match parent_acc.remove(head) {
                        Some(existing) => {
                            parent_acc
                                .insert(head.clone(), reducer.combine(existing, candidate));
                        }
                        None => {
                            parent_acc.insert(head.clone(), candidate);
                        }
                    }
                }
                if scheduled.insert(parent.clone()) {
                    heap.push((levels[parent], parent.clone()));
                }
            }
        }

        let reduced = acc.remove(base).unwrap_or_default();
        let mut result = HashMap::new();
        for head in heads {
            let value = reduced.get(head).cloned().ok_or_else(|| {
                EngineError::InvariantViolation(format!(
                    "head {head:?} has no loaded path to base {base:?}"
                ))
            })?;
            result.insert(head.clone(), value);
        }
        Ok(result)
    }

    /// Reconciles N divergent heads: returns, per head, the squashed diffs
    /// that move that head's state to the common merged state.
    ///
    /// Heads are folded pairwise through [`OtSystem::transform`] in
    /// ascending id order, so every replica derives the same merged state.
    pub fn merge_heads(
        &self,
        graph: &LoadedGraph<K, D>,
        heads: &BTreeSet<K>,
    ) -> EngineResult<HashMap<K, Vec<D>>> {
        if heads.len() <= 1 {
            return Ok(heads
                .iter()
                .map(|head| (head.clone(), Vec::new()))
                .collect());
        }

        let base = self.find_common_ancestor(graph, heads)?;
        trace!(base = ?base, heads = heads.len(), "merging divergent heads");
        let mut from_base: HashMap<K, Vec<D>> =
            self.reduce_edges(graph, heads, &base, &ListReducer)?;

        let mut merged: Vec<D> = Vec::new();
        let mut to_merged: HashMap<K, Vec<D>> = HashMap::new();
        for (index, head) in heads.iter().enumerate() {
            let branch = self
                .system
                .squash(from_base.remove(head).unwrap_or_default());
            if index == 0 {
                merged = branch;
                to_merged.insert(head.clone(), Vec::new());
                continue;
            }
            let transformed = self.system.transform(&merged, &branch)?;
            for rebased in to_merged.values_mut() {
                rebased.extend(transformed.right.iter().cloned());
            }
            to_merged.insert(head.clone(), transformed.left);
            merged.extend(transformed.right);
            merged = self.system.squash(merged);
        }

        for rebased in to_merged.values_mut() {
            *rebased = self.system.squash(std::mem::take(rebased));
        }
        Ok(to_merged)
    }

    /// Merges the given heads and publishes the resulting merge commit.
    pub async fn merge_and_push(
        &self,
        graph: &LoadedGraph<K, D>,
        heads: &BTreeSet<K>,
    ) -> EngineResult<Commit<K, D>> {
        let to_merged = self.merge_heads(graph, heads)?;
        let id = self.repository.create_id().await?;
        let parents: BTreeMap<K, Vec<D>> = to_merged.into_iter().collect();
        let commit = Commit::of_merge(id, parents).with_timestamp(now_millis());
        debug!(id = ?commit.id, parents = commit.parents.len(), "pushing merge commit");
        self.repository.push(vec![commit.clone()]).await?;
        Ok(commit)
    }

    /// Loads the current frontier into `graph` and returns the single
    /// commit to reconcile onto, merging and publishing a merge commit
    /// first if the frontier is branched.
    pub async fn merged_head(&self, graph: &mut LoadedGraph<K, D>) -> EngineResult<K> {
        let heads = self.repository.get_heads().await?;
        self.load_graph(&heads, graph).await?;
        if heads.len() > 1 {
            let merge = self.merge_and_push(graph, &heads).await?;
            for (parent, diffs) in &merge.parents {
                graph.add_edge(merge.id.clone(), parent.clone(), diffs.clone());
            }
            return Ok(merge.id);
        }
        heads.into_iter().next().ok_or_else(|| {
            EngineError::InvariantViolation("repository has no heads".into())
        })
    }

    /// Loads the full squashed change history leading to `id`: the nearest
    /// snapshot's diffs (if any) followed by the reduced edge diffs from
    /// that boundary.
    pub async fn load_all_changes(&self, id: &K) -> EngineResult<Vec<D>> {
        let heads: BTreeSet<K> = [id.clone()].into();
        let mut graph = LoadedGraph::new();
        self.load_graph_inner(&heads, &mut graph, true).await?;
        let mut roots = graph.roots();

        if roots.len() > 1 {
            // A snapshot bounded only part of the ancestry; walk the whole
            // history instead.
            graph = LoadedGraph::new();
            self.load_graph_inner(&heads, &mut graph, false).await?;
            roots = graph.roots();
        }
        if roots.len() > 1 {
            return Err(EngineError::InvariantViolation(format!(
                "history of {id:?} reaches {} distinct roots",
                roots.len()
            )));
        }
        let Some(root) = roots.into_iter().next() else {
            return Err(EngineError::not_found(id));
        };

        let mut changes = if self.repository.is_snapshot(&root).await? {
            self.repository.load_snapshot(&root).await?
        } else {
            Vec::new()
        };
        let mut reduced = self.reduce_edges(&graph, &heads, &root, &ListReducer)?;
        changes.extend(reduced.remove(id).unwrap_or_default());
        Ok(self.system.squash(changes))
    }

    /// Squashes the history up to `id` and stores it as a snapshot,
    /// bounding later graph walks.
    pub async fn checkpoint(&self, id: &K) -> EngineResult<()> {
        let changes = self.load_all_changes(id).await?;
        debug!(id = ?id, diffs = changes.len(), "saving snapshot");
        self.repository.save_snapshot(id.clone(), changes).await
    }

    fn find_common_ancestor(
        &self,
        graph: &LoadedGraph<K, D>,
        heads: &BTreeSet<K>,
    ) -> EngineResult<K> {
        let levels = graph.levels()?;
        let mut reach_count: HashMap<K, usize> = HashMap::new();

        for head in heads {
            let mut visited: HashSet<K> = HashSet::new();
            let mut queue: VecDeque<K> = VecDeque::new();
            visited.insert(head.clone());
            queue.push_back(head.clone());
            while let Some(id) = queue.pop_front() {
                *reach_count.entry(id.clone()).or_insert(0) += 1;
                let Some(edges) = graph.parent_edges(&id) else {
                    continue;
                };
                for parent in edges.keys() {
                    if visited.insert(parent.clone()) {
                        queue.push_back(parent.clone());
                    }
                }
            }
        }

        reach_count
            .into_iter()
            .filter(|(_, count)| *count == heads.len())
            .map(|(id, _)| id)
            .max_by_key(|id| (levels.get(id).copied().unwrap_or(0), id.clone()))
            .ok_or_else(|| {
                EngineError::InvariantViolation(format!(
                    "heads {heads:?} share no loaded common ancestor"
                ))
            })
    }
}

pub(crate) fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
