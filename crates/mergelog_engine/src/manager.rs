//! Per-replica client state machine.

use crate::algorithms::{now_millis, GraphAlgorithms, ListReducer};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::graph::LoadedGraph;
use crate::repository::Repository;
use mergelog_protocol::{Commit, CommitId, Diff, OtSystem, TransformConflict, Transformed};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, trace};

/// The application-side materialized state diffs are applied to.
pub trait Projection<D>: Send {
    /// Applies one diff to the state.
    fn apply(&mut self, diff: &D);
}

/// Lifecycle phase of a [`StateManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerPhase {
    /// Constructed, not yet checked out.
    Created,
    /// Checked out and accepting operations.
    Started,
    /// Shut down; all operations are rejected.
    Stopped,
}

/// Counters describing a replica's activity.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Commits created locally.
    pub commits: u64,
    /// Successful pushes.
    pub pushes: u64,
    /// Successful fetches.
    pub fetches: u64,
    /// Successful rebases (including the rebase half of pulls).
    pub rebases: u64,
    /// Transform conflicts surfaced.
    pub conflicts: u64,
    /// Last error message, if any.
    pub last_error: Option<String>,
}

struct Inner<K: Ord, D, P> {
    phase: ManagerPhase,
    /// The remote commit the projection is based on, below any pending
    /// commits and working diffs.
    revision: Option<K>,
    /// Diffs applied locally but not yet wrapped into a commit.
    working: Vec<D>,
    /// Locally created commits not yet acknowledged as pushed. Always a
    /// linear single-parent chain rooted at `revision`.
    pending: VecDeque<Commit<K, D>>,
    graph: LoadedGraph<K, D>,
    /// Reconciliation target discovered by the last fetch.
    fetched: Option<K>,
    fetching: bool,
    projection: P,
}

impl<K: CommitId, D: Diff, P> Inner<K, D, P> {
    fn require_phase(&self, expected: ManagerPhase, operation: &'static str) -> EngineResult<()> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(EngineError::InvalidPhase {
                operation,
                phase: format!("{:?}", self.phase),
            })
        }
    }
}

/// Drives one replica: holds the projection, the working diffs and the
/// pending commit chain, and orchestrates checkout, commit, push, fetch,
/// pull and rebase against the repository.
///
/// All local state is owned exclusively by this instance and mutated under
/// a single mutex, so the effects of interleaved asynchronous operations
/// are applied in the order the operations logically complete.
pub struct StateManager<K, D, S, R, P>
where
    K: CommitId,
    D: Diff,
    S: OtSystem<D>,
    R: Repository<K, D>,
    P: Projection<D>,
{
    algorithms: GraphAlgorithms<K, D, S, R>,
    config: EngineConfig,
    inner: Mutex<Inner<K, D, P>>,
    stats: RwLock<EngineStats>,
}

impl<K, D, S, R, P> StateManager<K, D, S, R, P>
where
    K: CommitId,
    D: Diff,
    S: OtSystem<D>,
    R: Repository<K, D>,
    P: Projection<D>,
{
    /// Creates a replica over the given diff system, repository and
    /// projection. Call [`StateManager::start`] before anything else.
    pub fn new(system: Arc<S>, repository: Arc<R>, config: EngineConfig, projection: P) -> Self {
        Self {
            algorithms: GraphAlgorithms::new(system, repository),
            config,
            inner: Mutex::new(Inner {
                phase: ManagerPhase::Created,
                revision: None,
                working: Vec::new(),
                pending: VecDeque::new(),
                graph: LoadedGraph::new(),
                fetched: None,
                fetching: false,
                projection,
            }),
            stats: RwLock::new(EngineStats::default()),
        }
    }

    /// Returns the current lifecycle phase.
    pub fn phase(&self) -> ManagerPhase {
        self.inner.lock().phase
    }

    /// Returns a copy of the activity counters.
    pub fn stats(&self) -> EngineStats {
        self.stats.read().clone()
    }

    /// The revision the projection is based on.
    pub fn revision(&self) -> Option<K> {
        self.inner.lock().revision.clone()
    }

    /// Diffs applied locally but not yet committed.
    pub fn working_diffs(&self) -> Vec<D> {
        self.inner.lock().working.clone()
    }

    /// Number of locally created commits awaiting push acknowledgement.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Number of nodes currently held in the loaded graph cache.
    pub fn loaded_nodes(&self) -> usize {
        self.inner.lock().graph.len()
    }

    /// Reads the projection under the state lock.
    pub fn with_projection<T>(&self, f: impl FnOnce(&P) -> T) -> T {
        f(&self.inner.lock().projection)
    }

    /// Performs the initial checkout: loads the current heads, reduces the
    /// history from the nearest snapshot or root, applies it to the
    /// projection and transitions to `Started`.
    ///
    /// If the repository frontier is branched, the heads are merged and the
    /// merge commit published first.
    pub async fn start(&self) -> EngineResult<()> {
        self.inner.lock().require_phase(ManagerPhase::Created, "start")?;

        let mut graph = LoadedGraph::new();
        let target = self.algorithms.merged_head(&mut graph).await?;
        let changes = self.algorithms.load_all_changes(&target).await?;

        let mut inner = self.inner.lock();
        inner.require_phase(ManagerPhase::Created, "start")?;
        for diff in &changes {
            inner.projection.apply(diff);
        }
        inner.graph = graph;
        inner.revision = Some(target.clone());
        inner.phase = ManagerPhase::Started;
        debug!(revision = ?target, diffs = changes.len(), "checked out");
        Ok(())
    }

    /// Rejects further operations. Queued pending commits are kept for
    /// inspection; they are not pushed.
    pub fn stop(&self) {
        self.inner.lock().phase = ManagerPhase::Stopped;
    }

    /// Appends a diff to the working set and applies it to the projection
    /// immediately. No network I/O.
    pub fn add(&self, diff: D) -> EngineResult<()> {
        self.add_all(vec![diff])
    }

    /// Appends several diffs to the working set.
    pub fn add_all(&self, diffs: Vec<D>) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        inner.require_phase(ManagerPhase::Started, "add")?;
        for diff in diffs {
            inner.projection.apply(&diff);
            inner.working.push(diff);
        }
        Ok(())
    }

    /// Wraps the working diffs into a commit parented on the last known
    /// head (the last pending commit, or the current revision) and appends
    /// it to the pending chain.
    ///
    /// Returns the new commit's id, or `None` if there was nothing to
    /// commit. Safe to call while a push is in flight; the new commit is
    /// simply included in the next push.
    pub async fn commit(&self) -> EngineResult<Option<K>> {
        {
            let inner = self.inner.lock();
            inner.require_phase(ManagerPhase::Started, "commit")?;
            if inner.working.is_empty() {
                return Ok(None);
            }
        }

        let id = self.algorithms.repository().create_id().await?;

        let mut inner = self.inner.lock();
        inner.require_phase(ManagerPhase::Started, "commit")?;
        let system = self.algorithms.system();
        let diffs = system.squash(std::mem::take(&mut inner.working));
        if system.is_no_op(&diffs) {
            return Ok(None);
        }
        let parent = inner
            .pending
            .back()
            .map(|commit| commit.id.clone())
            .or_else(|| inner.revision.clone())
            .ok_or_else(|| {
                EngineError::InvariantViolation("started manager has no revision".into())
            })?;
        let commit = Commit::of_commit(id.clone(), parent, diffs).with_timestamp(now_millis());
        trace!(id = ?id, "created local commit");
        inner.pending.push_back(commit);
        self.stats.write().commits += 1;
        Ok(Some(id))
    }

    /// Sends the pending chain to the repository.
    ///
    /// On success the pushed commits leave the pending chain and the
    /// revision advances past them. On failure they stay pending, so a
    /// later retry resumes exactly where this call left off. Tolerates
    /// being invoked while a previous push is still in flight: per-commit
    /// idempotency in the repository makes double-sending harmless.
    pub async fn push(&self) -> EngineResult<()> {
        let commits: Vec<Commit<K, D>> = {
            let inner = self.inner.lock();
            inner.require_phase(ManagerPhase::Started, "push")?;
            inner.pending.iter().cloned().collect()
        };
        if commits.is_empty() {
            return Ok(());
        }

        let pushed: HashSet<K> = commits.iter().map(|c| c.id.clone()).collect();
        if let Err(err) = self.algorithms.repository().push(commits).await {
            self.stats.write().last_error = Some(err.to_string());
            return Err(err);
        }

        let mut inner = self.inner.lock();
        while let Some(commit) = inner.pending.pop_front() {
            if !pushed.contains(&commit.id) {
                inner.pending.push_front(commit);
                break;
            }
            for (parent, diffs) in &commit.parents {
                inner
                    .graph
                    .add_edge(commit.id.clone(), parent.clone(), diffs.clone());
            }
            inner.revision = Some(commit.id);
        }
        debug!(pushed = pushed.len(), pending = inner.pending.len(), "push acknowledged");
        self.stats.write().pushes += 1;
        Ok(())
    }

    /// Brings the remote frontier into the loaded graph without touching
    /// the projection or the working diffs. A branched frontier is merged
    /// and the merge commit published.
    pub async fn fetch(&self) -> EngineResult<()> {
        let mut graph = {
            let mut inner = self.inner.lock();
            inner.require_phase(ManagerPhase::Started, "fetch")?;
            if inner.fetching {
                return Err(EngineError::InvalidPhase {
                    operation: "fetch",
                    phase: "Fetching".into(),
                });
            }
            inner.fetching = true;
            std::mem::take(&mut inner.graph)
        };

        let outcome = self.algorithms.merged_head(&mut graph).await;

        let mut inner = self.inner.lock();
        inner.graph = graph;
        inner.fetching = false;
        match outcome {
            Ok(target) => {
                trace!(target = ?target, "fetched");
                inner.fetched = Some(target);
                drop(inner);
                self.stats.write().fetches += 1;
                Ok(())
            }
            Err(err) => {
                drop(inner);
                self.stats.write().last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Fetches and then reconciles; see [`StateManager::rebase`].
    pub async fn pull(&self) -> EngineResult<()> {
        self.fetch().await?;
        self.rebase()
    }

    /// Reconciles the projection with the last fetched target.
    ///
    /// Remote diffs from the current revision to the target are transformed
    /// against the pending chain and the working diffs; the rebased remote
    /// diffs are applied to the projection, the pending commits are
    /// re-parented onto the target, and the working diffs are replaced with
    /// their rebased form. All in-memory; no network I/O.
    ///
    /// A transform conflict leaves the projection, the working diffs and
    /// the pending chain untouched.
    pub fn rebase(&self) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        inner.require_phase(ManagerPhase::Started, "rebase")?;
        let Some(target) = inner.fetched.clone() else {
            return Ok(());
        };

        // Pending commits already visible in the fetched graph have been
        // durably stored; treat them as acknowledged.
        while let Some(commit) = inner.pending.pop_front() {
            if !inner.graph.is_loaded(&commit.id) {
                inner.pending.push_front(commit);
                break;
            }
            inner.revision = Some(commit.id);
        }

        let revision = inner.revision.clone().ok_or_else(|| {
            EngineError::InvariantViolation("started manager has no revision".into())
        })?;
        if revision == target {
            inner.fetched = None;
            return Ok(());
        }

        let heads: BTreeSet<K> = [target.clone()].into();
        let mut reduced =
            self.algorithms
                .reduce_edges(&inner.graph, &heads, &revision, &ListReducer)?;
        let system = self.algorithms.system().clone();
        let remote = system.squash(reduced.remove(&target).unwrap_or_default());

        // Compute every transform before mutating anything, so a conflict
        // leaves the replica untouched.
        let outcome = (|| -> Result<(Vec<Commit<K, D>>, Transformed<D>), TransformConflict> {
            let mut remote = remote;
            let mut rebased: Vec<Commit<K, D>> = Vec::with_capacity(inner.pending.len());
            let mut parent = target.clone();
            for commit in &inner.pending {
                let diffs = commit
                    .parents
                    .values()
                    .next()
                    .cloned()
                    .unwrap_or_default();
                let transformed = system.transform(&diffs, &remote)?;
                rebased.push(
                    Commit::of_commit(
                        commit.id.clone(),
                        parent.clone(),
                        system.squash(transformed.left),
                    )
                    .with_timestamp(commit.timestamp),
                );
                parent = commit.id.clone();
                remote = transformed.right;
            }
            let transformed = system.transform(&inner.working, &remote)?;
            Ok((rebased, transformed))
        })();

        let (rebased, transformed) = match outcome {
            Ok(result) => result,
            Err(conflict) => {
                let mut stats = self.stats.write();
                stats.conflicts += 1;
                stats.last_error = Some(conflict.to_string());
                return Err(EngineError::TransformConflict(conflict));
            }
        };

        for diff in &transformed.right {
            inner.projection.apply(diff);
        }
        inner.working = system.squash(transformed.left);
        inner.pending = rebased.into();
        inner.revision = Some(target.clone());
        inner.fetched = None;
        if let Some(depth) = self.config.prune_depth {
            inner.graph.clean_up(depth)?;
        }
        debug!(revision = ?target, "rebased onto fetched target");
        self.stats.write().rebases += 1;
        Ok(())
    }

    /// Squashes the history up to the current revision into a snapshot.
    pub async fn checkpoint(&self) -> EngineResult<()> {
        let revision = {
            let inner = self.inner.lock();
            inner.require_phase(ManagerPhase::Started, "checkpoint")?;
            inner.revision.clone().ok_or_else(|| {
                EngineError::InvariantViolation("started manager has no revision".into())
            })?
        };
        self.algorithms.checkpoint(&revision).await
    }
}
