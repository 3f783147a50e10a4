//! In-memory repository stub.

use mergelog_engine::{EngineError, EngineResult, Repository};
use mergelog_protocol::{Commit, Diff};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// A commit store living entirely in memory, with sequential `u64` ids.
///
/// Latency and failure can be injected so tests can interleave in-flight
/// pushes with local mutation: a configured push delay completes the store
/// first and delays only the acknowledgement, the way a slow network
/// would.
pub struct MemoryRepository<D> {
    store: Mutex<Store<D>>,
    next_id: AtomicU64,
    push_delay: Mutex<Option<Duration>>,
    fail_pushes: AtomicBool,
}

struct Store<D> {
    commits: HashMap<u64, Commit<u64, D>>,
    snapshots: HashMap<u64, Vec<D>>,
}

impl<D: Diff> MemoryRepository<D> {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self {
            store: Mutex::new(Store {
                commits: HashMap::new(),
                snapshots: HashMap::new(),
            }),
            next_id: AtomicU64::new(0),
            push_delay: Mutex::new(None),
            fail_pushes: AtomicBool::new(false),
        }
    }

    /// Delays push acknowledgement by the given duration.
    pub fn with_push_delay(self, delay: Duration) -> Self {
        *self.push_delay.lock() = Some(delay);
        self
    }

    /// Makes subsequent pushes fail with a retryable error until reset.
    pub fn set_failing_pushes(&self, failing: bool) {
        self.fail_pushes.store(failing, Ordering::SeqCst);
    }

    /// Allocates the root commit and stores it. Returns its id.
    pub async fn bootstrap_root(&self) -> EngineResult<u64> {
        let id = self.create_id().await?;
        self.push(vec![Commit::of_root(id)]).await?;
        Ok(id)
    }

    /// Number of stored commits.
    pub fn commit_count(&self) -> usize {
        self.store.lock().commits.len()
    }
}

impl<D: Diff> Default for MemoryRepository<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Diff> Repository<u64, D> for MemoryRepository<D> {
    async fn create_id(&self) -> EngineResult<u64> {
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn push(&self, commits: Vec<Commit<u64, D>>) -> EngineResult<()> {
        if self.fail_pushes.load(Ordering::SeqCst) {
            return Err(EngineError::repository_retryable("injected push failure"));
        }
        {
            let mut store = self.store.lock();
            for commit in commits {
                // Ids handed out explicitly (e.g. by a graph builder) must
                // not be reallocated.
                self.next_id.fetch_max(commit.id + 1, Ordering::SeqCst);
                store.commits.entry(commit.id).or_insert(commit);
            }
        }
        let delay = *self.push_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn get_heads(&self) -> EngineResult<BTreeSet<u64>> {
        let store = self.store.lock();
        let referenced: HashSet<u64> = store
            .commits
            .values()
            .flat_map(|commit| commit.parent_ids().copied())
            .collect();
        Ok(store
            .commits
            .keys()
            .filter(|id| !referenced.contains(id))
            .copied()
            .collect())
    }

    async fn load_commit(&self, id: &u64) -> EngineResult<Commit<u64, D>> {
        let store = self.store.lock();
        let commit = store
            .commits
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(id))?;
        let snapshot = store.snapshots.contains_key(id);
        Ok(commit.with_snapshot(snapshot))
    }

    async fn save_snapshot(&self, id: u64, diffs: Vec<D>) -> EngineResult<()> {
        self.store.lock().snapshots.insert(id, diffs);
        Ok(())
    }

    async fn load_snapshot(&self, id: &u64) -> EngineResult<Vec<D>> {
        self.store
            .lock()
            .snapshots
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(id))
    }

    async fn is_snapshot(&self, id: &u64) -> EngineResult<bool> {
        Ok(self.store.lock().snapshots.contains_key(id))
    }
}
