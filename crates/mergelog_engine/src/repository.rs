//! Repository port: the interface to external commit storage.

use crate::error::EngineResult;
use mergelog_protocol::{Commit, CommitId, Diff};
use std::collections::BTreeSet;

/// Asynchronous access to a shared commit store.
///
/// The store is externally synchronized and accessed concurrently by many
/// replicas; the engine never assumes exclusive write access. Implementations
/// back this with SQL tables, HTTP endpoints or in-memory stubs.
///
/// # Contract
///
/// - `create_id` never returns an id that collides with an existing one.
/// - `push` is idempotent per commit id: re-pushing a stored commit is a
///   no-op, not an error.
/// - A failed call has no partial side effects; retrying the same logical
///   operation is always safe.
#[allow(async_fn_in_trait)]
pub trait Repository<K: CommitId, D: Diff>: Send + Sync {
    /// Allocates a fresh, globally unique commit id.
    async fn create_id(&self) -> EngineResult<K>;

    /// Durably stores the given commits.
    async fn push(&self, commits: Vec<Commit<K, D>>) -> EngineResult<()>;

    /// Returns the current frontier: ids with no recorded child.
    async fn get_heads(&self) -> EngineResult<BTreeSet<K>>;

    /// Loads one commit by id. Fails with `NotFound` if unknown.
    async fn load_commit(&self, id: &K) -> EngineResult<Commit<K, D>>;

    /// Stores a squashed diff sequence reaching the given commit.
    async fn save_snapshot(&self, id: K, diffs: Vec<D>) -> EngineResult<()>;

    /// Loads the snapshot stored for the given commit.
    async fn load_snapshot(&self, id: &K) -> EngineResult<Vec<D>>;

    /// Returns true if a snapshot is stored for the given commit.
    async fn is_snapshot(&self, id: &K) -> EngineResult<bool>;
}
