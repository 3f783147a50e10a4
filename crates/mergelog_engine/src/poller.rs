//! Duplicate-suppressing head polling.

use crate::error::EngineResult;
use crate::repository::Repository;
use mergelog_protocol::{CommitId, Diff};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Polls the repository frontier, yielding only when it changed.
///
/// Repeated identical `get_heads` answers are swallowed with a fixed delay
/// between attempts, so callers can drive pull loops without hammering the
/// repository. Retry-on-failure stays the caller's policy: a transport
/// error is surfaced, not retried.
pub struct HeadPoller<K, D, R>
where
    K: CommitId,
    D: Diff,
    R: Repository<K, D>,
{
    repository: Arc<R>,
    yield_interval: Duration,
    last: Mutex<Option<BTreeSet<K>>>,
    _marker: PhantomData<fn() -> D>,
}

impl<K, D, R> HeadPoller<K, D, R>
where
    K: CommitId,
    D: Diff,
    R: Repository<K, D>,
{
    /// Delay between polls when the frontier has not moved.
    pub const DEFAULT_YIELD_INTERVAL: Duration = Duration::from_millis(1000);

    /// Creates a poller over the repository.
    pub fn new(repository: Arc<R>) -> Self {
        Self {
            repository,
            yield_interval: Self::DEFAULT_YIELD_INTERVAL,
            last: Mutex::new(None),
            _marker: PhantomData,
        }
    }

    /// Sets the delay between unchanged polls.
    pub fn with_yield_interval(mut self, yield_interval: Duration) -> Self {
        self.yield_interval = yield_interval;
        self
    }

    /// Waits until `get_heads` returns a frontier different from the last
    /// one this poller observed, and returns it.
    pub async fn poll(&self) -> EngineResult<BTreeSet<K>> {
        loop {
            let heads = self.repository.get_heads().await?;
            {
                let mut last = self.last.lock();
                if last.as_ref() != Some(&heads) {
                    *last = Some(heads.clone());
                    return Ok(heads);
                }
            }
            trace!("frontier unchanged, yielding");
            tokio::time::sleep(self.yield_interval).await;
        }
    }
}
