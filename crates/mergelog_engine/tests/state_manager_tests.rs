//! Replica state machine scenarios.

use mergelog_engine::{EngineConfig, EngineError, ManagerPhase, Repository, StateManager};
use mergelog_protocol::Commit;
use mergelog_testkit::{
    add, init_tracing, set, CounterOp, CounterState, CounterSystem, MemoryRepository,
};
use std::sync::Arc;
use std::time::Duration;

type Manager = StateManager<u64, CounterOp, CounterSystem, MemoryRepository<CounterOp>, CounterState>;

async fn started(repo: &Arc<MemoryRepository<CounterOp>>, system: CounterSystem) -> Arc<Manager> {
    init_tracing();
    let manager = Arc::new(StateManager::new(
        Arc::new(system),
        Arc::clone(repo),
        EngineConfig::new(),
        CounterState::new(),
    ));
    manager.start().await.unwrap();
    manager
}

fn value(manager: &Manager) -> i64 {
    manager.with_projection(|state| state.value())
}

async fn seed_chain(repo: &MemoryRepository<CounterOp>, from: u64, count: u64) -> u64 {
    let mut parent = from;
    for _ in 0..count {
        let id = repo.create_id().await.unwrap();
        repo.push(vec![Commit::of_commit(id, parent, vec![add(1)])])
            .await
            .unwrap();
        parent = id;
    }
    parent
}

#[tokio::test]
async fn commits_survive_overlapping_pushes() {
    let repo = Arc::new(
        MemoryRepository::<CounterOp>::new().with_push_delay(Duration::from_millis(100)),
    );
    repo.bootstrap_root().await.unwrap();
    let manager = started(&repo, CounterSystem::new()).await;

    let mut pushes = Vec::new();
    for _ in 0..3 {
        manager.add(add(1)).unwrap();
        manager.commit().await.unwrap().unwrap();
        let handle = Arc::clone(&manager);
        pushes.push(tokio::spawn(async move { handle.push().await }));
    }
    for push in pushes {
        push.await.unwrap().unwrap();
    }

    let heads = repo.get_heads().await.unwrap();
    assert_eq!(heads.len(), 1);
    assert_eq!(manager.pending_count(), 0);

    // The surviving head carries the full accumulated value.
    let fresh = started(&repo, CounterSystem::new()).await;
    assert_eq!(value(&fresh), 3);
}

#[tokio::test]
async fn pull_applies_full_history() {
    let repo = Arc::new(MemoryRepository::<CounterOp>::new());
    let root = repo.bootstrap_root().await.unwrap();
    let manager = started(&repo, CounterSystem::new()).await;

    seed_chain(&repo, root, 5).await;
    assert_eq!(value(&manager), 0);

    manager.pull().await.unwrap();
    assert_eq!(value(&manager), 5);
}

#[tokio::test]
async fn pull_after_interleaved_fetches() {
    let repo = Arc::new(MemoryRepository::<CounterOp>::new());
    let root = repo.bootstrap_root().await.unwrap();
    let manager = started(&repo, CounterSystem::new()).await;

    let middle = seed_chain(&repo, root, 5).await;
    manager.fetch().await.unwrap();
    assert_eq!(value(&manager), 0);

    seed_chain(&repo, middle, 5).await;
    manager.fetch().await.unwrap();
    assert_eq!(value(&manager), 0);

    manager.pull().await.unwrap();
    assert_eq!(value(&manager), 10);
}

#[tokio::test]
async fn local_diffs_survive_pull() {
    let repo = Arc::new(MemoryRepository::<CounterOp>::new());
    let root = repo.bootstrap_root().await.unwrap();
    let manager = started(&repo, CounterSystem::new()).await;

    manager.add(add(1)).unwrap();
    assert_eq!(value(&manager), 1);

    seed_chain(&repo, root, 10).await;
    manager.pull().await.unwrap();

    assert_eq!(value(&manager), 11);
    assert_eq!(manager.working_diffs(), vec![add(1)]);
}

async fn rebase_case(
    remote: CounterOp,
    local: CounterOp,
) -> (i64, Vec<CounterOp>) {
    let repo = Arc::new(MemoryRepository::<CounterOp>::new());
    let root = repo.bootstrap_root().await.unwrap();
    let manager = started(&repo, CounterSystem::new()).await;

    let id = repo.create_id().await.unwrap();
    repo.push(vec![Commit::of_commit(id, root, vec![remote])])
        .await
        .unwrap();
    manager.fetch().await.unwrap();
    assert_eq!(value(&manager), 0);

    manager.add(local).unwrap();
    manager.rebase().unwrap();
    (value(&manager), manager.working_diffs())
}

#[tokio::test]
async fn rebase_resolves_competing_sets_towards_the_smaller() {
    let (projected, working) = rebase_case(set(0, 10), set(0, 15)).await;
    assert_eq!(projected, 10);
    assert!(working.is_empty());

    let (projected, working) = rebase_case(set(0, 15), set(0, 10)).await;
    assert_eq!(projected, 10);
    assert_eq!(working, vec![set(15, 10)]);
}

#[tokio::test]
async fn rebase_keeps_a_local_add_over_a_remote_set() {
    let (projected, working) = rebase_case(set(0, 10), add(5)).await;
    assert_eq!(projected, 15);
    assert_eq!(working, vec![add(5)]);
}

#[tokio::test]
async fn rebase_keeps_a_local_set_over_a_remote_add() {
    let (projected, working) = rebase_case(add(5), set(0, 10)).await;
    assert_eq!(projected, 15);
    assert_eq!(working, vec![set(5, 15)]);
}

#[tokio::test]
async fn rebase_commutes_concurrent_adds() {
    let (projected, working) = rebase_case(add(10), add(5)).await;
    assert_eq!(projected, 15);
    assert_eq!(working, vec![add(5)]);
}

#[tokio::test]
async fn conflict_leaves_the_replica_untouched() {
    let repo = Arc::new(MemoryRepository::<CounterOp>::new());
    let root = repo.bootstrap_root().await.unwrap();
    let manager = started(&repo, CounterSystem::strict()).await;

    let id = repo.create_id().await.unwrap();
    repo.push(vec![Commit::of_commit(id, root, vec![set(0, 10)])])
        .await
        .unwrap();
    manager.fetch().await.unwrap();

    manager.add(set(0, 15)).unwrap();
    let err = manager.rebase().unwrap_err();
    assert!(matches!(err, EngineError::TransformConflict(_)));

    assert_eq!(value(&manager), 15);
    assert_eq!(manager.working_diffs(), vec![set(0, 15)]);
    assert_eq!(manager.revision(), Some(root));
    assert_eq!(manager.stats().conflicts, 1);

    // The fetched divergence is still there; retrying hits it again.
    assert!(manager.rebase().is_err());
}

#[tokio::test]
async fn failed_push_keeps_the_pending_chain() {
    let repo = Arc::new(MemoryRepository::<CounterOp>::new());
    repo.bootstrap_root().await.unwrap();
    let manager = started(&repo, CounterSystem::new()).await;

    manager.add(add(7)).unwrap();
    let id = manager.commit().await.unwrap().unwrap();

    repo.set_failing_pushes(true);
    let err = manager.push().await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(manager.pending_count(), 1);

    repo.set_failing_pushes(false);
    manager.push().await.unwrap();
    assert_eq!(manager.pending_count(), 0);
    assert_eq!(manager.revision(), Some(id));

    assert_eq!(repo.get_heads().await.unwrap(), [id].into());
}

#[tokio::test]
async fn two_replicas_converge() {
    let repo = Arc::new(MemoryRepository::<CounterOp>::new());
    repo.bootstrap_root().await.unwrap();
    let replica_a = started(&repo, CounterSystem::new()).await;
    let replica_b = started(&repo, CounterSystem::new()).await;

    replica_a.add(set(0, 10)).unwrap();
    replica_a.commit().await.unwrap();
    replica_a.push().await.unwrap();

    replica_b.add(add(5)).unwrap();
    replica_b.pull().await.unwrap();
    assert_eq!(value(&replica_b), 15);
    assert_eq!(replica_b.working_diffs(), vec![add(5)]);

    replica_b.commit().await.unwrap();
    replica_b.push().await.unwrap();

    replica_a.pull().await.unwrap();
    assert_eq!(value(&replica_a), 15);
}

#[tokio::test]
async fn pending_commits_reparent_onto_the_pulled_head() {
    let repo = Arc::new(MemoryRepository::<CounterOp>::new());
    let root = repo.bootstrap_root().await.unwrap();
    let manager = started(&repo, CounterSystem::new()).await;

    let remote_id = repo.create_id().await.unwrap();
    repo.push(vec![Commit::of_commit(remote_id, root, vec![set(0, 10)])])
        .await
        .unwrap();

    manager.add(add(5)).unwrap();
    let local_id = manager.commit().await.unwrap().unwrap();

    manager.pull().await.unwrap();
    assert_eq!(value(&manager), 15);
    assert_eq!(manager.pending_count(), 1);
    assert_eq!(manager.revision(), Some(remote_id));

    manager.push().await.unwrap();
    let stored = repo.load_commit(&local_id).await.unwrap();
    assert!(stored.parents.contains_key(&remote_id));
    assert_eq!(repo.get_heads().await.unwrap(), [local_id].into());
}

#[tokio::test]
async fn start_merges_a_branched_frontier() {
    let repo = Arc::new(MemoryRepository::<CounterOp>::new());
    let root = repo.bootstrap_root().await.unwrap();

    repo.push(vec![
        Commit::of_commit(1, root, vec![add(3)]),
        Commit::of_commit(2, root, vec![add(4)]),
    ])
    .await
    .unwrap();

    let manager = started(&repo, CounterSystem::new()).await;
    assert_eq!(manager.phase(), ManagerPhase::Started);
    assert_eq!(value(&manager), 7);

    let heads = repo.get_heads().await.unwrap();
    assert_eq!(heads.len(), 1);
    let merge = repo.load_commit(heads.iter().next().unwrap()).await.unwrap();
    assert!(merge.is_merge());
}

#[tokio::test]
async fn operations_require_a_started_manager() {
    let repo = Arc::new(MemoryRepository::<CounterOp>::new());
    repo.bootstrap_root().await.unwrap();
    let manager: Manager = StateManager::new(
        Arc::new(CounterSystem::new()),
        Arc::clone(&repo),
        EngineConfig::new(),
        CounterState::new(),
    );

    assert!(matches!(
        manager.add(add(1)).unwrap_err(),
        EngineError::InvalidPhase { .. }
    ));

    manager.start().await.unwrap();
    manager.add(add(1)).unwrap();

    manager.stop();
    assert!(matches!(
        manager.add(add(1)).unwrap_err(),
        EngineError::InvalidPhase { .. }
    ));
    assert!(manager.start().await.is_err());
}

#[tokio::test]
async fn commit_squashes_the_working_diffs() {
    let repo = Arc::new(MemoryRepository::<CounterOp>::new());
    repo.bootstrap_root().await.unwrap();
    let manager = started(&repo, CounterSystem::new()).await;

    assert_eq!(manager.commit().await.unwrap(), None);

    manager.add(add(1)).unwrap();
    manager.add(add(2)).unwrap();
    manager.add(add(3)).unwrap();
    let id = manager.commit().await.unwrap().unwrap();
    manager.push().await.unwrap();

    let stored = repo.load_commit(&id).await.unwrap();
    let diffs: Vec<_> = stored.parents.values().flatten().copied().collect();
    assert_eq!(diffs, vec![add(6)]);
}

#[tokio::test]
async fn cancelled_working_diffs_commit_to_nothing() {
    let repo = Arc::new(MemoryRepository::<CounterOp>::new());
    repo.bootstrap_root().await.unwrap();
    let manager = started(&repo, CounterSystem::new()).await;

    manager.add(add(4)).unwrap();
    manager.add(add(-4)).unwrap();
    assert_eq!(manager.commit().await.unwrap(), None);
    assert_eq!(manager.pending_count(), 0);
}

#[tokio::test]
async fn configured_pruning_bounds_the_graph_cache() {
    let repo = Arc::new(MemoryRepository::<CounterOp>::new());
    let root = repo.bootstrap_root().await.unwrap();

    let unpruned = started(&repo, CounterSystem::new()).await;
    let pruned = Arc::new(StateManager::new(
        Arc::new(CounterSystem::new()),
        Arc::clone(&repo),
        EngineConfig::new().with_prune_depth(2),
        CounterState::new(),
    ));
    pruned.start().await.unwrap();

    seed_chain(&repo, root, 10).await;
    unpruned.pull().await.unwrap();
    pruned.pull().await.unwrap();

    assert_eq!(value(&pruned), 10);
    assert!(pruned.loaded_nodes() < unpruned.loaded_nodes());

    // Pruned history is still sufficient for the next reconciliation.
    seed_chain(&repo, pruned.revision().unwrap(), 3).await;
    pruned.pull().await.unwrap();
    assert_eq!(value(&pruned), 13);
}

#[tokio::test]
async fn checkpoint_snapshots_the_current_revision() {
    let repo = Arc::new(MemoryRepository::<CounterOp>::new());
    repo.bootstrap_root().await.unwrap();
    let manager = started(&repo, CounterSystem::new()).await;

    manager.add(add(9)).unwrap();
    manager.commit().await.unwrap();
    manager.push().await.unwrap();
    manager.checkpoint().await.unwrap();

    let revision = manager.revision().unwrap();
    assert!(repo.is_snapshot(&revision).await.unwrap());
    assert_eq!(repo.load_snapshot(&revision).await.unwrap(), vec![add(9)]);
}
