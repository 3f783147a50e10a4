//! Wire-command client scenarios over the in-process loopback.

use mergelog_engine::{HeadPoller, LoopbackClient, RemoteNode, Repository};
use mergelog_protocol::Commit;
use mergelog_testkit::{
    add, apply_all, edge, init_tracing, CounterOp, CounterSystem, GraphBuilder, MemoryRepository,
};
use std::sync::Arc;
use std::time::Duration;

type Node =
    RemoteNode<u64, CounterOp, LoopbackClient<u64, CounterOp, CounterSystem, MemoryRepository<CounterOp>>>;

fn node_over(repo: &Arc<MemoryRepository<CounterOp>>) -> Node {
    init_tracing();
    RemoteNode::new(LoopbackClient::new(
        Arc::new(CounterSystem::new()),
        Arc::clone(repo),
    ))
}

#[tokio::test]
async fn checkout_returns_the_full_history() {
    let repo = Arc::new(MemoryRepository::<CounterOp>::new());
    GraphBuilder::new(&repo)
        .build((1..=4).map(|i| edge(i - 1, i, add(i as i64))).collect())
        .await
        .unwrap();
    let node = node_over(&repo);

    let data = node.checkout().await.unwrap();
    assert_eq!(data.head, 4);
    assert_eq!(apply_all(0, &data.diffs), 10);
}

#[tokio::test]
async fn create_commit_and_push_round_trip() {
    let repo = Arc::new(MemoryRepository::<CounterOp>::new());
    let root = repo.bootstrap_root().await.unwrap();
    let node = node_over(&repo);

    let commit = node.create_commit(root, vec![add(6)]).await.unwrap();
    assert!(commit.parents.contains_key(&root));

    let data = node.push(commit.clone()).await.unwrap();
    assert_eq!(data.head, commit.id);
    assert!(data.diffs.is_empty());
    assert_eq!(repo.get_heads().await.unwrap(), [commit.id].into());
}

#[tokio::test]
async fn fetch_returns_the_diffs_since_a_known_revision() {
    let repo = Arc::new(MemoryRepository::<CounterOp>::new());
    GraphBuilder::new(&repo)
        .build(vec![edge(0, 1, add(2)), edge(1, 2, add(3))])
        .await
        .unwrap();
    let node = node_over(&repo);

    let data = node.fetch(1).await.unwrap();
    assert_eq!(data.head, 2);
    assert_eq!(apply_all(0, &data.diffs), 3);

    // Fetching from the head itself yields nothing.
    let data = node.fetch(2).await.unwrap();
    assert!(data.diffs.is_empty());
}

#[tokio::test]
async fn checkout_merges_a_branched_frontier() {
    let repo = Arc::new(MemoryRepository::<CounterOp>::new());
    GraphBuilder::new(&repo)
        .build(vec![edge(0, 1, add(3)), edge(0, 2, add(4))])
        .await
        .unwrap();
    let node = node_over(&repo);

    let data = node.checkout().await.unwrap();
    assert_eq!(apply_all(0, &data.diffs), 7);
    assert_eq!(repo.get_heads().await.unwrap(), [data.head].into());
}

#[tokio::test]
async fn poller_skips_unchanged_frontiers() {
    let repo = Arc::new(MemoryRepository::<CounterOp>::new());
    let root = repo.bootstrap_root().await.unwrap();
    let poller: HeadPoller<u64, CounterOp, _> =
        HeadPoller::new(Arc::clone(&repo)).with_yield_interval(Duration::from_millis(5));

    let first = poller.poll().await.unwrap();
    assert_eq!(first, [root].into());

    // The frontier has not moved; the next poll blocks until it does.
    let pusher = Arc::clone(&repo);
    let background = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        pusher
            .push(vec![Commit::of_commit(1, 0, vec![add(1)])])
            .await
            .unwrap();
    });

    let second = poller.poll().await.unwrap();
    assert_eq!(second, [1].into());
    background.await.unwrap();
}
