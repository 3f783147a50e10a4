//! Client for network-backed repositories speaking the four wire commands.
//!
//! The transport is abstracted behind [`RemoteClient`] so different stacks
//! (HTTP, WebSocket, an in-process loopback) can carry the commands; the
//! codec that turns them into bytes stays external.

use crate::algorithms::{now_millis, GraphAlgorithms, ListReducer};
use crate::error::{EngineError, EngineResult};
use crate::graph::LoadedGraph;
use crate::repository::Repository;
use mergelog_protocol::{Commit, CommitId, Diff, FetchData, OtSystem, RemoteRequest, RemoteResponse};
use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::trace;

/// Carries one request/response exchange with a remote node.
#[allow(async_fn_in_trait)]
pub trait RemoteClient<K: CommitId, D: Diff>: Send + Sync {
    /// Sends a request and returns the node's response.
    async fn call(&self, request: RemoteRequest<K, D>) -> EngineResult<RemoteResponse<K, D>>;
}

/// Typed access to a remote node over a [`RemoteClient`].
///
/// Responses are decoded once into the closed [`RemoteResponse`] variant
/// set; a variant that does not match the issued command is a protocol
/// defect and surfaces as a fatal repository error.
pub struct RemoteNode<K, D, C>
where
    K: CommitId,
    D: Diff,
    C: RemoteClient<K, D>,
{
    client: C,
    _marker: PhantomData<fn() -> (K, D)>,
}

impl<K, D, C> RemoteNode<K, D, C>
where
    K: CommitId,
    D: Diff,
    C: RemoteClient<K, D>,
{
    /// Wraps a transport client.
    pub fn new(client: C) -> Self {
        Self {
            client,
            _marker: PhantomData,
        }
    }

    /// Asks the node to allocate an id and assemble a commit on top of
    /// `parent`.
    pub async fn create_commit(&self, parent: K, diffs: Vec<D>) -> EngineResult<Commit<K, D>> {
        match self
            .client
            .call(RemoteRequest::CreateCommit { parent, diffs })
            .await?
        {
            RemoteResponse::Committed { commit } => Ok(commit),
            other => Err(unexpected_response("createCommit", &other)),
        }
    }

    /// Stores a commit and returns the node's head together with the diffs
    /// from the pushed commit to it.
    pub async fn push(&self, commit: Commit<K, D>) -> EngineResult<FetchData<K, D>> {
        match self.client.call(RemoteRequest::Push { commit }).await? {
            RemoteResponse::Fetched { data } => Ok(data),
            other => Err(unexpected_response("push", &other)),
        }
    }

    /// Fetches the node's head and the full squashed history leading to it.
    pub async fn checkout(&self) -> EngineResult<FetchData<K, D>> {
        match self.client.call(RemoteRequest::Checkout).await? {
            RemoteResponse::Fetched { data } => Ok(data),
            other => Err(unexpected_response("checkout", &other)),
        }
    }

    /// Fetches the diffs from a known revision to the node's head.
    pub async fn fetch(&self, known: K) -> EngineResult<FetchData<K, D>> {
        match self.client.call(RemoteRequest::Fetch { known }).await? {
            RemoteResponse::Fetched { data } => Ok(data),
            other => Err(unexpected_response("fetch", &other)),
        }
    }
}

fn unexpected_response<K: Ord, D>(command: &str, response: &RemoteResponse<K, D>) -> EngineError {
    EngineError::repository_fatal(format!(
        "unexpected response type {} to {command}",
        response.type_code()
    ))
}

/// Serves the wire commands in-process from a repository, the way a remote
/// node would: graph reduction happens on the serving side and replicas
/// receive plain diff sequences.
pub struct LoopbackClient<K, D, S, R>
where
    K: CommitId,
    D: Diff,
    S: OtSystem<D>,
    R: Repository<K, D>,
{
    algorithms: GraphAlgorithms<K, D, S, R>,
}

impl<K, D, S, R> LoopbackClient<K, D, S, R>
where
    K: CommitId,
    D: Diff,
    S: OtSystem<D>,
    R: Repository<K, D>,
{
    /// Creates a loopback over the given diff system and repository.
    pub fn new(system: Arc<S>, repository: Arc<R>) -> Self {
        Self {
            algorithms: GraphAlgorithms::new(system, repository),
        }
    }

    async fn fetch_from(&self, known: &K) -> EngineResult<FetchData<K, D>> {
        let mut graph = LoadedGraph::new();
        let head = self.algorithms.merged_head(&mut graph).await?;
        if head == *known {
            return Ok(FetchData {
                head,
                diffs: Vec::new(),
            });
        }
        let heads: BTreeSet<K> = [head.clone()].into();
        let mut reduced = self
            .algorithms
            .reduce_edges(&graph, &heads, known, &ListReducer)?;
        let diffs = self
            .algorithms
            .system()
            .squash(reduced.remove(&head).unwrap_or_default());
        Ok(FetchData { head, diffs })
    }
}

impl<K, D, S, R> RemoteClient<K, D> for LoopbackClient<K, D, S, R>
where
    K: CommitId,
    D: Diff,
    S: OtSystem<D>,
    R: Repository<K, D>,
{
    async fn call(&self, request: RemoteRequest<K, D>) -> EngineResult<RemoteResponse<K, D>> {
        trace!(command = request.type_code(), "loopback command");
        match request {
            RemoteRequest::CreateCommit { parent, diffs } => {
                let id = self.algorithms.repository().create_id().await?;
                let commit = Commit::of_commit(id, parent, diffs).with_timestamp(now_millis());
                Ok(RemoteResponse::Committed { commit })
            }
            RemoteRequest::Push { commit } => {
                let known = commit.id.clone();
                self.algorithms.repository().push(vec![commit]).await?;
                let data = self.fetch_from(&known).await?;
                Ok(RemoteResponse::Fetched { data })
            }
            RemoteRequest::Checkout => {
                let mut graph = LoadedGraph::new();
                let head = self.algorithms.merged_head(&mut graph).await?;
                let diffs = self.algorithms.load_all_changes(&head).await?;
                Ok(RemoteResponse::Fetched {
                    data: FetchData { head, diffs },
                })
            }
            RemoteRequest::Fetch { known } => {
                let data = self.fetch_from(&known).await?;
                Ok(RemoteResponse::Fetched { data })
            }
        }
    }
}
