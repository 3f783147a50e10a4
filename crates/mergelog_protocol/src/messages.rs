//! Wire commands for network-backed repositories.
//!
//! A remote node speaks four request/response pairs: `createCommit`,
//! `push`, `checkout` and `fetch`. Each carries a commit id and a diff
//! payload. Encoding is left to an external codec; this module only fixes
//! the closed set of command variants so transports dispatch on an enum
//! rather than on runtime type checks.

use crate::commit::Commit;
use serde::{Deserialize, Serialize};

/// A request from a replica to a remote node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RemoteRequest<K: Ord, D> {
    /// Allocate an id and wrap `diffs` into a commit on top of `parent`.
    CreateCommit {
        /// Parent the new commit descends from.
        parent: K,
        /// Diffs from the parent's state to the new commit's state.
        diffs: Vec<D>,
    },
    /// Durably store a previously created commit.
    Push {
        /// The commit to store.
        commit: Commit<K, D>,
    },
    /// Fetch the current head and the full squashed history leading to it.
    Checkout,
    /// Fetch the diffs from a known revision to the current head.
    Fetch {
        /// The revision the replica already has.
        known: K,
    },
}

impl<K: Ord, D> RemoteRequest<K, D> {
    /// Returns the command type code.
    pub fn type_code(&self) -> u8 {
        match self {
            RemoteRequest::CreateCommit { .. } => 1,
            RemoteRequest::Push { .. } => 2,
            RemoteRequest::Checkout => 3,
            RemoteRequest::Fetch { .. } => 4,
        }
    }
}

/// A head revision together with the diffs that lead to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchData<K, D> {
    /// The node's current head.
    pub head: K,
    /// Diffs from the requested base (or from scratch, for checkout) to
    /// `head`.
    pub diffs: Vec<D>,
}

/// A response from a remote node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RemoteResponse<K: Ord, D> {
    /// Response to `CreateCommit`: the commit the node assembled.
    Committed {
        /// The assembled commit, id included.
        commit: Commit<K, D>,
    },
    /// Response to `Push`, `Checkout` and `Fetch`.
    Fetched {
        /// The node's head and the diffs leading to it.
        data: FetchData<K, D>,
    },
}

impl<K: Ord, D> RemoteResponse<K, D> {
    /// Returns the response type code.
    pub fn type_code(&self) -> u8 {
        match self {
            RemoteResponse::Committed { .. } => 1,
            RemoteResponse::Fetched { .. } => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_type_codes() {
        let create: RemoteRequest<u64, i64> = RemoteRequest::CreateCommit {
            parent: 1,
            diffs: vec![5],
        };
        assert_eq!(create.type_code(), 1);
        assert_eq!(RemoteRequest::<u64, i64>::Checkout.type_code(), 3);
        assert_eq!(RemoteRequest::<u64, i64>::Fetch { known: 7 }.type_code(), 4);
    }

    #[test]
    fn response_type_codes() {
        let committed: RemoteResponse<u64, i64> = RemoteResponse::Committed {
            commit: Commit::of_commit(2, 1, vec![1]),
        };
        assert_eq!(committed.type_code(), 1);

        let fetched: RemoteResponse<u64, i64> = RemoteResponse::Fetched {
            data: FetchData {
                head: 2,
                diffs: vec![1],
            },
        };
        assert_eq!(fetched.type_code(), 2);
    }
}
