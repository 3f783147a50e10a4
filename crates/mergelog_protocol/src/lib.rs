//! # Mergelog Protocol
//!
//! Data model for the mergelog commit graph.
//!
//! This crate provides:
//! - `Commit` — an immutable node of the replicated commit DAG
//! - `OtSystem` — the domain-supplied diff contract (squash, invert, transform)
//! - Wire command enums for network-backed repositories
//!
//! This is a pure data-model crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod commit;
mod messages;
mod system;

pub use commit::{Commit, CommitId, Diff};
pub use messages::{FetchData, RemoteRequest, RemoteResponse};
pub use system::{OtSystem, TransformConflict, Transformed};
