//! # Mergelog Testkit
//!
//! Test utilities for mergelog.
//!
//! This crate provides:
//! - A reference counter diff domain (`CounterOp`, `CounterSystem`,
//!   `CounterState`) with the full transform rule set
//! - An in-memory repository stub with injectable latency and failure
//! - A commit-DAG builder for seeding test graphs
//! - Property-based generators using proptest

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod graph;
pub mod ops;
pub mod repo;

pub use fixtures::init_tracing;
pub use generators::{consistent_ops, counter_op};
pub use graph::{edge, Edge, GraphBuilder};
pub use ops::{add, apply_all, set, CounterOp, CounterState, CounterSystem};
pub use repo::MemoryRepository;
