//! Domain-supplied diff contract.

use thiserror::Error;

/// Divergent diff sequences could not be reconciled automatically.
///
/// Surfaced by [`OtSystem::transform`] and propagated unchanged through
/// pull, rebase and merge. Callers must not apply partial results.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transform conflict: {detail}")]
pub struct TransformConflict {
    /// Human-readable description of the conflicting pair.
    pub detail: String,
}

impl TransformConflict {
    /// Creates a conflict with the given description.
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

/// Result of transforming two divergent diff sequences over a common base.
#[derive(Debug, Clone, PartialEq)]
pub struct Transformed<D> {
    /// The left sequence rebased on top of the right one.
    pub left: Vec<D>,
    /// The right sequence rebased on top of the left one.
    pub right: Vec<D>,
}

/// The operational-transform rules of a diff domain.
///
/// All operations are pure. Implementations plug the domain into the
/// engine; the engine never inspects diff contents itself.
///
/// # Laws
///
/// For any state `s` reachable in the domain:
///
/// - `apply(s, squash(d)) == apply(s, d)`
/// - `apply(apply(s, d), invert(d)) == s`
/// - if `transform(l, r)` succeeds with `t`, then
///   `apply(apply(s, l), t.right) == apply(apply(s, r), t.left)`
pub trait OtSystem<D>: Send + Sync {
    /// Rebases two diff sequences that diverged from the same base state
    /// into a confluent pair.
    fn transform(&self, left: &[D], right: &[D]) -> Result<Transformed<D>, TransformConflict>;

    /// Produces an equivalent, typically shorter, diff sequence.
    fn squash(&self, diffs: Vec<D>) -> Vec<D>;

    /// Produces the inverse sequence.
    fn invert(&self, diffs: &[D]) -> Vec<D>;

    /// Identifies no-op diffs.
    fn is_empty(&self, diff: &D) -> bool;

    /// Returns true if the squashed sequence contains no effective diffs.
    fn is_no_op(&self, diffs: &[D]) -> bool {
        diffs.iter().all(|d| self.is_empty(d))
    }
}
