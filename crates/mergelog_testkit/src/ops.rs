//! Reference counter diff domain.
//!
//! A deliberately small domain over a single integer value, rich enough to
//! exercise every transform path: `Add` deltas commute, `Set` overwrites
//! compete, and a set absorbs concurrent adds into its expected base.

use mergelog_engine::Projection;
use mergelog_protocol::{OtSystem, TransformConflict, Transformed};

/// A diff over the counter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterOp {
    /// Adds a delta to the value.
    Add(i64),
    /// Overwrites the value, recording the value it replaces.
    Set {
        /// The value being replaced.
        prev: i64,
        /// The new value.
        next: i64,
    },
}

/// Creates an [`CounterOp::Add`] diff.
pub fn add(delta: i64) -> CounterOp {
    CounterOp::Add(delta)
}

/// Creates a [`CounterOp::Set`] diff.
pub fn set(prev: i64, next: i64) -> CounterOp {
    CounterOp::Set { prev, next }
}

/// The counter's materialized state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterState {
    value: i64,
}

impl CounterState {
    /// Creates a state holding zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current value.
    pub fn value(&self) -> i64 {
        self.value
    }
}

impl Projection<CounterOp> for CounterState {
    fn apply(&mut self, diff: &CounterOp) {
        match *diff {
            CounterOp::Add(delta) => self.value += delta,
            CounterOp::Set { next, .. } => self.value = next,
        }
    }
}

/// Applies a diff sequence to a fresh state and returns the final value.
pub fn apply_all(initial: i64, diffs: &[CounterOp]) -> i64 {
    let mut state = CounterState { value: initial };
    for diff in diffs {
        state.apply(diff);
    }
    state.value
}

/// Transform rules for [`CounterOp`].
///
/// Concurrent sets are resolved towards the smaller new value, so every
/// replica picks the same winner. In strict mode they conflict instead,
/// which is how tests exercise the all-or-nothing conflict paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterSystem {
    strict_sets: bool,
}

impl CounterSystem {
    /// Creates the default system: concurrent sets auto-resolve.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a system where concurrent differing sets conflict.
    pub fn strict() -> Self {
        Self { strict_sets: true }
    }

    /// Transforms one pair of concurrent diffs. Each side rebases to at
    /// most one diff.
    fn transform_pair(
        &self,
        left: CounterOp,
        right: CounterOp,
    ) -> Result<(Option<CounterOp>, Option<CounterOp>), TransformConflict> {
        use CounterOp::{Add, Set};
        match (left, right) {
            (Add(a), Add(b)) => Ok((Some(Add(a)), Some(Add(b)))),
            // A concurrent add survives an overwrite: the set lands first
            // and the add is rebased on top of its new value.
            (Add(a), Set { prev, next }) => Ok((
                Some(Add(a)),
                Some(Set {
                    prev: prev + a,
                    next: next + a,
                }),
            )),
            (Set { prev, next }, Add(b)) => Ok((
                Some(Set {
                    prev: prev + b,
                    next: next + b,
                }),
                Some(Add(b)),
            )),
            (
                Set {
                    next: left_next, ..
                },
                Set {
                    next: right_next, ..
                },
            ) => {
                if left_next == right_next {
                    return Ok((None, None));
                }
                if self.strict_sets {
                    return Err(TransformConflict::new(format!(
                        "{left:?} vs {right:?}"
                    )));
                }
                // Smaller new value wins on both replicas.
                if left_next < right_next {
                    Ok((
                        Some(Set {
                            prev: right_next,
                            next: left_next,
                        }),
                        None,
                    ))
                } else {
                    Ok((
                        None,
                        Some(Set {
                            prev: left_next,
                            next: right_next,
                        }),
                    ))
                }
            }
        }
    }
}

impl OtSystem<CounterOp> for CounterSystem {
    fn transform(
        &self,
        left: &[CounterOp],
        right: &[CounterOp],
    ) -> Result<Transformed<CounterOp>, TransformConflict> {
        let mut rights: Vec<CounterOp> = right.to_vec();
        let mut lefts: Vec<CounterOp> = Vec::with_capacity(left.len());
        for &l in left {
            let mut current = Some(l);
            let mut next_rights = Vec::with_capacity(rights.len());
            for &r in &rights {
                match current {
                    None => next_rights.push(r),
                    Some(l_op) => {
                        let (l_rebased, r_rebased) = self.transform_pair(l_op, r)?;
                        current = l_rebased;
                        if let Some(r_op) = r_rebased {
                            next_rights.push(r_op);
                        }
                    }
                }
            }
            rights = next_rights;
            if let Some(l_op) = current {
                lefts.push(l_op);
            }
        }
        Ok(Transformed {
            left: lefts,
            right: rights,
        })
    }

    fn squash(&self, diffs: Vec<CounterOp>) -> Vec<CounterOp> {
        use CounterOp::{Add, Set};
        let mut folded: Option<CounterOp> = None;
        for diff in diffs {
            folded = Some(match (folded, diff) {
                (None, op) => op,
                (Some(Add(a)), Add(b)) => Add(a + b),
                (Some(Add(a)), Set { prev, next }) => Set {
                    prev: prev - a,
                    next,
                },
                (Some(Set { prev, next }), Add(b)) => Set {
                    prev,
                    next: next + b,
                },
                (Some(Set { prev, .. }), Set { next, .. }) => Set { prev, next },
            });
        }
        match folded {
            Some(op) if !self.is_empty(&op) => vec![op],
            _ => Vec::new(),
        }
    }

    fn invert(&self, diffs: &[CounterOp]) -> Vec<CounterOp> {
        diffs
            .iter()
            .rev()
            .map(|diff| match *diff {
                CounterOp::Add(delta) => CounterOp::Add(-delta),
                CounterOp::Set { prev, next } => CounterOp::Set {
                    prev: next,
                    next: prev,
                },
            })
            .collect()
    }

    fn is_empty(&self, diff: &CounterOp) -> bool {
        match *diff {
            CounterOp::Add(delta) => delta == 0,
            CounterOp::Set { prev, next } => prev == next,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn confluent(system: &CounterSystem, base: i64, left: &[CounterOp], right: &[CounterOp]) -> i64 {
        let transformed = system.transform(left, right).unwrap();
        let via_left = apply_all(apply_all(base, left), &transformed.right);
        let via_right = apply_all(apply_all(base, right), &transformed.left);
        assert_eq!(via_left, via_right);
        via_left
    }

    #[test]
    fn adds_commute() {
        let system = CounterSystem::new();
        assert_eq!(confluent(&system, 0, &[add(10)], &[add(5)]), 15);
    }

    #[test]
    fn concurrent_add_survives_set() {
        let system = CounterSystem::new();
        assert_eq!(confluent(&system, 0, &[add(5)], &[set(0, 10)]), 15);
        assert_eq!(confluent(&system, 0, &[set(0, 10)], &[add(5)]), 15);
    }

    #[test]
    fn smaller_set_wins() {
        let system = CounterSystem::new();
        assert_eq!(confluent(&system, 0, &[set(0, 15)], &[set(0, 10)]), 10);
        assert_eq!(confluent(&system, 0, &[set(0, 10)], &[set(0, 15)]), 10);
    }

    #[test]
    fn equal_sets_cancel() {
        let system = CounterSystem::new();
        let transformed = system.transform(&[set(0, 7)], &[set(0, 7)]).unwrap();
        assert!(transformed.left.is_empty());
        assert!(transformed.right.is_empty());
    }

    #[test]
    fn strict_sets_conflict() {
        let system = CounterSystem::strict();
        assert!(system.transform(&[set(0, 10)], &[set(0, 15)]).is_err());
        // Everything else still reconciles.
        assert!(system.transform(&[add(1)], &[set(0, 15)]).is_ok());
    }

    #[test]
    fn squash_folds_adds_and_sets() {
        let system = CounterSystem::new();
        assert_eq!(system.squash(vec![add(2), add(3)]), vec![add(5)]);
        assert_eq!(system.squash(vec![add(2), set(2, 9)]), vec![set(0, 9)]);
        assert_eq!(system.squash(vec![set(0, 4), add(1)]), vec![set(0, 5)]);
        assert_eq!(system.squash(vec![add(2), add(-2)]), Vec::<CounterOp>::new());
    }

    #[test]
    fn invert_reverses_effect() {
        let system = CounterSystem::new();
        let diffs = vec![add(3), set(8, 9), add(-1)];
        let value = apply_all(5, &diffs);
        let inverted = system.invert(&diffs);
        assert_eq!(apply_all(value, &inverted), 5);
    }
}
