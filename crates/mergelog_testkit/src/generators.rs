//! Property-based generators for the counter domain.

use crate::ops::{CounterOp, CounterSystem};
use proptest::prelude::*;

/// An arbitrary single counter op. The `prev` of a generated set is not
/// tied to any particular state; use [`consistent_ops`] when a sequence
/// must replay from a known base.
pub fn counter_op() -> impl Strategy<Value = CounterOp> {
    prop_oneof![
        (-50i64..50).prop_map(CounterOp::Add),
        ((-50i64..50), (-50i64..50)).prop_map(|(prev, next)| CounterOp::Set { prev, next }),
    ]
}

/// A diff sequence whose `Set` ops record the true value they replace when
/// replayed from `initial`.
pub fn consistent_ops(initial: i64, max_len: usize) -> impl Strategy<Value = Vec<CounterOp>> {
    prop::collection::vec(
        prop_oneof![
            (-50i64..50).prop_map(|delta| (true, delta)),
            (-50i64..50).prop_map(|target| (false, target)),
        ],
        0..=max_len,
    )
    .prop_map(move |raw| {
        let mut value = initial;
        raw.into_iter()
            .map(|(is_add, operand)| {
                if is_add {
                    value += operand;
                    CounterOp::Add(operand)
                } else {
                    let prev = value;
                    value = operand;
                    CounterOp::Set {
                        prev,
                        next: operand,
                    }
                }
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::apply_all;
    use mergelog_protocol::OtSystem;

    proptest! {
        #[test]
        fn transform_is_confluent(
            left in consistent_ops(0, 6),
            right in consistent_ops(0, 6),
        ) {
            let system = CounterSystem::new();
            let transformed = system.transform(&left, &right).unwrap();
            let via_left = apply_all(apply_all(0, &left), &transformed.right);
            let via_right = apply_all(apply_all(0, &right), &transformed.left);
            prop_assert_eq!(via_left, via_right);
        }

        #[test]
        fn squash_preserves_effect(base in -100i64..100, diffs in consistent_ops(0, 8)) {
            let system = CounterSystem::new();
            let squashed = system.squash(diffs.clone());
            // Effect is preserved from the base the sequence was built for.
            prop_assert_eq!(apply_all(0, &squashed), apply_all(0, &diffs));
            // Adds-only sequences squash base-independently.
            if diffs.iter().all(|d| matches!(d, CounterOp::Add(_))) {
                prop_assert_eq!(apply_all(base, &squashed), apply_all(base, &diffs));
            }
        }

        #[test]
        fn squash_is_idempotent(diffs in consistent_ops(0, 8)) {
            let system = CounterSystem::new();
            let once = system.squash(diffs);
            let twice = system.squash(once.clone());
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn invert_round_trips(initial in -100i64..100, diffs in consistent_ops(0, 8)) {
            let system = CounterSystem::new();
            // Rebuild the sequence so prev values match the actual base.
            let diffs = {
                let mut value = initial;
                diffs
                    .into_iter()
                    .map(|d| match d {
                        CounterOp::Add(delta) => {
                            value += delta;
                            CounterOp::Add(delta)
                        }
                        CounterOp::Set { next, .. } => {
                            let prev = value;
                            value = next;
                            CounterOp::Set { prev, next }
                        }
                    })
                    .collect::<Vec<_>>()
            };
            let end = apply_all(initial, &diffs);
            let inverted = system.invert(&diffs);
            prop_assert_eq!(apply_all(end, &inverted), initial);
        }
    }
}
