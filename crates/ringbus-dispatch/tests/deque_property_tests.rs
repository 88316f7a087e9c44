//! Property tests for the steal deque against a reference model.

use proptest::prelude::*;
use ringbus_dispatch::{Steal, StealDeque};
use std::collections::VecDeque;

proptest! {
    /// Sequential push/pop/steal matches a double-ended queue model:
    /// the owner works the back, thieves the front.
    #[test]
    fn prop_matches_vecdeque_model(
        ops in prop::collection::vec(0u8..3, 1..200),
    ) {
        let deque = StealDeque::new(64);
        let mut model: VecDeque<u32> = VecDeque::new();
        let mut next = 0u32;

        for op in ops {
            match op {
                0 => {
                    if model.len() < 64 {
                        deque.push(next).unwrap();
                        model.push_back(next);
                        next += 1;
                    } else {
                        prop_assert!(deque.push(next).is_err());
                    }
                }
                1 => {
                    prop_assert_eq!(deque.pop(), model.pop_back());
                }
                _ => {
                    match deque.steal() {
                        Steal::Taken(v) => prop_assert_eq!(Some(v), model.pop_front()),
                        Steal::Empty => prop_assert!(model.is_empty()),
                        Steal::Retry => {} // impossible single-threaded, but legal
                    }
                }
            }
            prop_assert_eq!(deque.len(), model.len());
        }
    }
}
