// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Bounded top-N selection over a stream of timestamped entries.
//!
//! Keeps a min-heap of at most `n` entries; pushing past capacity pops the
//! oldest. Memory stays at `O(n)` and each push costs `O(log n)` regardless of
//! how many entries stream through.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// Ordering key of a ranked entry. Ties on timestamp break on the id so the
/// selection is deterministic.
pub trait Ranked {
    fn rank_ts(&self) -> i64;
    fn rank_id(&self) -> &str;
}

struct HeapEntry<T: Ranked>(T);

impl<T: Ranked> Ord for HeapEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .rank_ts()
            .cmp(&other.0.rank_ts())
            .then_with(|| self.0.rank_id().cmp(other.0.rank_id()))
    }
}

impl<T: Ranked> PartialOrd for HeapEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Ranked> PartialEq for HeapEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T: Ranked> Eq for HeapEntry<T> {}

pub struct TopN<T: Ranked> {
    capacity: usize,
    heap: BinaryHeap<Reverse<HeapEntry<T>>>,
}

impl<T: Ranked> TopN<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            heap: BinaryHeap::with_capacity(capacity.saturating_add(1).min(1024)),
        }
    }

    pub fn push(&mut self, entry: T) {
        if self.capacity == 0 {
            return;
        }
        self.heap.push(Reverse(HeapEntry(entry)));
        if self.heap.len() > self.capacity {
            self.heap.pop();
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drain into a vector, newest first
    pub fn into_sorted_desc(self) -> Vec<T> {
        // Ascending order of Reverse<_> is descending order of the entries.
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|Reverse(HeapEntry(entry))| entry)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item(i64, String);

    impl Ranked for Item {
        fn rank_ts(&self) -> i64 {
            self.0
        }
        fn rank_id(&self) -> &str {
            &self.1
        }
    }

    fn item(ts: i64) -> Item {
        Item(ts, format!("id-{ts}"))
    }

    #[test]
    fn test_keeps_newest_in_descending_order() {
        let mut top = TopN::new(3);
        for ts in [5, 1, 9, 3, 7, 2] {
            top.push(item(ts));
        }
        assert_eq!(top.len(), 3);
        let ts: Vec<i64> = top.into_sorted_desc().iter().map(|i| i.0).collect();
        assert_eq!(ts, vec![9, 7, 5]);
    }

    #[test]
    fn test_zero_capacity() {
        let mut top = TopN::new(0);
        top.push(item(1));
        assert!(top.is_empty());
    }

    #[test]
    fn test_ties_break_on_id() {
        let mut top = TopN::new(2);
        top.push(Item(1, "b".into()));
        top.push(Item(1, "a".into()));
        top.push(Item(1, "c".into()));
        let ids: Vec<String> = top.into_sorted_desc().into_iter().map(|i| i.1).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    proptest! {
        #[test]
        fn prop_matches_full_sort(
            ts in proptest::collection::hash_set(any::<i64>(), 0..300),
            n in 1usize..50,
        ) {
            let mut top = TopN::new(n);
            for t in &ts {
                top.push(item(*t));
            }

            let mut expected: Vec<i64> = ts.into_iter().collect();
            expected.sort_unstable_by(|a, b| b.cmp(a));
            expected.truncate(n);

            let got: Vec<i64> = top.into_sorted_desc().iter().map(|i| i.0).collect();
            prop_assert_eq!(got, expected);
        }
    }
}
