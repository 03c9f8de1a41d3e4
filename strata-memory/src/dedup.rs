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

//! Bounded recency window of event ids
//!
//! FIFO by insertion: a repeated id does not refresh its position, and the
//! oldest id is evicted first once the window is full.

use std::collections::{HashSet, VecDeque};
use strata_core::MIN_DEDUP_WINDOW;

#[derive(Debug, Clone)]
pub struct DedupWindow {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl DedupWindow {
    /// Window of `capacity` ids (never less than [`MIN_DEDUP_WINDOW`])
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_DEDUP_WINDOW);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Insert `id`; returns false if it is already in the window
    pub fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string());
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_duplicate_rejected() {
        let mut window = DedupWindow::new(64);
        assert!(window.insert("a"));
        assert!(!window.insert("a"));
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_capacity_floor() {
        assert_eq!(DedupWindow::new(0).capacity(), MIN_DEDUP_WINDOW);
        assert_eq!(DedupWindow::new(256).capacity(), 256);
    }

    #[test]
    fn test_oldest_evicted_and_reaccepted() {
        let mut window = DedupWindow::new(32);
        for i in 0..34 {
            assert!(window.insert(&format!("id-{i}")));
        }
        assert!(!window.contains("id-0"));
        assert!(!window.contains("id-1"));
        assert!(window.contains("id-2"));
        assert!(window.insert("id-0"));
    }

    #[test]
    fn test_repeat_does_not_refresh_position() {
        let mut window = DedupWindow::new(32);
        for i in 0..32 {
            window.insert(&format!("id-{i}"));
        }
        assert!(!window.insert("id-0"));
        window.insert("new");
        assert!(!window.contains("id-0"));
    }

    proptest! {
        #[test]
        fn prop_window_keeps_exactly_the_last_w(w in 32usize..128, extra in 0usize..200) {
            let mut window = DedupWindow::new(w);
            let ids: Vec<String> = (0..w + extra).map(|i| format!("e{i}")).collect();
            for id in &ids {
                prop_assert!(window.insert(id));
            }

            prop_assert_eq!(window.len(), w);
            for (i, id) in ids.iter().enumerate() {
                prop_assert_eq!(window.contains(id), i >= extra);
            }
        }
    }
}
