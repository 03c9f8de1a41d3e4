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

//! Active items and the fossil buffer
//!
//! Active items exist only in memory. They accumulate in the buffer until a
//! count or size threshold is crossed, at which point the whole buffer is
//! swapped out and handed to the summarizer.

use serde::{Deserialize, Serialize};
use strata_core::{char_len, truncate_chars, Role};

/// Buffered view of one Active-state event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveItem {
    pub event_id: String,
    pub ts_unix_ms: i64,
    pub role: Role,
    pub meta_kind: String,
    pub session_id: String,
    /// Content cut to the configured item limit
    pub content_for_summary: String,
}

impl ActiveItem {
    pub fn new(
        event_id: impl Into<String>,
        ts_unix_ms: i64,
        role: Role,
        meta_kind: impl Into<String>,
        session_id: impl Into<String>,
        content: &str,
        max_chars: usize,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            ts_unix_ms,
            role,
            meta_kind: meta_kind.into(),
            session_id: session_id.into(),
            content_for_summary: truncate_chars(content, max_chars).into_owned(),
        }
    }
}

/// Thresholds at which the buffer must be fossilized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FossilThresholds {
    pub max_items: usize,
    pub max_chars: usize,
}

/// Items awaiting fossilization plus their running char count
#[derive(Debug, Default)]
pub struct FossilBuffer {
    items: Vec<ActiveItem>,
    char_sum: usize,
}

impl FossilBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: ActiveItem) {
        self.char_sum += char_len(&item.content_for_summary);
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn char_sum(&self) -> usize {
        self.char_sum
    }

    pub fn is_ready(&self, thresholds: FossilThresholds) -> bool {
        self.items.len() >= thresholds.max_items || self.char_sum >= thresholds.max_chars
    }

    /// Swap the contents out, leaving an empty buffer behind
    pub fn take(&mut self) -> Vec<ActiveItem> {
        self.char_sum = 0;
        std::mem::take(&mut self.items)
    }

    /// [`take`](Self::take) only if a threshold has been crossed
    pub fn take_if_ready(&mut self, thresholds: FossilThresholds) -> Option<Vec<ActiveItem>> {
        if self.is_ready(thresholds) {
            Some(self.take())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLDS: FossilThresholds = FossilThresholds {
        max_items: 80,
        max_chars: 60_000,
    };

    fn item(i: usize, len: usize) -> ActiveItem {
        ActiveItem::new(
            format!("id-{i}"),
            i as i64,
            Role::Logician,
            "chat",
            "s",
            &"c".repeat(len),
            4_096,
        )
    }

    #[test]
    fn test_item_content_truncated() {
        let it = item(0, 5_000);
        assert_eq!(char_len(&it.content_for_summary), 4_097);
        assert!(it.content_for_summary.ends_with(strata_core::ELLIPSIS));
    }

    #[test]
    fn test_count_threshold() {
        let mut buffer = FossilBuffer::new();
        for i in 0..79 {
            buffer.push(item(i, 10));
            assert!(!buffer.is_ready(THRESHOLDS));
        }
        buffer.push(item(79, 10));
        assert!(buffer.is_ready(THRESHOLDS));
    }

    #[test]
    fn test_char_threshold_fires_at_item_53() {
        let mut buffer = FossilBuffer::new();
        for i in 1..=53 {
            buffer.push(item(i, 1_140));
            assert_eq!(buffer.is_ready(THRESHOLDS), i == 53, "item {i}");
        }
    }

    #[test]
    fn test_take_resets() {
        let mut buffer = FossilBuffer::new();
        buffer.push(item(0, 100));
        assert!(buffer.take_if_ready(THRESHOLDS).is_none());
        let taken = buffer.take();
        assert_eq!(taken.len(), 1);
        assert!(buffer.is_empty());
        assert_eq!(buffer.char_sum(), 0);
    }
}
