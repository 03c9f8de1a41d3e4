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

//! Summarizer strategy
//!
//! Fossilization hands a snapshot of active items to a [`Summarizer`]. Hosts
//! plug in an LLM-backed implementation; [`RuleBasedSummarizer`] is the
//! offline fallback.

use crate::fossil::ActiveItem;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::future::Future;
use std::marker::PhantomData;
use strata_core::{truncate_chars, Result};

/// Turns a burst of active items into one summary text
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Engine name recorded as `meta.summaryEngine`
    fn name(&self) -> &str;

    async fn summarize(&self, items: &[ActiveItem]) -> Result<String>;
}

/// Buckets items by `meta_kind` and lists head and tail samples per bucket
#[derive(Debug, Clone)]
pub struct RuleBasedSummarizer {
    /// Samples taken from each end of a bucket
    pub samples_per_end: usize,
    /// Each sample is cut to this many chars
    pub sample_chars: usize,
}

impl Default for RuleBasedSummarizer {
    fn default() -> Self {
        Self {
            samples_per_end: 2,
            sample_chars: 160,
        }
    }
}

impl RuleBasedSummarizer {
    fn sample_line(&self, item: &ActiveItem) -> String {
        let first_line = item
            .content_for_summary
            .lines()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("")
            .trim();
        format!("[{}] {}", item.role, truncate_chars(first_line, self.sample_chars))
    }

    /// Synchronous core, also used when no runtime is involved
    pub fn render(&self, items: &[ActiveItem]) -> String {
        if items.is_empty() {
            return String::from("(no active events)");
        }

        let from = items.iter().map(|i| i.ts_unix_ms).min().unwrap_or_default();
        let to = items.iter().map(|i| i.ts_unix_ms).max().unwrap_or_default();

        let mut buckets: BTreeMap<&str, Vec<&ActiveItem>> = BTreeMap::new();
        for item in items {
            buckets.entry(item.meta_kind.as_str()).or_default().push(item);
        }

        let mut out = format!(
            "{} active events across {} kinds ({}..{})\n",
            items.len(),
            buckets.len(),
            from,
            to
        );

        for (kind, bucket) in &buckets {
            out.push_str(&format!("\n## {} ({})\n", kind, bucket.len()));

            let n = self.samples_per_end;
            if bucket.len() <= n * 2 {
                for item in bucket {
                    out.push_str(&format!("- {}\n", self.sample_line(item)));
                }
            } else {
                for item in &bucket[..n] {
                    out.push_str(&format!("- {}\n", self.sample_line(item)));
                }
                out.push_str(&format!("- ... {} more ...\n", bucket.len() - n * 2));
                for item in &bucket[bucket.len() - n..] {
                    out.push_str(&format!("- {}\n", self.sample_line(item)));
                }
            }
        }

        out
    }
}

#[async_trait]
impl Summarizer for RuleBasedSummarizer {
    fn name(&self) -> &str {
        "rule-based"
    }

    async fn summarize(&self, items: &[ActiveItem]) -> Result<String> {
        Ok(self.render(items))
    }
}

/// Adapts an async closure into a [`Summarizer`]
pub struct FnSummarizer<F, Fut> {
    name: String,
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnSummarizer<F, Fut>
where
    F: Fn(Vec<ActiveItem>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String>> + Send,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
            _fut: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> Summarizer for FnSummarizer<F, Fut>
where
    F: Fn(Vec<ActiveItem>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn summarize(&self, items: &[ActiveItem]) -> Result<String> {
        (self.f)(items.to_vec()).await
    }
}
