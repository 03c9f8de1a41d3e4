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

//! Archive Store
//!
//! Records typed knowledge events onto the audit stream, rejects repeats
//! through a bounded dedup window and buffers Active events until they are
//! fossilized into one summary.
//!
//! ```text
//! record() ──► dedup window ──► audit log
//!                  │
//!                  └─ Active ──► fossil buffer ──(threshold)──► snapshot
//!                                                                │
//!                        background loop: summarize ──► Fossil + Standby records
//! ```
//!
//! At most one fossilization runs per store. A trigger that arrives while
//! one is in flight is absorbed: the running loop re-checks the buffer after
//! every snapshot and keeps draining until it is below both thresholds.

use crate::dedup::DedupWindow;
use crate::fossil::{ActiveItem, FossilBuffer, FossilThresholds};
use crate::summarizer::Summarizer;
use chrono::{DateTime, Local};
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use strata_core::{
    char_len, event_id, iso_millis, iso_second, meta_keys, sha256_hex, source_ids_hash,
    truncate_chars, ArchiveConfig, ArchiveEvent, KnowledgeState, Result, Role, StrataError,
    ARCHIVE_KIND, ARCHIVE_SCHEMA, DEFAULT_META_KIND,
};
use strata_storage::AuditLogWriter;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// `meta.kind` of fossil summaries
pub const FOSSIL_META_KIND: &str = "fossil";

/// `meta.kind` of the Standby marker written after each fossil
pub const TRANSITION_META_KIND: &str = "state_transition";

/// A knowledge event to be recorded
#[derive(Debug, Clone)]
pub struct Record {
    content: String,
    role: Role,
    state: KnowledgeState,
    session_id: Option<String>,
    meta: Map<String, Value>,
}

impl Record {
    pub fn new(content: impl Into<String>, role: Role, state: KnowledgeState) -> Self {
        Self {
            content: content.into(),
            role,
            state,
            session_id: None,
            meta: Map::new(),
        }
    }

    /// Record under `session_id` instead of the store default
    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn meta(mut self, meta: Map<String, Value>) -> Self {
        self.meta = meta;
        self
    }

    pub fn meta_kind(self, kind: impl Into<String>) -> Self {
        self.with_meta(meta_keys::KIND, Value::String(kind.into()))
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }
}

/// Result of one completed fossilization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FossilOutcome {
    /// Id of the fossil event, `None` if it collided with a recent one
    pub event_id: Option<String>,
    pub source_count: usize,
    pub source_ids_hash: String,
    pub summary_chars: usize,
    pub summary_ms: u64,
}

/// Snapshot of archive counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    pub recorded: u64,
    pub deduplicated: u64,
    pub fossilized: u64,
    pub fossil_failures: u64,
    pub buffered_items: usize,
    pub buffered_chars: usize,
    pub fossilizing: bool,
}

#[derive(Default)]
struct ArchiveCounters {
    recorded: AtomicU64,
    deduplicated: AtomicU64,
    fossilized: AtomicU64,
    fossil_failures: AtomicU64,
}

struct ArchiveInner {
    config: ArchiveConfig,
    log: AuditLogWriter,
    default_session: String,
    dedup: Mutex<DedupWindow>,
    buffer: Mutex<FossilBuffer>,
    fossilizing: AtomicBool,
    idle: Notify,
    summarizer: Arc<dyn Summarizer>,
    runtime: Handle,
    counters: ArchiveCounters,
}

/// Handle to the archive. Cheap to clone.
#[derive(Clone)]
pub struct ArchiveStore {
    inner: Arc<ArchiveInner>,
}

impl ArchiveStore {
    /// Build a store that writes through `log`.
    ///
    /// Fossilization runs on the Tokio runtime current at construction time.
    pub fn new(
        config: ArchiveConfig,
        log: AuditLogWriter,
        summarizer: Arc<dyn Summarizer>,
    ) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| StrataError::InvalidInput(format!("archive store needs a Tokio runtime: {e}")))?;

        let window = config.effective_dedup_window();
        let default_session = log.session_id().to_string();
        debug!(
            "Archive store ready (session={}, dedup_window={}, summarizer={})",
            default_session,
            window,
            summarizer.name()
        );

        Ok(Self {
            inner: Arc::new(ArchiveInner {
                config,
                log,
                default_session,
                dedup: Mutex::new(DedupWindow::new(window)),
                buffer: Mutex::new(FossilBuffer::new()),
                fossilizing: AtomicBool::new(false),
                idle: Notify::new(),
                summarizer,
                runtime,
                counters: ArchiveCounters::default(),
            }),
        })
    }

    /// Record an event now. Returns false if it was deduplicated.
    pub fn record(&self, record: Record) -> bool {
        self.record_at(record, Local::now())
    }

    /// Record an event stamped `ts`
    pub fn record_at(&self, record: Record, ts: DateTime<Local>) -> bool {
        let state = record.state;
        match self.inner.write_event(record, ts) {
            Some(event) => {
                if state == KnowledgeState::Active {
                    self.buffer_active(&event);
                }
                true
            }
            None => false,
        }
    }

    /// Summarize whatever is buffered, below threshold or not.
    ///
    /// Waits for an in-flight fossilization to finish first. Returns `None`
    /// when the buffer is empty or the summarizer failed.
    pub async fn fossilize_now(&self) -> Option<FossilOutcome> {
        loop {
            if self.inner.begin() {
                let snapshot = self.inner.buffer.lock().take();
                let outcome = if snapshot.is_empty() {
                    None
                } else {
                    self.inner.fossilize(snapshot).await
                };
                self.inner.release();
                self.spawn_if_ready();
                return outcome;
            }
            self.wait_idle().await;
        }
    }

    /// Resolves once no fossilization is in flight
    pub async fn wait_idle(&self) {
        loop {
            let mut notified = std::pin::pin!(self.inner.idle.notified());
            notified.as_mut().enable();
            if !self.inner.fossilizing.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }

    pub fn stats(&self) -> ArchiveStats {
        let counters = &self.inner.counters;
        let (buffered_items, buffered_chars) = {
            let buffer = self.inner.buffer.lock();
            (buffer.len(), buffer.char_sum())
        };
        ArchiveStats {
            recorded: counters.recorded.load(Ordering::Relaxed),
            deduplicated: counters.deduplicated.load(Ordering::Relaxed),
            fossilized: counters.fossilized.load(Ordering::Relaxed),
            fossil_failures: counters.fossil_failures.load(Ordering::Relaxed),
            buffered_items,
            buffered_chars,
            fossilizing: self.inner.fossilizing.load(Ordering::Acquire),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.default_session
    }

    pub fn log_writer(&self) -> &AuditLogWriter {
        &self.inner.log
    }

    pub fn summarizer_name(&self) -> &str {
        self.inner.summarizer.name()
    }

    fn buffer_active(&self, event: &ArchiveEvent) {
        let item = ActiveItem::new(
            event.event_id.clone(),
            event.ts_unix_ms,
            event.role,
            event.meta_kind(),
            event.session_id.clone(),
            &event.content,
            self.inner.config.item_max_chars,
        );

        let ready = {
            let mut buffer = self.inner.buffer.lock();
            buffer.push(item);
            buffer.is_ready(self.inner.thresholds())
        };
        if ready {
            self.spawn_if_ready();
        }
    }

    fn spawn_if_ready(&self) {
        if let Some(snapshot) = self.inner.try_begin() {
            let inner = self.inner.clone();
            self.inner.runtime.spawn(fossilize_loop(inner, snapshot));
        }
    }
}

/// Background loop: fossilize, then keep draining while the buffer refilled
/// past a threshold in the meantime.
async fn fossilize_loop(inner: Arc<ArchiveInner>, mut snapshot: Vec<ActiveItem>) {
    loop {
        inner.fossilize(snapshot).await;

        if let Some(next) = inner.take_ready() {
            debug!("Fossil buffer refilled during summarization ({} items)", next.len());
            snapshot = next;
            continue;
        }

        inner.release();
        // A record may have crossed a threshold between the check and the release.
        match inner.try_begin() {
            Some(next) => snapshot = next,
            None => break,
        }
    }
}

impl ArchiveInner {
    fn thresholds(&self) -> FossilThresholds {
        FossilThresholds {
            max_items: self.config.fossil_max_items,
            max_chars: self.config.fossil_max_chars,
        }
    }

    fn begin(&self) -> bool {
        self.fossilizing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn release(&self) {
        self.fossilizing.store(false, Ordering::Release);
        self.idle.notify_waiters();
    }

    fn take_ready(&self) -> Option<Vec<ActiveItem>> {
        self.buffer.lock().take_if_ready(self.thresholds())
    }

    /// Claim the single-flight slot and drain the buffer if it is ready
    fn try_begin(&self) -> Option<Vec<ActiveItem>> {
        if !self.begin() {
            return None;
        }
        let snapshot = self.take_ready();
        if snapshot.is_none() {
            self.release();
        }
        snapshot
    }

    /// Dedup, decorate and enqueue one event
    fn write_event(&self, record: Record, ts: DateTime<Local>) -> Option<ArchiveEvent> {
        let Record {
            content,
            role,
            state,
            session_id,
            mut meta,
        } = record;
        let session_id = session_id.unwrap_or_else(|| self.default_session.clone());

        let id = event_id(ARCHIVE_KIND, &session_id, &iso_second(&ts), &content);
        if !self.dedup.lock().insert(&id) {
            self.counters.deduplicated.fetch_add(1, Ordering::Relaxed);
            debug!("Deduplicated archive event {}", &id[..12]);
            return None;
        }

        meta.entry(meta_keys::KIND)
            .or_insert_with(|| Value::from(DEFAULT_META_KIND));
        meta.insert(meta_keys::CONTENT_HASH.into(), Value::from(sha256_hex(&content)));
        meta.insert(meta_keys::CONTENT_LEN.into(), Value::from(char_len(&content)));

        let event = ArchiveEvent {
            kind: ARCHIVE_KIND.to_string(),
            schema: ARCHIVE_SCHEMA.to_string(),
            ts: iso_millis(&ts),
            ts_unix_ms: ts.timestamp_millis(),
            event_id: id,
            session_id,
            content,
            role,
            state,
            meta,
        };

        self.log.log(ARCHIVE_KIND, &event);
        self.counters.recorded.fetch_add(1, Ordering::Relaxed);
        Some(event)
    }

    /// Summarize one snapshot and record the fossil plus its transition marker.
    ///
    /// Failures are logged and counted; the snapshot is not re-queued.
    async fn fossilize(&self, items: Vec<ActiveItem>) -> Option<FossilOutcome> {
        if items.is_empty() {
            return None;
        }

        let started = Instant::now();
        let result = AssertUnwindSafe(self.summarizer.summarize(&items))
            .catch_unwind()
            .await;
        let summary_ms = started.elapsed().as_millis() as u64;

        let text = match result {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(
                    "Summarizer {} failed on {} items, dropping snapshot: {}",
                    self.summarizer.name(),
                    items.len(),
                    e
                );
                self.counters.fossil_failures.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Err(_) => {
                error!(
                    "Summarizer {} panicked on {} items, dropping snapshot",
                    self.summarizer.name(),
                    items.len()
                );
                self.counters.fossil_failures.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let summary = truncate_chars(&text, self.config.summary_max_chars).into_owned();
        let ids: Vec<&str> = items.iter().map(|i| i.event_id.as_str()).collect();
        let ids_hash = source_ids_hash(&ids);
        let from = items.iter().map(|i| i.ts_unix_ms).min().unwrap_or_default();
        let to = items.iter().map(|i| i.ts_unix_ms).max().unwrap_or_default();
        let session = items
            .iter()
            .max_by_key(|i| i.ts_unix_ms)
            .map(|i| i.session_id.clone())
            .unwrap_or_else(|| self.default_session.clone());
        let sample: Vec<Value> = ids
            .iter()
            .take(self.config.source_id_sample)
            .map(|id| Value::from(*id))
            .collect();

        let fossil = Record::new(summary.as_str(), Role::Recorder, KnowledgeState::Fossil)
            .session(session.clone())
            .meta_kind(FOSSIL_META_KIND)
            .with_meta(meta_keys::SUMMARY_ENGINE, self.summarizer.name())
            .with_meta(meta_keys::SUMMARY_MS, summary_ms)
            .with_meta(meta_keys::SOURCE_COUNT, items.len())
            .with_meta(meta_keys::FROM_TS_UNIX_MS, from)
            .with_meta(meta_keys::TO_TS_UNIX_MS, to)
            .with_meta(meta_keys::SOURCE_IDS_HASH, ids_hash.clone())
            .with_meta(meta_keys::SOURCE_ID_SAMPLE, Value::Array(sample));
        let fossil_id = self.write_event(fossil, Local::now()).map(|e| e.event_id);

        if self.config.emit_transition_marker {
            let marker = Record::new(
                format!(
                    "{} active events moved to Standby (fossil {})",
                    items.len(),
                    &ids_hash[..12]
                ),
                Role::Recorder,
                KnowledgeState::Standby,
            )
            .session(session)
            .meta_kind(TRANSITION_META_KIND)
            .with_meta("fromState", KnowledgeState::Active.as_str())
            .with_meta("toState", KnowledgeState::Standby.as_str())
            .with_meta(meta_keys::SOURCE_COUNT, items.len())
            .with_meta(meta_keys::SOURCE_IDS_HASH, ids_hash.clone());
            self.write_event(marker, Local::now());
        }

        self.counters.fossilized.fetch_add(1, Ordering::Relaxed);
        info!(
            "Fossilized {} active events in {}ms via {} ({} chars)",
            items.len(),
            summary_ms,
            self.summarizer.name(),
            char_len(&summary)
        );

        Some(FossilOutcome {
            event_id: fossil_id,
            source_count: items.len(),
            source_ids_hash: ids_hash,
            summary_chars: char_len(&summary),
            summary_ms,
        })
    }
}
