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

//! Audit Log Writer - batched, day-partitioned JSON-lines log
//!
//! Callers enqueue fully serialized lines onto an unbounded channel and return
//! immediately. A single background task drains the channel, packs lines into
//! one buffer and appends the buffer to `audit-YYYY-MM-DD.jsonl` with a single
//! write.
//!
//! ```text
//! log()/log_text() ──► mpsc (unbounded) ──► consumer ──► buffer (<= batch_bytes)
//!                                                           │
//!                                                           ▼
//!                                             logs/audit-YYYY-MM-DD.jsonl
//! ```
//!
//! Lines land in enqueue order, which under contention is not wall-clock
//! order. Readers sort by the embedded timestamp.

use chrono::{Duration as ChronoDuration, Local, NaiveDate};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use strata_core::{iso_millis, truncate_chars, AuditLogConfig, DayFilePattern, StrataError};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Suffix of audit day-files
pub const AUDIT_FILE_SUFFIX: &str = ".jsonl";

/// One line on the audit stream
#[derive(Debug, Serialize)]
struct LogLine<'a> {
    ts: String,
    session: &'a str,
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    extra: Option<Value>,
}

enum Command {
    Line(String),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Snapshot of writer counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub enqueued: u64,
    pub written: u64,
    pub dropped: u64,
    pub batches: u64,
    pub bytes: u64,
}

#[derive(Default)]
struct WriterStatsInternal {
    enqueued: AtomicU64,
    written: AtomicU64,
    dropped: AtomicU64,
    batches: AtomicU64,
    bytes: AtomicU64,
}

impl WriterStatsInternal {
    fn snapshot(&self) -> WriterStats {
        WriterStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}

struct WriterShared {
    config: AuditLogConfig,
    session_id: String,
    dir: PathBuf,
    pattern: DayFilePattern,
    closed: AtomicBool,
    stats: WriterStatsInternal,
}

/// Handle to the audit log. Cheap to clone; all clones feed one consumer.
#[derive(Clone)]
pub struct AuditLogWriter {
    sender: mpsc::UnboundedSender<Command>,
    shared: Arc<WriterShared>,
}

impl AuditLogWriter {
    /// Start the writer for `dir`, running the retention sweep first.
    ///
    /// Must be called from within a Tokio runtime; the consumer task is
    /// spawned onto it.
    pub fn start(
        dir: impl Into<PathBuf>,
        session_id: impl Into<String>,
        config: AuditLogConfig,
    ) -> Self {
        let dir = dir.into();
        let pattern = DayFilePattern::new(config.file_prefix.clone(), AUDIT_FILE_SUFFIX);

        if let Err(e) = std::fs::create_dir_all(&dir) {
            warn!("Failed to create audit log dir {:?}: {}", dir, e);
        }
        let removed = sweep_retention(&dir, &pattern, config.retention_days, Local::now().date_naive());
        if removed > 0 {
            info!("Retention sweep removed {} audit day-files", removed);
        }

        let shared = Arc::new(WriterShared {
            config,
            session_id: session_id.into(),
            dir,
            pattern,
            closed: AtomicBool::new(false),
            stats: WriterStatsInternal::default(),
        });

        let (sender, receiver) = mpsc::unbounded_channel();
        let consumer_shared = shared.clone();
        tokio::spawn(async move {
            run_consumer(receiver, consumer_shared).await;
        });

        Self { sender, shared }
    }

    /// Session recorded on every line
    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    /// Directory the day-files are written to
    pub fn dir(&self) -> &Path {
        &self.shared.dir
    }

    /// Day-file naming used by this writer
    pub fn pattern(&self) -> &DayFilePattern {
        &self.shared.pattern
    }

    /// Enqueue `{ts, session, kind, data}`. Never blocks, never fails.
    ///
    /// Strings longer than the field cap are truncated; a payload that cannot
    /// be serialized is replaced by a diagnostic stub.
    pub fn log<T: Serialize + ?Sized>(&self, kind: &str, data: &T) {
        let data = self.capped_value(data);
        self.enqueue(LogLine {
            ts: iso_millis(&Local::now()),
            session: &self.shared.session_id,
            kind,
            data: Some(data),
            text: None,
            extra: None,
        });
    }

    /// Enqueue `{ts, session, kind, text, extra}`
    pub fn log_text(&self, kind: &str, text: &str, extra: Option<Value>) {
        let cap = self.shared.config.field_cap_chars;
        let extra = extra.map(|mut v| {
            cap_strings(&mut v, cap);
            v
        });
        self.enqueue(LogLine {
            ts: iso_millis(&Local::now()),
            session: &self.shared.session_id,
            kind,
            data: None,
            text: Some(truncate_chars(text, cap).into_owned()),
            extra,
        });
    }

    /// Resolves once every line enqueued before this call has been appended
    pub async fn flush(&self) -> strata_core::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(Command::Flush(tx))
            .map_err(|_| StrataError::Closed("audit log writer".into()))?;
        rx.await
            .map_err(|_| StrataError::Closed("audit log writer".into()))
    }

    /// Stop accepting lines, drain the queue and release the file.
    ///
    /// Lines enqueued before the call are never lost. Idempotent.
    pub async fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let (tx, rx) = oneshot::channel();
        if self.sender.send(Command::Shutdown(tx)).is_err() {
            return;
        }
        let _ = rx.await;
        debug!("Audit log writer shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> WriterStats {
        self.shared.stats.snapshot()
    }

    fn capped_value<T: Serialize + ?Sized>(&self, data: &T) -> Value {
        match serde_json::to_value(data) {
            Ok(mut value) => {
                cap_strings(&mut value, self.shared.config.field_cap_chars);
                value
            }
            Err(e) => serde_json::json!({
                "_unserializable": true,
                "type": std::any::type_name::<T>(),
                "error": e.to_string(),
            }),
        }
    }

    fn enqueue(&self, line: LogLine<'_>) {
        let stats = &self.shared.stats;
        if self.is_closed() {
            stats.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let mut serialized = match serde_json::to_string(&line) {
            Ok(s) => s,
            Err(e) => {
                warn!("Dropping unserializable audit line ({}): {}", line.kind, e);
                stats.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        serialized.push('\n');

        match self.sender.send(Command::Line(serialized)) {
            Ok(()) => {
                stats.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Truncate every string in `value` to `cap` chars, recursively
fn cap_strings(value: &mut Value, cap: usize) {
    match value {
        Value::String(s) => {
            if let std::borrow::Cow::Owned(cut) = truncate_chars(s, cap) {
                *s = cut;
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|v| cap_strings(v, cap)),
        Value::Object(map) => map.values_mut().for_each(|v| cap_strings(v, cap)),
        _ => {}
    }
}

/// Consumer loop: one batch per wake-up, bounded by `batch_bytes`
async fn run_consumer(mut receiver: mpsc::UnboundedReceiver<Command>, shared: Arc<WriterShared>) {
    debug!(
        "Audit log consumer started (dir={:?}, batch_bytes={})",
        shared.dir, shared.config.batch_bytes
    );

    let batch_bytes = shared.config.batch_bytes;
    let mut buffer: Vec<u8> = Vec::with_capacity(batch_bytes.min(64 * 1024));
    let mut lines_in_buffer: u64 = 0;
    let mut acks: Vec<oneshot::Sender<()>> = Vec::new();
    let mut stopping = false;

    while let Some(first) = receiver.recv().await {
        let mut next = Some(first);

        // Drain whatever is available right now, up to the batch cap.
        while let Some(cmd) = next.take() {
            match cmd {
                Command::Line(line) => {
                    buffer.extend_from_slice(line.as_bytes());
                    lines_in_buffer += 1;
                }
                Command::Flush(ack) => acks.push(ack),
                Command::Shutdown(ack) => {
                    acks.push(ack);
                    stopping = true;
                    receiver.close();
                }
            }

            if buffer.len() >= batch_bytes {
                append_batch(&shared, &mut buffer, &mut lines_in_buffer).await;
            }

            next = receiver.try_recv().ok();
        }

        append_batch(&shared, &mut buffer, &mut lines_in_buffer).await;
        for ack in acks.drain(..) {
            let _ = ack.send(());
        }

        if stopping {
            break;
        }
    }

    debug!("Audit log consumer exiting");
}

async fn append_batch(shared: &WriterShared, buffer: &mut Vec<u8>, lines: &mut u64) {
    if buffer.is_empty() {
        return;
    }

    let path = shared.pattern.path_in(&shared.dir, Local::now().date_naive());
    let stats = &shared.stats;
    match append_bytes(&path, buffer).await {
        Ok(()) => {
            stats.written.fetch_add(*lines, Ordering::Relaxed);
            stats.batches.fetch_add(1, Ordering::Relaxed);
            stats.bytes.fetch_add(buffer.len() as u64, Ordering::Relaxed);
        }
        Err(e) => {
            warn!("Failed to append {} audit lines to {:?}: {}", lines, path, e);
            stats.dropped.fetch_add(*lines, Ordering::Relaxed);
        }
    }

    buffer.clear();
    *lines = 0;
}

async fn append_bytes(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    Ok(())
}

/// Delete day-files dated more than `retention_days` before `today`.
///
/// Best-effort: failures are logged and skipped. `retention_days == 0`
/// disables the sweep. Returns the number of files removed.
pub fn sweep_retention(
    dir: &Path,
    pattern: &DayFilePattern,
    retention_days: u32,
    today: NaiveDate,
) -> usize {
    if retention_days == 0 {
        return 0;
    }
    let cutoff = today - ChronoDuration::days(i64::from(retention_days));

    let mut removed = 0;
    for (date, path) in pattern.list(dir) {
        if date >= cutoff {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to remove expired day-file {:?}: {}", path, e),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn read_lines(writer: &AuditLogWriter) -> Vec<Value> {
        let path = writer
            .pattern()
            .path_in(writer.dir(), Local::now().date_naive());
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_lines_written_in_enqueue_order() {
        let dir = tempdir().unwrap();
        let writer = AuditLogWriter::start(dir.path(), "session-1", AuditLogConfig::default());

        for i in 0..100 {
            writer.log("tick", &serde_json::json!({ "i": i }));
        }
        writer.flush().await.unwrap();

        let lines = read_lines(&writer);
        assert_eq!(lines.len(), 100);
        for (i, line) in lines.iter().enumerate() {
            assert_eq!(line["kind"], "tick");
            assert_eq!(line["session"], "session-1");
            assert_eq!(line["data"]["i"], i as u64);
            assert!(line["ts"].is_string());
        }
        assert_eq!(writer.stats().written, 100);
    }

    #[tokio::test]
    async fn test_small_batches_split_appends() {
        let dir = tempdir().unwrap();
        let config = AuditLogConfig {
            batch_bytes: 64,
            ..Default::default()
        };
        let writer = AuditLogWriter::start(dir.path(), "s", config);

        for i in 0..20 {
            writer.log("tick", &serde_json::json!({ "i": i }));
        }
        writer.flush().await.unwrap();

        assert_eq!(read_lines(&writer).len(), 20);
        assert!(writer.stats().batches > 1);
    }

    #[tokio::test]
    async fn test_field_cap_truncates_strings() {
        let dir = tempdir().unwrap();
        let config = AuditLogConfig {
            field_cap_chars: 10,
            ..Default::default()
        };
        let writer = AuditLogWriter::start(dir.path(), "s", config);

        writer.log(
            "big",
            &serde_json::json!({ "body": "y".repeat(100), "nested": ["z".repeat(50)] }),
        );
        writer.log_text("note", &"t".repeat(30), None);
        writer.flush().await.unwrap();

        let lines = read_lines(&writer);
        assert_eq!(lines[0]["data"]["body"], format!("{}…", "y".repeat(10)));
        assert_eq!(lines[0]["data"]["nested"][0], format!("{}…", "z".repeat(10)));
        assert_eq!(lines[1]["text"], format!("{}…", "t".repeat(10)));
        assert!(lines[1].get("data").is_none());
    }

    #[tokio::test]
    async fn test_unserializable_payload_degrades_to_stub() {
        let dir = tempdir().unwrap();
        let writer = AuditLogWriter::start(dir.path(), "s", AuditLogConfig::default());

        // Non-string map keys cannot become JSON object keys.
        let mut bad: HashMap<(u8, u8), u8> = HashMap::new();
        bad.insert((1, 2), 3);
        writer.log("bad", &bad);
        writer.flush().await.unwrap();

        let lines = read_lines(&writer);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["data"]["_unserializable"], true);
    }

    #[tokio::test]
    async fn test_shutdown_drains_then_drops() {
        let dir = tempdir().unwrap();
        let writer = AuditLogWriter::start(dir.path(), "s", AuditLogConfig::default());

        for i in 0..50 {
            writer.log("before", &i);
        }
        writer.shutdown().await;
        writer.log("after", &1);
        writer.shutdown().await;

        let lines = read_lines(&writer);
        assert_eq!(lines.len(), 50);
        assert!(lines.iter().all(|l| l["kind"] == "before"));
        assert_eq!(writer.stats().dropped, 1);
        assert!(writer.flush().await.is_err());
    }

    #[test]
    fn test_retention_sweep() {
        let dir = tempdir().unwrap();
        let pattern = DayFilePattern::new("audit-", AUDIT_FILE_SUFFIX);
        let today = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();

        for offset in [0i64, 5, 30, 31, 90] {
            let date = today - ChronoDuration::days(offset);
            std::fs::write(pattern.path_in(dir.path(), date), "{}\n").unwrap();
        }
        std::fs::write(dir.path().join("keep.txt"), "x").unwrap();

        let removed = sweep_retention(dir.path(), &pattern, 30, today);
        assert_eq!(removed, 2);
        assert_eq!(pattern.list(dir.path()).len(), 3);
        assert!(dir.path().join("keep.txt").exists());

        assert_eq!(sweep_retention(dir.path(), &pattern, 0, today), 0);
    }
}
