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

//! Inbox Writer - append-only event stream with a byte-offset side index
//!
//! # File layout
//!
//! ```text
//! inbox/daily/events-YYYY-MM-DD.jsonl         one envelope per line
//! inbox/daily/events-YYYY-MM-DD.idx.jsonl     kind \t start_offset \t length \n
//! inbox/daily/events-YYYY-MM-DD.cp.json       compactor checkpoint
//! inbox/daily/events-YYYY-MM-DD.compacted.ok  done marker
//! ```
//!
//! Appends are serialized by a process-wide mutex around
//! open/seek/write/flush and are synced to disk before returning. An append
//! removes the day's done marker so the compactor picks the day up again.

use chrono::{DateTime, Local, NaiveDate};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use strata_core::{iso_millis, DayFilePattern, Result, INBOX_SCHEMA};
use tracing::warn;

/// Prefix of inbox day-files
pub const INBOX_FILE_PREFIX: &str = "events-";

/// Suffix of inbox day-files
pub const INBOX_FILE_SUFFIX: &str = ".jsonl";

/// One inbox event as stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboxEnvelope {
    pub schema: String,
    pub ts: String,
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

/// One line of the side index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub kind: String,
    pub start_offset: u64,
    pub length: u64,
}

impl IndexEntry {
    fn to_line(&self) -> String {
        format!("{}\t{}\t{}\n", self.kind, self.start_offset, self.length)
    }

    fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split('\t');
        let kind = parts.next()?.to_string();
        let start_offset = parts.next()?.trim().parse().ok()?;
        let length = parts.next()?.trim().parse().ok()?;
        Some(Self {
            kind,
            start_offset,
            length,
        })
    }
}

/// Every path belonging to one inbox day
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxDay {
    pub date: NaiveDate,
    pub data: PathBuf,
    pub index: PathBuf,
    pub checkpoint: PathBuf,
    pub marker: PathBuf,
}

impl InboxDay {
    pub fn new(dir: &Path, date: NaiveDate) -> Self {
        let stem = format!("{}{}", INBOX_FILE_PREFIX, date.format("%Y-%m-%d"));
        Self {
            date,
            data: dir.join(format!("{stem}{INBOX_FILE_SUFFIX}")),
            index: dir.join(format!("{stem}.idx.jsonl")),
            checkpoint: dir.join(format!("{stem}.cp.json")),
            marker: dir.join(format!("{stem}.compacted.ok")),
        }
    }

    /// Days whose data file exists, newest first
    pub fn list(dir: &Path) -> Vec<InboxDay> {
        inbox_pattern()
            .list(dir)
            .into_iter()
            .map(|(date, _)| InboxDay::new(dir, date))
            .collect()
    }
}

/// Day-file naming of the inbox stream
pub fn inbox_pattern() -> DayFilePattern {
    DayFilePattern::new(INBOX_FILE_PREFIX, INBOX_FILE_SUFFIX)
}

/// Appender for the inbox stream
pub struct InboxWriter {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl InboxWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Fire-and-forget append; failures are logged and dropped
    pub fn append(&self, kind: &str, data: Value) {
        if let Err(e) = self.try_append(kind, data) {
            warn!("Dropping inbox event {}: {}", kind, e);
        }
    }

    /// Append stamped with the current local time
    pub fn try_append(&self, kind: &str, data: Value) -> Result<IndexEntry> {
        self.try_append_at(kind, data, Local::now())
    }

    /// Append with an explicit timestamp; the timestamp picks the day-file
    pub fn try_append_at(
        &self,
        kind: &str,
        data: Value,
        at: DateTime<Local>,
    ) -> Result<IndexEntry> {
        let envelope = InboxEnvelope {
            schema: INBOX_SCHEMA.to_string(),
            ts: iso_millis(&at),
            kind: kind.to_string(),
            data,
        };
        let mut line = serde_json::to_string(&envelope)?;
        line.push('\n');

        let day = InboxDay::new(&self.dir, at.date_naive());

        let _guard = self.write_lock.lock();
        std::fs::create_dir_all(&self.dir)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&day.data)?;
        let start_offset = file.metadata()?.len();
        file.write_all(line.as_bytes())?;
        file.flush()?;
        file.sync_data()?;

        let entry = IndexEntry {
            kind: sanitize_index_field(kind),
            start_offset,
            length: line.len() as u64,
        };
        let mut index = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&day.index)?;
        index.write_all(entry.to_line().as_bytes())?;
        index.flush()?;
        index.sync_data()?;

        match std::fs::remove_file(&day.marker) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to clear compaction marker {:?}: {}", day.marker, e),
        }

        Ok(entry)
    }

    /// Parse a day's side index; malformed lines are skipped
    pub fn read_index(&self, date: NaiveDate) -> Result<Vec<IndexEntry>> {
        let day = InboxDay::new(&self.dir, date);
        let raw = match std::fs::read_to_string(&day.index) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(raw.lines().filter_map(IndexEntry::parse).collect())
    }
}

fn sanitize_index_field(kind: &str) -> String {
    kind.chars()
        .map(|c| if c == '\t' || c == '\n' || c == '\r' { ' ' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn at(h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 10, 19, h, m, 0).unwrap()
    }

    #[test]
    fn test_append_writes_line_and_index() {
        let dir = tempdir().unwrap();
        let writer = InboxWriter::new(dir.path());

        let first = writer
            .try_append_at("chat.message", serde_json::json!({"text": "hi"}), at(9, 0))
            .unwrap();
        let second = writer
            .try_append_at("DuoRequestStarted", serde_json::json!({"room": "duo"}), at(9, 1))
            .unwrap();

        assert_eq!(first.start_offset, 0);
        assert_eq!(second.start_offset, first.length);

        let day = InboxDay::new(dir.path(), at(9, 0).date_naive());
        let raw = std::fs::read(&day.data).unwrap();
        assert_eq!(raw.len() as u64, first.length + second.length);

        let slice = &raw[second.start_offset as usize..(second.start_offset + second.length) as usize];
        let envelope: InboxEnvelope = serde_json::from_slice(slice).unwrap();
        assert_eq!(envelope.schema, INBOX_SCHEMA);
        assert_eq!(envelope.kind, "DuoRequestStarted");
        assert_eq!(envelope.data["room"], "duo");

        let index = writer.read_index(day.date).unwrap();
        assert_eq!(index, vec![first, second]);
        let idx_raw = std::fs::read_to_string(&day.index).unwrap();
        assert!(idx_raw.starts_with("chat.message\t0\t"));
    }

    #[test]
    fn test_append_clears_done_marker() {
        let dir = tempdir().unwrap();
        let writer = InboxWriter::new(dir.path());
        let day = InboxDay::new(dir.path(), at(10, 0).date_naive());

        writer.append("note", serde_json::json!({}));
        writer
            .try_append_at("note", serde_json::json!({}), at(10, 0))
            .unwrap();
        std::fs::write(&day.marker, "done").unwrap();

        writer
            .try_append_at("note", serde_json::json!({}), at(10, 5))
            .unwrap();
        assert!(!day.marker.exists());
    }

    #[test]
    fn test_index_kind_sanitized() {
        let dir = tempdir().unwrap();
        let writer = InboxWriter::new(dir.path());
        let entry = writer
            .try_append_at("bad\tkind\n", serde_json::json!(null), at(11, 0))
            .unwrap();
        assert_eq!(entry.kind, "bad kind ");
        assert_eq!(writer.read_index(at(11, 0).date_naive()).unwrap().len(), 1);
    }

    #[test]
    fn test_list_ignores_sidecars() {
        let dir = tempdir().unwrap();
        let writer = InboxWriter::new(dir.path());
        writer
            .try_append_at("note", serde_json::json!({}), at(12, 0))
            .unwrap();

        let days = InboxDay::list(dir.path());
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].date, at(12, 0).date_naive());
    }
}
