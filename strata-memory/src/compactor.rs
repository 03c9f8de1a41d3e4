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

//! Inbox Compactor
//!
//! Folds the raw inbox stream into per-room chat session transcripts under
//! `history/<room>/<session-id>.json`.
//!
//! Each run resumes every pending day from its checkpointed byte offset. A
//! day is pending exactly when its data file exists and its `.compacted.ok`
//! marker does not; the list is re-derived from disk on every run.
//!
//! Only complete lines are consumed. Chat messages are split into segments
//! per room, bounded by `...RequestStarted` markers. The segment still open
//! at the end of a run is remembered in the checkpoint so the next run keeps
//! extending the same session. Segments with no user message yet are staged
//! until one arrives. Session files are merged with what is already
//! on disk and only rewritten when their bytes change, which makes re-running
//! a no-op.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use strata_core::{iso_millis, parse_iso, truncate_chars, InboxConfig, Result, StrataError};
use strata_storage::{is_done, mark_done, write_atomic, Checkpoint, InboxDay, InboxEnvelope};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Suffix of inbox kinds that open a new segment, compared case-insensitively
pub const BOUNDARY_KIND_SUFFIX: &str = "requeststarted";

/// Room used when an event names none
pub const DEFAULT_ROOM: &str = "default";

/// Directory under `history/` holding segments that have no user message yet
const PENDING_DIR: &str = ".pending";

/// One line of a compacted transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub text: String,
    pub ts: String,
}

impl ChatMessage {
    pub fn is_user(&self) -> bool {
        self.role.eq_ignore_ascii_case("user")
    }
}

/// Compacted conversation, one file per session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub room: String,
    pub title: String,
    pub created_at: String,
    pub messages: Vec<ChatMessage>,
}

/// Totals of one compaction run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionReport {
    pub days_processed: usize,
    pub days_completed: usize,
    pub messages: usize,
    pub sessions_written: usize,
    pub bytes_consumed: u64,
}

#[derive(Debug, Default)]
struct DayReport {
    completed: bool,
    messages: usize,
    sessions_written: usize,
    bytes_consumed: u64,
}

/// A classified inbox line
#[derive(Debug, Clone, PartialEq)]
enum InboxLine {
    Boundary {
        room: String,
        at: DateTime<FixedOffset>,
    },
    Message {
        room: String,
        at: DateTime<FixedOffset>,
        message: ChatMessage,
    },
}

pub struct InboxCompactor {
    inbox_dir: PathBuf,
    history_dir: PathBuf,
    config: InboxConfig,
}

impl InboxCompactor {
    pub fn new(
        inbox_dir: impl Into<PathBuf>,
        history_dir: impl Into<PathBuf>,
        config: InboxConfig,
    ) -> Self {
        Self {
            inbox_dir: inbox_dir.into(),
            history_dir: history_dir.into(),
            config,
        }
    }

    pub fn inbox_dir(&self) -> &Path {
        &self.inbox_dir
    }

    pub fn history_dir(&self) -> &Path {
        &self.history_dir
    }

    /// Days with a data file and no done marker, oldest first
    pub fn pending_days(&self) -> Vec<InboxDay> {
        let mut days: Vec<InboxDay> = InboxDay::list(&self.inbox_dir)
            .into_iter()
            .filter(|day| !is_done(&day.marker))
            .collect();
        days.reverse();
        days
    }

    /// Compact every pending day; returns the number of days processed
    pub fn compact_pending(&self) -> Result<usize> {
        self.run(&CancellationToken::new())
            .map(|report| report.days_processed)
    }

    /// Compact every pending day, stopping between days once `cancel` fires.
    ///
    /// A failing day is logged and skipped; the others still run.
    pub fn run(&self, cancel: &CancellationToken) -> Result<CompactionReport> {
        let mut report = CompactionReport::default();

        for day in self.pending_days() {
            if cancel.is_cancelled() {
                debug!("Compaction cancelled after {} days", report.days_processed);
                return Err(StrataError::Cancelled);
            }

            match self.compact_day(&day) {
                Ok(Some(day_report)) => {
                    report.days_processed += 1;
                    report.days_completed += usize::from(day_report.completed);
                    report.messages += day_report.messages;
                    report.sessions_written += day_report.sessions_written;
                    report.bytes_consumed += day_report.bytes_consumed;
                }
                Ok(None) => {}
                Err(e) => warn!("Failed to compact inbox day {}: {}", day.date, e),
            }
        }

        if report.sessions_written > 0 {
            info!(
                "Compacted {} inbox days: {} messages, {} sessions written",
                report.days_processed, report.messages, report.sessions_written
            );
        }
        Ok(report)
    }

    fn compact_day(&self, day: &InboxDay) -> Result<Option<DayReport>> {
        let len = match std::fs::metadata(&day.data) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut checkpoint = Checkpoint::load(&day.checkpoint);
        let offset = checkpoint.byte_offset;
        if offset > len {
            // Parked until the next append clears the marker.
            warn!(
                "Checkpoint for {} is past end of file ({} > {}), marking day done",
                day.date, offset, len
            );
            mark_done(&day.marker)?;
            return Ok(None);
        }

        let mut chunk = Vec::with_capacity((len - offset) as usize);
        let mut file = File::open(&day.data)?;
        file.seek(SeekFrom::Start(offset))?;
        file.take(len - offset).read_to_end(&mut chunk)?;

        // A trailing partial line belongs to an append still in progress.
        let consumed = chunk
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |pos| pos + 1);

        let lines: Vec<InboxLine> = chunk[..consumed]
            .split(|&b| b == b'\n')
            .filter(|line| !line.is_empty())
            .filter_map(|line| match serde_json::from_slice::<InboxEnvelope>(line) {
                Ok(envelope) => classify(&envelope),
                Err(e) => {
                    debug!("Skipping malformed inbox line in {}: {}", day.date, e);
                    None
                }
            })
            .collect();

        let open: BTreeMap<String, DateTime<FixedOffset>> = checkpoint
            .open_segments
            .iter()
            .filter_map(|(room, ts)| Some((room.clone(), parse_iso(ts)?)))
            .collect();
        let segmented = segment(&lines, &open);

        let mut report = DayReport {
            messages: lines
                .iter()
                .filter(|l| matches!(l, InboxLine::Message { .. }))
                .count(),
            ..Default::default()
        };

        for ((room, start), messages) in &segmented.segments {
            if self.upsert_session(room, *start, messages)? {
                report.sessions_written += 1;
            }
        }

        for (room, start) in segmented.open {
            checkpoint
                .open_segments
                .insert(room, iso_millis(&start));
        }

        let new_offset = offset + consumed as u64;
        checkpoint.advance(&day.checkpoint, new_offset)?;
        report.bytes_consumed = consumed as u64;

        if new_offset == len {
            report.completed = finish_day(day, new_offset)?;
        }

        debug!(
            "Compacted inbox day {}: {} bytes, {} messages, {} sessions written",
            day.date, consumed, report.messages, report.sessions_written
        );
        Ok(Some(report))
    }

    /// Merge `messages` into the session file for `(start, room)`.
    ///
    /// A segment without a user message yet is staged under
    /// `history/.pending/` so an earlier run's messages survive until the
    /// session can be written. Returns true if the session file was
    /// (re)written.
    fn upsert_session(
        &self,
        room: &str,
        start: DateTime<FixedOffset>,
        messages: &[(DateTime<FixedOffset>, ChatMessage)],
    ) -> Result<bool> {
        let id = session_id(start, room);
        let room_dir = room_dir_name(room);
        let path = self.history_dir.join(&room_dir).join(format!("{id}.json"));
        let staged_path = self
            .history_dir
            .join(PENDING_DIR)
            .join(&room_dir)
            .join(format!("{id}.json"));

        let existing = read_optional(&path)?;
        let staged = read_optional(&staged_path)?;

        let previous = existing
            .as_deref()
            .and_then(|bytes| match serde_json::from_slice::<ChatSession>(bytes) {
                Ok(session) => Some(session.messages),
                Err(e) => {
                    warn!("Replacing unreadable session file {:?}: {}", path, e);
                    None
                }
            })
            .unwrap_or_default();
        let held = staged
            .as_deref()
            .and_then(|bytes| match serde_json::from_slice::<Vec<ChatMessage>>(bytes) {
                Ok(held) => Some(held),
                Err(e) => {
                    warn!("Dropping unreadable staged segment {:?}: {}", staged_path, e);
                    None
                }
            })
            .unwrap_or_default();

        let mut merged: Vec<(i64, ChatMessage)> = Vec::new();
        let mut seen: HashSet<(String, String, String)> = HashSet::new();

        let incoming = messages.iter().map(|(at, m)| (at.timestamp_millis(), m.clone()));
        let stored = previous.into_iter().chain(held).map(|m| {
            let at = parse_iso(&m.ts).map_or(i64::MAX, |ts| ts.timestamp_millis());
            (at, m)
        });
        for (at, message) in stored.chain(incoming) {
            let key = (message.ts.clone(), message.role.clone(), message.text.clone());
            if seen.insert(key) {
                merged.push((at, message));
            }
        }
        merged.sort_by_key(|(at, _)| *at);

        let Some(first_user) = merged.iter().find(|(_, m)| m.is_user()) else {
            let held: Vec<ChatMessage> = merged.into_iter().map(|(_, m)| m).collect();
            let bytes = serde_json::to_vec_pretty(&held)?;
            if staged.as_deref() != Some(bytes.as_slice()) {
                write_atomic(&staged_path, &bytes)?;
                debug!("Staged {} messages of session {} in {}", held.len(), id, room);
            }
            return Ok(false);
        };

        let session = ChatSession {
            id,
            room: room.to_string(),
            title: session_title(&first_user.1.text, self.config.title_max_chars),
            created_at: iso_millis(&start),
            messages: merged.into_iter().map(|(_, m)| m).collect(),
        };

        let bytes = serde_json::to_vec_pretty(&session)?;
        let changed = existing.as_deref() != Some(bytes.as_slice());
        if changed {
            write_atomic(&path, &bytes)?;
        }
        if staged.is_some() {
            remove_if_present(&staged_path)?;
        }
        Ok(changed)
    }
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Mark `day` done if its data file still ends at `consumed`.
///
/// An append racing the run clears the marker only if it exists, so the
/// length is checked again after the marker is written.
fn finish_day(day: &InboxDay, consumed: u64) -> Result<bool> {
    mark_done(&day.marker)?;
    let len = std::fs::metadata(&day.data)?.len();
    if len > consumed {
        remove_if_present(&day.marker)?;
        debug!("Inbox day {} grew to {} bytes during compaction", day.date, len);
        return Ok(false);
    }
    Ok(true)
}

/// Recognise boundary markers and chat messages; everything else is ignored
fn classify(envelope: &InboxEnvelope) -> Option<InboxLine> {
    let data = &envelope.data;
    let str_field = |key: &str| data.get(key).and_then(Value::as_str).map(str::trim);
    let at = str_field("ts")
        .and_then(parse_iso)
        .or_else(|| parse_iso(&envelope.ts))?;

    let kind = envelope.kind.trim();
    let lower = kind.to_ascii_lowercase();
    if lower.ends_with(BOUNDARY_KIND_SUFFIX) {
        let room = match str_field("room") {
            Some(room) if !room.is_empty() => room.to_string(),
            _ => {
                let prefix = &lower[..lower.len() - BOUNDARY_KIND_SUFFIX.len()];
                let prefix = prefix.trim_end_matches(['.', '_', '-', ':']);
                if prefix.is_empty() {
                    DEFAULT_ROOM.to_string()
                } else {
                    prefix.to_string()
                }
            }
        };
        return Some(InboxLine::Boundary { room, at });
    }

    let text = str_field("text")?;
    let role = str_field("role")?;
    if text.is_empty() || role.is_empty() {
        return None;
    }
    let room = str_field("room")
        .filter(|r| !r.is_empty())
        .unwrap_or(DEFAULT_ROOM)
        .to_string();

    Some(InboxLine::Message {
        room,
        at,
        message: ChatMessage {
            role: role.to_string(),
            text: text.to_string(),
            ts: iso_millis(&at),
        },
    })
}

type SegmentKey = (String, DateTime<FixedOffset>);

#[derive(Debug, Default)]
struct Segmented {
    segments: BTreeMap<SegmentKey, Vec<(DateTime<FixedOffset>, ChatMessage)>>,
    /// Latest segment start per room, carried into the next run
    open: BTreeMap<String, DateTime<FixedOffset>>,
}

/// Group messages into per-room segments.
///
/// A message belongs to the latest boundary at or before its timestamp. With
/// no such boundary (and nothing carried over) the segment starts at the
/// room's earliest unbounded message.
fn segment(lines: &[InboxLine], carried: &BTreeMap<String, DateTime<FixedOffset>>) -> Segmented {
    let mut starts: BTreeMap<&str, Vec<DateTime<FixedOffset>>> = BTreeMap::new();
    for (room, at) in carried {
        starts.entry(room.as_str()).or_default().push(*at);
    }
    for line in lines {
        if let InboxLine::Boundary { room, at } = line {
            starts.entry(room.as_str()).or_default().push(*at);
        }
    }
    for list in starts.values_mut() {
        list.sort();
        list.dedup();
    }

    let mut fallback: BTreeMap<&str, DateTime<FixedOffset>> = BTreeMap::new();
    for line in lines {
        if let InboxLine::Message { room, at, .. } = line {
            let bounded = starts
                .get(room.as_str())
                .is_some_and(|list| list.first().is_some_and(|first| first <= at));
            if !bounded {
                let entry = fallback.entry(room.as_str()).or_insert(*at);
                if at < entry {
                    *entry = *at;
                }
            }
        }
    }

    let mut out = Segmented::default();
    for line in lines {
        let InboxLine::Message { room, at, message } = line else {
            continue;
        };
        let start = starts
            .get(room.as_str())
            .and_then(|list| list.iter().rev().find(|s| *s <= at).copied())
            .or_else(|| fallback.get(room.as_str()).copied())
            .unwrap_or(*at);
        out.segments
            .entry((room.clone(), start))
            .or_default()
            .push((*at, message.clone()));
    }

    for (room, list) in &starts {
        if let Some(last) = list.last() {
            out.open.insert(room.to_string(), *last);
        }
    }
    for (room, start) in fallback {
        out.open.entry(room.to_string()).or_insert(start);
    }
    out
}

/// Deterministic id of the session starting at `start` in `room`
pub fn session_id(start: DateTime<FixedOffset>, room: &str) -> String {
    let utc = start.with_timezone(&Utc);
    let hash = blake3::hash(format!("{}|{}", utc.timestamp_millis(), room).as_bytes());
    let hex = hash.to_hex();
    format!("{}-{}", utc.format("%Y%m%d-%H%M%S"), &hex.as_str()[..8])
}

/// First user message cut to `max_chars`, ellipsis included
pub fn session_title(text: &str, max_chars: usize) -> String {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    if line.chars().count() <= max_chars {
        line.to_string()
    } else {
        truncate_chars(line, max_chars.saturating_sub(1)).into_owned()
    }
}

/// Room names become directory names; anything unusual is replaced
fn room_dir_name(room: &str) -> String {
    let name: String = room
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.is_empty() {
        DEFAULT_ROOM.to_string()
    } else {
        name
    }
}
