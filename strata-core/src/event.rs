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

//! Archive event model
//!
//! Archive events are the immutable records the archive store writes onto the
//! audit stream. Readers recognise them by `kind == "archive"` (any case) and
//! an exact schema string; everything else on the stream is ignored.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Audit-stream kind carried by every archive event
pub const ARCHIVE_KIND: &str = "archive";

/// Wire schema of archive events
pub const ARCHIVE_SCHEMA: &str = "jarvis.archive.v1";

/// Wire schema of inbox envelopes
pub const INBOX_SCHEMA: &str = "jarvis.inbox.v1";

/// Well-known `meta` keys
pub mod meta_keys {
    pub const KIND: &str = "kind";
    pub const CONTENT_HASH: &str = "contentHash";
    pub const CONTENT_LEN: &str = "contentLen";
    pub const SUMMARY_ENGINE: &str = "summaryEngine";
    pub const SUMMARY_MS: &str = "summaryMs";
    pub const SOURCE_COUNT: &str = "sourceCount";
    pub const FROM_TS_UNIX_MS: &str = "fromTsUnixMs";
    pub const TO_TS_UNIX_MS: &str = "toTsUnixMs";
    pub const SOURCE_IDS_HASH: &str = "sourceIdsHash";
    pub const SOURCE_ID_SAMPLE: &str = "sourceIdSample";
}

/// Kind assigned when the caller supplies no `meta.kind`
pub const DEFAULT_META_KIND: &str = "note";

/// Which facet of the assistant produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum Role {
    Logician,
    Emotionist,
    StoryArchitect,
    Connectors,
    Ethicist,
    Recorder,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Logician,
        Role::Emotionist,
        Role::StoryArchitect,
        Role::Connectors,
        Role::Ethicist,
        Role::Recorder,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Logician => "Logician",
            Role::Emotionist => "Emotionist",
            Role::StoryArchitect => "StoryArchitect",
            Role::Connectors => "Connectors",
            Role::Ethicist => "Ethicist",
            Role::Recorder => "Recorder",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .iter()
            .copied()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown role: {s}"))
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Lifecycle state of a knowledge record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum KnowledgeState {
    /// Freshly recorded, buffered for fossilization
    Active,
    /// Just summarized into a fossil
    Standby,
    /// System bookkeeping
    Idle,
    /// The summary itself
    Fossil,
}

impl KnowledgeState {
    pub const ALL: [KnowledgeState; 4] = [
        KnowledgeState::Active,
        KnowledgeState::Standby,
        KnowledgeState::Idle,
        KnowledgeState::Fossil,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KnowledgeState::Active => "Active",
            KnowledgeState::Standby => "Standby",
            KnowledgeState::Idle => "Idle",
            KnowledgeState::Fossil => "Fossil",
        }
    }
}

impl fmt::Display for KnowledgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KnowledgeState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KnowledgeState::ALL
            .iter()
            .copied()
            .find(|st| st.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown state: {s}"))
    }
}

impl TryFrom<String> for KnowledgeState {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One immutable archive record as it appears on the audit stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveEvent {
    pub kind: String,
    pub schema: String,
    /// ISO-8601 local timestamp with millisecond precision
    pub ts: String,
    pub ts_unix_ms: i64,
    /// 64 hex chars, see [`crate::hashing::event_id`]
    pub event_id: String,
    #[serde(default)]
    pub session_id: String,
    pub content: String,
    pub role: Role,
    pub state: KnowledgeState,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

impl ArchiveEvent {
    /// `meta.kind`, falling back to [`DEFAULT_META_KIND`]
    pub fn meta_kind(&self) -> &str {
        self.meta
            .get(meta_keys::KIND)
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_META_KIND)
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta.get(key).and_then(Value::as_str)
    }

    pub fn meta_i64(&self, key: &str) -> Option<i64> {
        self.meta.get(key).and_then(Value::as_i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_parse_is_case_insensitive() {
        assert_eq!("fossil".parse::<KnowledgeState>(), Ok(KnowledgeState::Fossil));
        assert_eq!("ACTIVE".parse::<KnowledgeState>(), Ok(KnowledgeState::Active));
        assert!("buried".parse::<KnowledgeState>().is_err());
    }

    #[test]
    fn test_role_wire_names() {
        let json = serde_json::to_string(&Role::StoryArchitect).unwrap();
        assert_eq!(json, "\"StoryArchitect\"");
        let back: Role = serde_json::from_str("\"storyarchitect\"").unwrap();
        assert_eq!(back, Role::StoryArchitect);
    }

    #[test]
    fn test_event_wire_shape() {
        let mut meta = Map::new();
        meta.insert(meta_keys::KIND.into(), Value::from("chat"));
        let event = ArchiveEvent {
            kind: ARCHIVE_KIND.into(),
            schema: ARCHIVE_SCHEMA.into(),
            ts: "2026-10-19T10:00:00.000+00:00".into(),
            ts_unix_ms: 1_792_404_000_000,
            event_id: "ab".repeat(32),
            session_id: "s1".into(),
            content: "hello".into(),
            role: Role::Logician,
            state: KnowledgeState::Active,
            meta,
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "archive");
        assert_eq!(value["schema"], "jarvis.archive.v1");
        assert_eq!(value["tsUnixMs"], 1_792_404_000_000i64);
        assert_eq!(value["state"], "Active");
        assert_eq!(value["meta"]["kind"], "chat");
        assert_eq!(event.meta_kind(), "chat");
    }
}
