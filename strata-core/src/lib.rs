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

//! Strata Core
//!
//! Shared vocabulary of the knowledge archive: the archive event model,
//! content-derived identifiers, configuration and the error type used by
//! every other strata crate.

pub mod config;
pub mod error;
pub mod event;
pub mod hashing;
pub mod text;
pub mod time;

pub use config::{
    ArchiveConfig, AuditLogConfig, InboxConfig, LoggingConfig, QueryConfig, StrataConfig,
    MAX_SCAN_DAYS, MIN_DEDUP_WINDOW,
};
pub use error::{Result, StrataError};
pub use event::{
    meta_keys, ArchiveEvent, KnowledgeState, Role, ARCHIVE_KIND, ARCHIVE_SCHEMA,
    DEFAULT_META_KIND, INBOX_SCHEMA,
};
pub use hashing::{event_id, sha256_hex, source_ids_hash};
pub use text::{char_len, truncate_chars, ELLIPSIS};
pub use time::{iso_millis, iso_second, iso_to_unix_ms, local_today, parse_iso, DayFilePattern};
