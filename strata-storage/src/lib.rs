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

//! Strata Storage Layer
//!
//! Append-only, day-partitioned JSON-lines storage used by the archive:
//!
//! - **Audit log**: batched writer with a single background consumer
//!   ([`AuditLogWriter`]), retention sweep at startup
//! - **Inbox**: mutex-serialized, fsynced appends with a byte-offset side index
//!   ([`InboxWriter`])
//! - **Checkpoints**: atomic byte-offset checkpoints and done markers consumed
//!   by the inbox compactor
//!
//! A given day-file has exactly one writer role; readers tolerate concurrent
//! appends by skipping lines they cannot parse.

pub mod audit_log;
pub mod checkpoint;
pub mod inbox;

pub use audit_log::{sweep_retention, AuditLogWriter, WriterStats, AUDIT_FILE_SUFFIX};
pub use checkpoint::{is_done, mark_done, write_atomic, Checkpoint};
pub use inbox::{
    inbox_pattern, IndexEntry, InboxDay, InboxEnvelope, InboxWriter, INBOX_FILE_PREFIX,
    INBOX_FILE_SUFFIX,
};
