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

//! Strata Memory
//!
//! The domain layer of the knowledge archive:
//! - **Archive Store**: records typed knowledge events, dedups them by a
//!   content-derived id and fossilizes bursts of Active events into summaries
//! - **Summarizers**: the pluggable strategy fossilization calls, plus a
//!   rule-based fallback that needs no model
//! - **Inbox Compactor**: folds the raw inbox stream into per-room chat
//!   session transcripts, incrementally and idempotently
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                      Archive Store                        │
//! │  ┌──────────────┐   ┌──────────────┐   ┌───────────────┐  │
//! │  │ Dedup Window │──►│ Fossil Buffer│──►│  Summarizer   │  │
//! │  └──────────────┘   └──────────────┘   └───────┬───────┘  │
//! │         │                                      │          │
//! │  ┌──────▼──────────────────────────────────────▼───────┐  │
//! │  │         Audit log (strata-storage, batched)         │  │
//! │  └─────────────────────────────────────────────────────┘  │
//! └───────────────────────────────────────────────────────────┘
//!
//!  inbox/daily/events-*.jsonl ──► Inbox Compactor ──► history/<room>/*.json
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use strata_memory::{ArchiveStore, Record, RuleBasedSummarizer};
//! use strata_core::{ArchiveConfig, AuditLogConfig, KnowledgeState, Role};
//! use strata_storage::AuditLogWriter;
//!
//! let log = AuditLogWriter::start("logs", "session-1", AuditLogConfig::default());
//! let store = ArchiveStore::new(
//!     ArchiveConfig::default(),
//!     log,
//!     Arc::new(RuleBasedSummarizer::default()),
//! )?;
//!
//! let fresh = store.record(
//!     Record::new("User prefers terse answers", Role::Logician, KnowledgeState::Active)
//!         .meta_kind("preference"),
//! );
//! ```

pub mod archive;
pub mod compactor;
pub mod dedup;
pub mod fossil;
pub mod summarizer;

pub use archive::{
    ArchiveStats, ArchiveStore, FossilOutcome, Record, FOSSIL_META_KIND, TRANSITION_META_KIND,
};
pub use compactor::{
    session_id, session_title, ChatMessage, ChatSession, CompactionReport, InboxCompactor,
    BOUNDARY_KIND_SUFFIX, DEFAULT_ROOM,
};
pub use dedup::DedupWindow;
pub use fossil::{ActiveItem, FossilBuffer, FossilThresholds};
pub use summarizer::{FnSummarizer, RuleBasedSummarizer, Summarizer};
