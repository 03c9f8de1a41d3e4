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

//! Configuration for the archive subsystem
//!
//! Every component takes its own section so it can be constructed in
//! isolation (tests do this constantly). `StrataConfig` bundles the sections
//! and owns the storage root from which all on-disk paths are derived.

use crate::error::{Result, StrataError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Smallest dedup window the archive store will run with
pub const MIN_DEDUP_WINDOW: usize = 32;

/// Largest look-back accepted by the fossil query service
pub const MAX_SCAN_DAYS: u32 = 60;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    /// Storage root; `logs/`, `inbox/daily/` and `history/` live beneath it
    pub root_dir: PathBuf,
    pub audit: AuditLogConfig,
    pub archive: ArchiveConfig,
    pub query: QueryConfig,
    pub inbox: InboxConfig,
    pub logging: LoggingConfig,
}

impl Default for StrataConfig {
    fn default() -> Self {
        let root_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("strata");

        Self {
            root_dir,
            audit: AuditLogConfig::default(),
            archive: ArchiveConfig::default(),
            query: QueryConfig::default(),
            inbox: InboxConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl StrataConfig {
    /// Default configuration rooted at `root_dir`
    pub fn with_root(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Default::default()
        }
    }

    /// Parse a TOML document; missing keys fall back to defaults
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Reject settings no component can operate with
    pub fn validate(&self) -> Result<()> {
        if self.audit.batch_bytes == 0 {
            return Err(StrataError::Config("audit.batch_bytes must be > 0".into()));
        }
        if self.archive.fossil_max_items == 0 || self.archive.fossil_max_chars == 0 {
            return Err(StrataError::Config(
                "archive fossil thresholds must be > 0".into(),
            ));
        }
        if self.query.cache_capacity == 0 {
            return Err(StrataError::Config("query.cache_capacity must be > 0".into()));
        }
        Ok(())
    }

    /// Directory holding `audit-YYYY-MM-DD.jsonl`
    pub fn logs_dir(&self) -> PathBuf {
        self.root_dir.join("logs")
    }

    /// Directory holding inbox day-files, indexes, checkpoints and markers
    pub fn inbox_dir(&self) -> PathBuf {
        self.root_dir.join("inbox").join("daily")
    }

    /// Directory holding compacted session transcripts
    pub fn history_dir(&self) -> PathBuf {
        self.root_dir.join("history")
    }
}

/// Durable event log writer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditLogConfig {
    /// String values longer than this are truncated before serialization
    pub field_cap_chars: usize,
    /// Upper bound on bytes accumulated before one append
    pub batch_bytes: usize,
    /// Day-files older than this are deleted at startup (0 = keep forever)
    pub retention_days: u32,
    /// File name prefix; the full name is `{prefix}YYYY-MM-DD.jsonl`
    pub file_prefix: String,
}

impl Default for AuditLogConfig {
    fn default() -> Self {
        Self {
            field_cap_chars: 50_000,
            batch_bytes: 512 * 1024,
            retention_days: 30,
            file_prefix: "audit-".to_string(),
        }
    }
}

/// Archive store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Number of recent event ids remembered for dedup
    pub dedup_window: usize,
    /// Fossilize once this many active items are buffered
    pub fossil_max_items: usize,
    /// Fossilize once buffered content reaches this many chars
    pub fossil_max_chars: usize,
    /// Active item content is truncated to this many chars
    pub item_max_chars: usize,
    /// Fossil summaries are truncated to this many chars
    pub summary_max_chars: usize,
    /// Record a Standby marker after each fossil
    pub emit_transition_marker: bool,
    /// Number of source ids copied into fossil meta
    pub source_id_sample: usize,
}

impl ArchiveConfig {
    /// Dedup window with the lower bound applied
    pub fn effective_dedup_window(&self) -> usize {
        self.dedup_window.max(MIN_DEDUP_WINDOW)
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            dedup_window: 256,
            fossil_max_items: 80,
            fossil_max_chars: 60_000,
            item_max_chars: 4_096,
            summary_max_chars: 12_000,
            emit_transition_marker: true,
            source_id_sample: 5,
        }
    }
}

/// Fossil query settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub cache_ttl_secs: u64,
    pub cache_capacity: u64,
    pub default_scan_days: u32,
    pub max_scan_days: u32,
}

impl QueryConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 30,
            cache_capacity: 32,
            default_scan_days: 7,
            max_scan_days: MAX_SCAN_DAYS,
        }
    }
}

/// Inbox writer and compactor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InboxConfig {
    /// Period of the background compaction worker
    pub compact_interval_secs: u64,
    /// Session titles are cut to this many chars
    pub title_max_chars: usize,
}

impl InboxConfig {
    pub fn compact_interval(&self) -> Duration {
        Duration::from_secs(self.compact_interval_secs.max(1))
    }
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self {
            compact_interval_secs: 60,
            title_max_chars: 42,
        }
    }
}

/// Subscriber settings consumed by the kernel at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StrataConfig::with_root("/tmp/strata");
        assert_eq!(config.audit.field_cap_chars, 50_000);
        assert_eq!(config.audit.retention_days, 30);
        assert_eq!(config.archive.fossil_max_items, 80);
        assert_eq!(config.archive.fossil_max_chars, 60_000);
        assert_eq!(config.query.cache_ttl(), Duration::from_secs(30));
        assert_eq!(config.logs_dir(), PathBuf::from("/tmp/strata/logs"));
        assert_eq!(
            config.inbox_dir(),
            PathBuf::from("/tmp/strata/inbox/daily")
        );
    }

    #[test]
    fn test_dedup_window_floor() {
        let config = ArchiveConfig {
            dedup_window: 4,
            ..Default::default()
        };
        assert_eq!(config.effective_dedup_window(), MIN_DEDUP_WINDOW);
    }

    #[test]
    fn test_partial_toml() {
        let config = StrataConfig::from_toml_str(
            r#"
            root_dir = "/var/lib/strata"

            [archive]
            dedup_window = 512

            [query]
            cache_ttl_secs = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.root_dir, PathBuf::from("/var/lib/strata"));
        assert_eq!(config.archive.dedup_window, 512);
        assert_eq!(config.archive.fossil_max_items, 80);
        assert_eq!(config.query.cache_ttl_secs, 5);
        assert_eq!(config.query.default_scan_days, 7);
    }

    #[test]
    fn test_invalid_toml_rejected() {
        let err = StrataConfig::from_toml_str("[audit]\nbatch_bytes = 0\n").unwrap_err();
        assert!(matches!(err, StrataError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.toml");
        std::fs::write(&path, "[logging]\njson = true\n").unwrap();

        let config = StrataConfig::load(&path).unwrap();
        assert!(config.logging.json);
        assert_eq!(config.logging.filter, "info");
    }
}
