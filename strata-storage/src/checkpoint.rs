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

//! Compaction checkpoints and done markers
//!
//! A checkpoint records how many bytes of a day-file the compactor has
//! consumed. It only moves forward; the only way to rewind is deleting the
//! file. Writes go through a temp file and a rename so a crash never leaves a
//! half-written checkpoint behind.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;
use strata_core::{iso_millis, Result};
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub byte_offset: u64,
    #[serde(default)]
    pub updated_at: String,
    /// Start timestamp of the segment still open per room
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub open_segments: BTreeMap<String, String>,
}

impl Checkpoint {
    /// Load the checkpoint at `path`. Missing or unreadable checkpoints start
    /// from offset zero.
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!("Failed to read checkpoint {:?}: {}", path, e);
                return Self::default();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(cp) => cp,
            Err(e) => {
                warn!("Corrupt checkpoint {:?}, starting over: {}", path, e);
                Self::default()
            }
        }
    }

    /// Advance to `byte_offset` and persist
    pub fn advance(&mut self, path: &Path, byte_offset: u64) -> Result<()> {
        self.byte_offset = self.byte_offset.max(byte_offset);
        self.updated_at = iso_millis(&Local::now());
        write_atomic(path, serde_json::to_string_pretty(self)?.as_bytes())
    }
}

/// Write `bytes` to `path` via a sibling temp file and rename
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Presence-only done marker; the content is informational
pub fn mark_done(path: &Path) -> Result<()> {
    std::fs::write(path, iso_millis(&Local::now()))?;
    Ok(())
}

pub fn is_done(path: &Path) -> bool {
    path.exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_checkpoint_starts_at_zero() {
        let dir = tempdir().unwrap();
        let cp = Checkpoint::load(&dir.path().join("none.cp.json"));
        assert_eq!(cp.byte_offset, 0);
    }

    #[test]
    fn test_advance_persists_and_never_rewinds() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events-2026-10-19.cp.json");

        let mut cp = Checkpoint::default();
        cp.advance(&path, 120).unwrap();
        cp.advance(&path, 80).unwrap();
        assert_eq!(cp.byte_offset, 120);

        let loaded = Checkpoint::load(&path);
        assert_eq!(loaded.byte_offset, 120);
        assert!(!loaded.updated_at.is_empty());

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"byteOffset\": 120"));
    }

    #[test]
    fn test_corrupt_checkpoint_resets() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.cp.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(Checkpoint::load(&path), Checkpoint::default());
    }

    #[test]
    fn test_done_marker() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.compacted.ok");
        assert!(!is_done(&path));
        mark_done(&path).unwrap();
        assert!(is_done(&path));
    }
}
