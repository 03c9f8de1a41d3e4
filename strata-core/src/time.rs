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

//! Timestamps and day-partitioned file names
//!
//! Day-files are named `{prefix}YYYY-MM-DD{suffix}` using the local calendar
//! date. Sidecar files share the stem but carry a different suffix, so the
//! parser requires the suffix to match exactly.

use chrono::{DateTime, FixedOffset, Local, NaiveDate, SecondsFormat, TimeZone, Utc};
use std::path::{Path, PathBuf};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// ISO-8601 with millisecond precision
pub fn iso_millis<Tz: TimeZone>(ts: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    ts.to_rfc3339_opts(SecondsFormat::Millis, false)
}

/// ISO-8601 truncated to whole seconds
pub fn iso_second<Tz: TimeZone>(ts: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    ts.to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Parse an RFC 3339 timestamp, keeping its offset
pub fn parse_iso(s: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(s.trim()).ok()
}

/// Milliseconds since the Unix epoch for an RFC 3339 string
pub fn iso_to_unix_ms(s: &str) -> Option<i64> {
    parse_iso(s).map(|ts| ts.with_timezone(&Utc).timestamp_millis())
}

/// Today's local calendar date
pub fn local_today() -> NaiveDate {
    Local::now().date_naive()
}

/// Naming scheme of a family of day-files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayFilePattern {
    pub prefix: String,
    pub suffix: String,
}

impl DayFilePattern {
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    pub fn file_name(&self, date: NaiveDate) -> String {
        format!("{}{}{}", self.prefix, date.format(DATE_FORMAT), self.suffix)
    }

    pub fn path_in(&self, dir: &Path, date: NaiveDate) -> PathBuf {
        dir.join(self.file_name(date))
    }

    /// Date embedded in `file_name`, if it belongs to this family
    pub fn parse_date(&self, file_name: &str) -> Option<NaiveDate> {
        let middle = file_name
            .strip_prefix(self.prefix.as_str())?
            .strip_suffix(self.suffix.as_str())?;
        if middle.len() != 10 {
            return None;
        }
        NaiveDate::parse_from_str(middle, DATE_FORMAT).ok()
    }

    /// All files of this family in `dir`, newest date first. A missing or
    /// unreadable directory yields an empty list.
    pub fn list(&self, dir: &Path) -> Vec<(NaiveDate, PathBuf)> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut files: Vec<(NaiveDate, PathBuf)> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name();
                let date = self.parse_date(name.to_str()?)?;
                Some((date, entry.path()))
            })
            .collect();

        files.sort_by(|a, b| b.0.cmp(&a.0));
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audit() -> DayFilePattern {
        DayFilePattern::new("audit-", ".jsonl")
    }

    #[test]
    fn test_file_name_roundtrip() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        assert_eq!(audit().file_name(date), "audit-2026-10-19.jsonl");
        assert_eq!(audit().parse_date("audit-2026-10-19.jsonl"), Some(date));
    }

    #[test]
    fn test_sidecars_are_not_day_files() {
        let events = DayFilePattern::new("events-", ".jsonl");
        assert!(events.parse_date("events-2026-10-19.idx.jsonl").is_none());
        assert!(events.parse_date("events-2026-10-19.cp.json").is_none());
        assert!(events.parse_date("events-2026-13-40.jsonl").is_none());
    }

    #[test]
    fn test_list_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "audit-2026-10-17.jsonl",
            "audit-2026-10-19.jsonl",
            "audit-2026-10-18.jsonl",
            "unrelated.txt",
        ] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }

        let files = audit().list(dir.path());
        let days: Vec<u32> = files.iter().map(|(d, _)| chrono::Datelike::day(d)).collect();
        assert_eq!(days, vec![19, 18, 17]);
    }

    #[test]
    fn test_iso_helpers() {
        let ts = Utc.with_ymd_and_hms(2026, 10, 19, 8, 30, 15).unwrap()
            + chrono::Duration::milliseconds(250);
        assert_eq!(iso_millis(&ts), "2026-10-19T08:30:15.250+00:00");
        assert_eq!(iso_second(&ts), "2026-10-19T08:30:15+00:00");
        assert_eq!(iso_to_unix_ms(&iso_millis(&ts)), Some(ts.timestamp_millis()));
    }
}
