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

//! Fossil Query Service
//!
//! Read path over the audit stream: returns the N most recent fossil
//! summaries from the last few day-files, optionally for a single session.
//!
//! Results are cached per `(n, scan_days, session)` for a short TTL; a hit
//! never touches disk. A miss scans on the blocking pool, newest file first,
//! and keeps only the top N in a bounded min-heap.

use crate::topn::{Ranked, TopN};
use chrono::{Duration as ChronoDuration, NaiveDate};
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strata_core::{
    iso_to_unix_ms, local_today, meta_keys, DayFilePattern, KnowledgeState, QueryConfig, Result,
    StrataError, ARCHIVE_KIND, ARCHIVE_SCHEMA, MAX_SCAN_DAYS,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One fossil summary as returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FossilEntry {
    pub ts_unix_ms: i64,
    pub ts: String,
    pub event_id: String,
    pub content: String,
    pub session_id: String,
    pub source_count: u64,
    pub source_ids_hash: Option<String>,
}

impl Ranked for FossilEntry {
    fn rank_ts(&self) -> i64 {
        self.ts_unix_ms
    }

    fn rank_id(&self) -> &str {
        &self.event_id
    }
}

/// Arguments of [`FossilQueryService::get_recent`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FossilQuery {
    pub n: usize,
    pub scan_days: u32,
    pub session_id: Option<String>,
}

impl FossilQuery {
    /// The `n` most recent fossils over the default 7-day window
    pub fn new(n: usize) -> Self {
        Self {
            n,
            scan_days: 7,
            session_id: None,
        }
    }

    pub fn scan_days(mut self, days: u32) -> Self {
        self.scan_days = days;
        self
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryStats {
    pub cache_hits: u64,
    pub scans: u64,
    pub files_scanned: u64,
    pub lines_scanned: u64,
}

#[derive(Default)]
struct QueryCounters {
    cache_hits: AtomicU64,
    scans: AtomicU64,
    files_scanned: AtomicU64,
    lines_scanned: AtomicU64,
}

pub struct FossilQueryService {
    dir: PathBuf,
    pattern: DayFilePattern,
    config: QueryConfig,
    cache: Cache<FossilQuery, Arc<Vec<FossilEntry>>>,
    counters: Arc<QueryCounters>,
}

impl FossilQueryService {
    /// Query the day-files named by `pattern` in `dir`
    pub fn new(dir: impl Into<PathBuf>, pattern: DayFilePattern, config: QueryConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.cache_capacity)
            .time_to_live(config.cache_ttl())
            .build();

        Self {
            dir: dir.into(),
            pattern,
            config,
            cache,
            counters: Arc::new(QueryCounters::default()),
        }
    }

    /// Clamp `scan_days` into range; `None` for queries that need no scan
    fn normalize(&self, query: FossilQuery) -> Option<FossilQuery> {
        if query.n == 0 {
            return None;
        }
        let max = self.config.max_scan_days.clamp(1, MAX_SCAN_DAYS);
        Some(FossilQuery {
            scan_days: query.scan_days.clamp(1, max),
            ..query
        })
    }

    /// Query with the configured default window
    pub fn query(&self, n: usize) -> FossilQuery {
        FossilQuery::new(n).scan_days(self.config.default_scan_days)
    }

    /// Cached result for `query`, if still fresh. Never touches disk.
    pub fn cached(&self, query: &FossilQuery) -> Option<Vec<FossilEntry>> {
        let key = self.normalize(query.clone())?;
        let hit = self.cache.get(&key)?;
        self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
        Some(hit.as_ref().clone())
    }

    /// The `n` most recent fossils, newest first
    pub async fn get_recent(&self, query: FossilQuery) -> Result<Vec<FossilEntry>> {
        self.get_recent_with_cancel(query, &CancellationToken::new())
            .await
    }

    /// Like [`get_recent`](Self::get_recent) but aborts between files and
    /// lines once `cancel` fires, returning [`StrataError::Cancelled`].
    pub async fn get_recent_with_cancel(
        &self,
        query: FossilQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<FossilEntry>> {
        let Some(key) = self.normalize(query) else {
            return Ok(Vec::new());
        };
        if let Some(hit) = self.cache.get(&key) {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit.as_ref().clone());
        }

        let files = files_in_window(&self.dir, &self.pattern, local_today(), key.scan_days);
        let session = key.session_id.clone();
        let n = key.n;
        let token = cancel.clone();
        let counters = self.counters.clone();

        let entries = tokio::task::spawn_blocking(move || {
            scan_files(&files, n, session.as_deref(), &token, &counters)
        })
        .await
        .map_err(|e| StrataError::Closed(format!("fossil scan task failed: {e}")))??;

        self.counters.scans.fetch_add(1, Ordering::Relaxed);
        self.cache.insert(key, Arc::new(entries.clone()));
        Ok(entries)
    }

    /// Drop every cached result
    pub fn invalidate(&self) {
        self.cache.invalidate_all();
    }

    pub fn stats(&self) -> QueryStats {
        QueryStats {
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            scans: self.counters.scans.load(Ordering::Relaxed),
            files_scanned: self.counters.files_scanned.load(Ordering::Relaxed),
            lines_scanned: self.counters.lines_scanned.load(Ordering::Relaxed),
        }
    }
}

/// Day-files dated within `[today - scan_days + 1, today]`, newest first
fn files_in_window(
    dir: &Path,
    pattern: &DayFilePattern,
    today: NaiveDate,
    scan_days: u32,
) -> Vec<PathBuf> {
    let oldest = today - ChronoDuration::days(i64::from(scan_days.max(1)) - 1);
    pattern
        .list(dir)
        .into_iter()
        .filter(|(date, _)| *date >= oldest && *date <= today)
        .map(|(_, path)| path)
        .collect()
}

fn scan_files(
    files: &[PathBuf],
    n: usize,
    session: Option<&str>,
    cancel: &CancellationToken,
    counters: &QueryCounters,
) -> Result<Vec<FossilEntry>> {
    let mut top = TopN::new(n);

    for path in files {
        if cancel.is_cancelled() {
            return Err(StrataError::Cancelled);
        }

        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) => {
                warn!("Skipping unreadable day-file {:?}: {}", path, e);
                continue;
            }
        };
        counters.files_scanned.fetch_add(1, Ordering::Relaxed);

        for line in BufReader::new(file).split(b'\n') {
            if cancel.is_cancelled() {
                return Err(StrataError::Cancelled);
            }
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("Read error in {:?}, skipping rest of file: {}", path, e);
                    break;
                }
            };
            counters.lines_scanned.fetch_add(1, Ordering::Relaxed);

            if let Some(entry) = parse_fossil_line(&line, session) {
                top.push(entry);
            }
        }
    }

    debug!("Fossil scan over {} files kept {} entries", files.len(), top.len());
    Ok(top.into_sorted_desc())
}

/// Extract a fossil from one audit line.
///
/// Accepts the archive event either nested under `data` (as the audit
/// writer emits it) or at the top level. Anything that is not a fossil of
/// the expected schema is ignored.
fn parse_fossil_line(line: &[u8], session: Option<&str>) -> Option<FossilEntry> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    let value: Value = serde_json::from_slice(line).ok()?;

    let envelope_session = value.get("session").and_then(Value::as_str);
    let event = match value.get("data") {
        Some(data) if data.is_object() => data,
        _ => &value,
    };
    let field = |key: &str| event.get(key).and_then(Value::as_str);

    if !field("kind")?.eq_ignore_ascii_case(ARCHIVE_KIND) || field("schema")? != ARCHIVE_SCHEMA {
        return None;
    }
    if field("state")?.parse::<KnowledgeState>().ok()? != KnowledgeState::Fossil {
        return None;
    }

    let session_id = field("sessionId").or(envelope_session).unwrap_or_default();
    if session.is_some_and(|wanted| wanted != session_id) {
        return None;
    }

    let ts = field("ts").unwrap_or_default();
    let ts_unix_ms = event
        .get("tsUnixMs")
        .and_then(Value::as_i64)
        .or_else(|| iso_to_unix_ms(ts))?;
    let meta = event.get("meta");
    let meta_field = |key: &str| meta.and_then(|m| m.get(key));

    Some(FossilEntry {
        ts_unix_ms,
        ts: ts.to_string(),
        event_id: field("eventId")?.to_string(),
        content: field("content").unwrap_or_default().to_string(),
        session_id: session_id.to_string(),
        source_count: meta_field(meta_keys::SOURCE_COUNT)
            .and_then(Value::as_u64)
            .unwrap_or(0),
        source_ids_hash: meta_field(meta_keys::SOURCE_IDS_HASH)
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::{tempdir, TempDir};

    fn pattern() -> DayFilePattern {
        DayFilePattern::new("audit-", ".jsonl")
    }

    fn fossil(ts: i64, session: &str) -> Value {
        json!({
            "ts": "2026-10-19T10:00:00.000+00:00",
            "session": session,
            "kind": "archive",
            "data": {
                "kind": "archive",
                "schema": ARCHIVE_SCHEMA,
                "ts": "2026-10-19T10:00:00.000+00:00",
                "tsUnixMs": ts,
                "eventId": format!("{ts:064}"),
                "sessionId": session,
                "content": format!("summary {ts}"),
                "role": "Recorder",
                "state": "Fossil",
                "meta": { "kind": "fossil", "sourceCount": 3, "sourceIdsHash": "abc" }
            }
        })
    }

    fn write_day(dir: &Path, days_ago: i64, lines: &[String]) {
        let date = local_today() - ChronoDuration::days(days_ago);
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(pattern().path_in(dir, date))
            .unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
    }

    fn service(dir: &TempDir) -> FossilQueryService {
        FossilQueryService::new(dir.path(), pattern(), QueryConfig::default())
    }

    #[tokio::test]
    async fn test_top_n_across_files() {
        let dir = tempdir().unwrap();
        write_day(dir.path(), 0, &[fossil(50, "a").to_string(), fossil(10, "a").to_string()]);
        write_day(dir.path(), 1, &[fossil(40, "a").to_string(), fossil(60, "b").to_string()]);
        write_day(dir.path(), 3, &[fossil(30, "a").to_string()]);

        let got = service(&dir).get_recent(FossilQuery::new(3)).await.unwrap();
        let ts: Vec<i64> = got.iter().map(|e| e.ts_unix_ms).collect();
        assert_eq!(ts, vec![60, 50, 40]);
        assert_eq!(got[0].source_count, 3);
        assert_eq!(got[0].source_ids_hash.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_filters_non_fossils_and_malformed_lines() {
        let dir = tempdir().unwrap();
        let mut active = fossil(70, "a");
        active["data"]["state"] = json!("Active");
        let mut wrong_schema = fossil(80, "a");
        wrong_schema["data"]["schema"] = json!("jarvis.archive.v2");
        let mut upper = fossil(20, "a");
        upper["data"]["kind"] = json!("ARCHIVE");
        upper["data"]["state"] = json!("fossil");
        let flat = fossil(25, "a")["data"].clone();

        write_day(
            dir.path(),
            0,
            &[
                active.to_string(),
                "{ truncated".to_string(),
                wrong_schema.to_string(),
                String::new(),
                json!({"ts": "x", "kind": "tick", "data": {"i": 1}}).to_string(),
                upper.to_string(),
                flat.to_string(),
            ],
        );

        let got = service(&dir).get_recent(FossilQuery::new(10)).await.unwrap();
        let ts: Vec<i64> = got.iter().map(|e| e.ts_unix_ms).collect();
        assert_eq!(ts, vec![25, 20]);
    }

    #[tokio::test]
    async fn test_session_filter() {
        let dir = tempdir().unwrap();
        write_day(
            dir.path(),
            0,
            &[fossil(1, "a").to_string(), fossil(2, "b").to_string(), fossil(3, "a").to_string()],
        );

        let got = service(&dir)
            .get_recent(FossilQuery::new(5).session("a"))
            .await
            .unwrap();
        assert!(got.iter().all(|e| e.session_id == "a"));
        assert_eq!(got.len(), 2);
    }

    #[tokio::test]
    async fn test_scan_window() {
        let dir = tempdir().unwrap();
        write_day(dir.path(), 0, &[fossil(1, "a").to_string()]);
        write_day(dir.path(), 6, &[fossil(2, "a").to_string()]);
        write_day(dir.path(), 7, &[fossil(3, "a").to_string()]);
        write_day(dir.path(), 90, &[fossil(4, "a").to_string()]);

        let svc = service(&dir);
        assert_eq!(svc.get_recent(FossilQuery::new(10)).await.unwrap().len(), 2);
        assert_eq!(
            svc.get_recent(FossilQuery::new(10).scan_days(0)).await.unwrap().len(),
            1
        );
        assert_eq!(
            svc.get_recent(FossilQuery::new(10).scan_days(500)).await.unwrap().len(),
            3
        );
    }

    #[tokio::test]
    async fn test_zero_n_is_empty_without_scan() {
        let dir = tempdir().unwrap();
        write_day(dir.path(), 0, &[fossil(1, "a").to_string()]);
        let svc = service(&dir);
        assert!(svc.get_recent(FossilQuery::new(0)).await.unwrap().is_empty());
        assert_eq!(svc.stats().scans, 0);
    }

    #[tokio::test]
    async fn test_cache_hit_then_ttl_expiry() {
        let dir = tempdir().unwrap();
        write_day(dir.path(), 0, &[fossil(1, "a").to_string()]);
        let config = QueryConfig {
            cache_ttl_secs: 1,
            ..Default::default()
        };
        let svc = FossilQueryService::new(dir.path(), pattern(), config);

        let first = svc.get_recent(FossilQuery::new(5)).await.unwrap();
        write_day(dir.path(), 0, &[fossil(2, "a").to_string()]);

        let second = svc.get_recent(FossilQuery::new(5)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(svc.cached(&FossilQuery::new(5)), Some(first.clone()));
        let stats = svc.stats();
        assert_eq!(stats.scans, 1);
        assert_eq!(stats.cache_hits, 2);

        // A different signature is a separate entry.
        svc.get_recent(FossilQuery::new(5).session("a")).await.unwrap();
        assert_eq!(svc.stats().scans, 2);

        tokio::time::sleep(std::time::Duration::from_millis(1_200)).await;
        let third = svc.get_recent(FossilQuery::new(5)).await.unwrap();
        assert_eq!(third.len(), 2);
        assert_eq!(svc.stats().scans, 3);
    }

    #[tokio::test]
    async fn test_cancelled_scan_is_distinct_and_not_cached() {
        let dir = tempdir().unwrap();
        write_day(dir.path(), 0, &[fossil(1, "a").to_string()]);
        let svc = service(&dir);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = svc
            .get_recent_with_cancel(FossilQuery::new(5), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(svc.cached(&FossilQuery::new(5)).is_none());

        assert_eq!(svc.get_recent(FossilQuery::new(5)).await.unwrap().len(), 1);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let files = files_in_window(Path::new("/nonexistent/strata"), &pattern(), local_today(), 7);
        assert!(files.is_empty());
    }
}
