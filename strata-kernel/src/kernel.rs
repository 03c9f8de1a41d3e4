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

use crate::worker::CompactionWorker;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strata_core::{DayFilePattern, Result, StrataConfig, StrataError};
use strata_memory::{ArchiveStats, ArchiveStore, InboxCompactor, Summarizer};
use strata_query::{FossilEntry, FossilQueryService, QueryStats};
use strata_storage::{AuditLogWriter, InboxWriter, WriterStats, AUDIT_FILE_SUFFIX};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Counters of every component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelStats {
    pub audit: WriterStats,
    pub archive: ArchiveStats,
    pub query: QueryStats,
    pub compaction_runs: u64,
}

/// Owns one instance of every archive component.
///
/// Built once at startup and handed to consumers by reference.
pub struct Kernel {
    config: StrataConfig,
    log: AuditLogWriter,
    archive: ArchiveStore,
    query: FossilQueryService,
    inbox: InboxWriter,
    compactor: Arc<InboxCompactor>,
    worker: CompactionWorker,
    closed: AtomicBool,
}

impl Kernel {
    /// Create the directory layout under `config.root_dir`, run the audit
    /// retention sweep and start the background tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(
        config: StrataConfig,
        session_id: impl Into<String>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Result<Self> {
        config.validate()?;
        tokio::runtime::Handle::try_current()
            .map_err(|e| StrataError::InvalidInput(format!("kernel needs a Tokio runtime: {e}")))?;

        let logs_dir = config.logs_dir();
        let inbox_dir = config.inbox_dir();
        let history_dir = config.history_dir();
        for dir in [&logs_dir, &inbox_dir, &history_dir] {
            std::fs::create_dir_all(dir)?;
        }

        let log = AuditLogWriter::start(&logs_dir, session_id, config.audit.clone());
        let archive = ArchiveStore::new(config.archive.clone(), log.clone(), summarizer)?;
        let query = FossilQueryService::new(
            &logs_dir,
            DayFilePattern::new(config.audit.file_prefix.clone(), AUDIT_FILE_SUFFIX),
            config.query.clone(),
        );
        let inbox = InboxWriter::new(&inbox_dir);
        let compactor = Arc::new(InboxCompactor::new(
            &inbox_dir,
            &history_dir,
            config.inbox.clone(),
        ));
        let worker = CompactionWorker::spawn(
            compactor.clone(),
            config.inbox.compact_interval(),
            CancellationToken::new(),
        );

        info!(
            "Strata kernel open (root={:?}, session={}, summarizer={})",
            config.root_dir,
            log.session_id(),
            archive.summarizer_name()
        );

        Ok(Self {
            config,
            log,
            archive,
            query,
            inbox,
            compactor,
            worker,
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &StrataConfig {
        &self.config
    }

    pub fn log(&self) -> &AuditLogWriter {
        &self.log
    }

    pub fn archive(&self) -> &ArchiveStore {
        &self.archive
    }

    pub fn query(&self) -> &FossilQueryService {
        &self.query
    }

    pub fn inbox(&self) -> &InboxWriter {
        &self.inbox
    }

    pub fn compactor(&self) -> &InboxCompactor {
        &self.compactor
    }

    pub fn worker(&self) -> &CompactionWorker {
        &self.worker
    }

    /// The `n` most recent fossils over the configured default window
    pub async fn recent_fossils(&self, n: usize) -> Result<Vec<FossilEntry>> {
        self.query.get_recent(self.query.query(n)).await
    }

    pub fn stats(&self) -> KernelStats {
        KernelStats {
            audit: self.log.stats(),
            archive: self.archive.stats(),
            query: self.query.stats(),
            compaction_runs: self.worker.runs(),
        }
    }

    /// Fossilize what is still buffered, stop the compaction worker and drain
    /// the audit log. Idempotent.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(outcome) = self.archive.fossilize_now().await {
            info!("Fossilized {} buffered events on shutdown", outcome.source_count);
        }
        self.archive.wait_idle().await;
        self.worker.stop().await;
        self.log.shutdown().await;

        let stats = self.log.stats();
        info!(
            "Strata kernel closed ({} lines written, {} dropped)",
            stats.written, stats.dropped
        );
    }
}
