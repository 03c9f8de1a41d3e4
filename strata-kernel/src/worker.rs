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

//! Background inbox compaction.
//!
//! One task per kernel: wakes on a fixed interval or on [`trigger`], runs the
//! compactor on the blocking pool and goes back to sleep. Runs are serialized
//! with [`compact_now`] so at most one compaction touches the checkpoints at
//! a time.
//!
//! [`trigger`]: CompactionWorker::trigger
//! [`compact_now`]: CompactionWorker::compact_now

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strata_core::{Result, StrataError};
use strata_memory::{CompactionReport, InboxCompactor};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct WorkerShared {
    compactor: Arc<InboxCompactor>,
    trigger: Notify,
    run_lock: tokio::sync::Mutex<()>,
    runs: AtomicU64,
    cancel: CancellationToken,
}

pub struct CompactionWorker {
    shared: Arc<WorkerShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CompactionWorker {
    /// Spawn onto the current runtime. The first run happens immediately.
    pub fn spawn(
        compactor: Arc<InboxCompactor>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let shared = Arc::new(WorkerShared {
            compactor,
            trigger: Notify::new(),
            run_lock: tokio::sync::Mutex::new(()),
            runs: AtomicU64::new(0),
            cancel,
        });

        info!("Starting inbox compaction worker (interval={:?})", interval);
        let handle = tokio::spawn(run_worker(shared.clone(), interval));

        Self {
            shared,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Ask for a compaction as soon as possible
    pub fn trigger(&self) {
        self.shared.trigger.notify_one();
    }

    /// Run one compaction now and wait for its report
    pub async fn compact_now(&self) -> Result<CompactionReport> {
        compact_once(&self.shared).await
    }

    /// Completed background and on-demand runs
    pub fn runs(&self) -> u64 {
        self.shared.runs.load(Ordering::Relaxed)
    }

    /// Cancel the loop and wait for it to exit. Idempotent.
    pub async fn stop(&self) {
        self.shared.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Compaction worker ended abnormally: {}", e);
            }
        }
    }
}

async fn run_worker(shared: Arc<WorkerShared>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = ticker.tick() => {}
            _ = shared.trigger.notified() => {}
        }

        match compact_once(&shared).await {
            Ok(report) => {
                if report.days_processed > 0 {
                    debug!(
                        "Background compaction: {} days, {} sessions written",
                        report.days_processed, report.sessions_written
                    );
                }
            }
            Err(e) if e.is_cancelled() => break,
            Err(e) => warn!("Background compaction failed: {}", e),
        }
    }

    debug!("Inbox compaction worker stopped");
}

async fn compact_once(shared: &Arc<WorkerShared>) -> Result<CompactionReport> {
    let _guard = shared.run_lock.lock().await;

    let compactor = shared.compactor.clone();
    let cancel = shared.cancel.child_token();
    let report = tokio::task::spawn_blocking(move || compactor.run(&cancel))
        .await
        .map_err(|e| StrataError::Closed(format!("compaction task failed: {e}")))??;

    shared.runs.fetch_add(1, Ordering::Relaxed);
    Ok(report)
}
