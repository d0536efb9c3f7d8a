//! Background TTL sweep
//!
//! Finds inodes whose time-to-live has elapsed and deletes or frees them
//! through the same public operations a client would call.

use super::master::FileSystemMaster;
use super::options::{DeleteOptions, SetAttributeOptions};
use std::sync::Arc;
use std::time::Duration;
use tessera_common::{FsPath, TtlAction, current_time_ms};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired inodes found
    pub scanned: usize,
    pub deleted: usize,
    pub freed: usize,
    /// Already gone, replaced, or no longer expired
    pub skipped: usize,
    pub failed: usize,
}

pub struct TtlSweeper {
    fs_master: Arc<FileSystemMaster>,
    interval: Option<Duration>,
}

impl TtlSweeper {
    /// `None` disables the background loop; `run_once` still works
    pub const fn new(fs_master: Arc<FileSystemMaster>, interval: Option<Duration>) -> Self {
        Self {
            fs_master,
            interval,
        }
    }

    /// Sweep everything expired by now
    pub fn run_once(&self) -> SweepReport {
        self.sweep_at(current_time_ms())
    }

    /// Sweep everything expired by `now_ms`
    pub fn sweep_at(&self, now_ms: u64) -> SweepReport {
        let mut report = SweepReport::default();
        let mut deleted: Vec<FsPath> = Vec::new();

        // Shallowest first, so a deleted directory covers its expired children
        for candidate in self.fs_master.ttl_candidates(now_ms) {
            report.scanned += 1;
            if deleted.iter().any(|d| d.is_ancestor_of(&candidate.path)) {
                report.skipped += 1;
                continue;
            }

            let path = candidate.path.as_str();
            match candidate.action {
                TtlAction::Delete => {
                    let options = DeleteOptions {
                        recursive: true,
                        expected_id: Some(candidate.id),
                        only_if_expired_at: Some(now_ms),
                    };
                    match self.fs_master.delete_with_options(path, options) {
                        Ok(true) => {
                            debug!("Deleted expired {}", path);
                            report.deleted += 1;
                            deleted.push(candidate.path);
                        }
                        Ok(false) => report.skipped += 1,
                        Err(e) if e.is_not_found() => report.skipped += 1,
                        Err(e) => {
                            warn!("Failed to delete expired {}: {}", path, e);
                            report.failed += 1;
                        }
                    }
                }
                TtlAction::Free => {
                    // Freed data stays in the namespace; drop the TTL so it
                    // is not freed again on every sweep
                    let result = self.fs_master.free(path, true).and_then(|freed| {
                        if freed {
                            self.fs_master
                                .set_attribute(path, SetAttributeOptions::new().ttl(None))?;
                        }
                        Ok(freed)
                    });
                    match result {
                        Ok(true) => {
                            debug!("Freed expired {}", path);
                            report.freed += 1;
                        }
                        Ok(false) => report.skipped += 1,
                        Err(e) if e.is_not_found() => report.skipped += 1,
                        Err(e) => {
                            warn!("Failed to free expired {}: {}", path, e);
                            report.failed += 1;
                        }
                    }
                }
            }
        }
        report
    }

    /// Run sweeps on the configured interval until `shutdown` turns true
    /// or its sender goes away. Returns `None` when the sweeper is disabled.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        let interval = self.interval?;
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            info!("TTL sweeper started, interval {:?}", interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                let sweeper = Arc::clone(&self);
                match tokio::task::spawn_blocking(move || sweeper.run_once()).await {
                    Ok(report) if report.scanned > 0 => info!(
                        "TTL sweep: {} expired, {} deleted, {} freed, {} skipped, {} failed",
                        report.scanned, report.deleted, report.freed, report.skipped, report.failed
                    ),
                    Ok(_) => {}
                    Err(e) => error!("TTL sweep panicked: {}", e),
                }
            }
            info!("TTL sweeper stopped");
        }))
    }
}
