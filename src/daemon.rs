//! Daemon Infrastructure - Scheduled mirror backups
//!
//! Runs a backup immediately, then once per interval, until SIGINT or
//! SIGTERM. Every run takes the run lock first so overlapping invocations
//! (for example a manual `ghbackup run` during a scheduled one) back off.
//! A shutdown request stops a run between repositories, never inside one.

use crate::lock::RunLock;
use crate::sync::{SyncEngine, SyncSummary};
use anyhow::{Context, Result};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Run one backup while holding the run lock.
///
/// Returns `Ok(None)` without doing anything if another run holds the lock.
/// Setting `stop` ends the run before the next repository.
pub async fn run_exclusive(
    engine: &SyncEngine,
    lock_path: Option<&Path>,
    stop: &AtomicBool,
) -> Result<Option<SyncSummary>> {
    let _lock = match lock_path {
        Some(path) => match RunLock::try_acquire(path).context("Failed to acquire run lock")? {
            Some(lock) => {
                debug!("Holding run lock {}", lock.path().display());
                Some(lock)
            }
            None => {
                info!(
                    "Another backup run holds {}, exiting without changes",
                    path.display()
                );
                return Ok(None);
            }
        },
        None => None,
    };

    engine.run_until_stopped(stop).await.map(Some)
}

/// Run one locked backup, asking it to stop between repositories once
/// `shutdown` completes.
///
/// Returns the outcome and whether shutdown was requested.
pub async fn run_graceful<F>(
    engine: &SyncEngine,
    lock_path: Option<&Path>,
    mut shutdown: Pin<&mut F>,
) -> (Result<Option<SyncSummary>>, bool)
where
    F: Future<Output = ()>,
{
    let stop = AtomicBool::new(false);
    let run = run_exclusive(engine, lock_path, &stop);
    tokio::pin!(run);

    tokio::select! {
        outcome = &mut run => (outcome, false),
        _ = shutdown.as_mut() => {
            warn!("Shutdown signal received, finishing the current repository before stopping");
            stop.store(true, Ordering::SeqCst);
            (run.await, true)
        }
    }
}

/// One backup pass that stops cleanly on Ctrl+C or SIGTERM
pub async fn run_once(engine: &SyncEngine, lock_path: Option<&Path>) -> Result<Option<SyncSummary>> {
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    run_graceful(engine, lock_path, shutdown).await.0
}

/// Periodic backup scheduler
pub struct Daemon {
    engine: SyncEngine,
    interval: Duration,
    lock_path: Option<PathBuf>,
}

impl Daemon {
    pub fn new(engine: SyncEngine, interval: Duration, lock_path: Option<PathBuf>) -> Self {
        Self {
            engine,
            interval,
            lock_path,
        }
    }

    /// Run until a shutdown signal arrives
    pub async fn run(&self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `shutdown` completes. A run in progress finishes the
    /// repository it is working on, then stops.
    pub async fn run_until(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        info!(
            "Scheduled backups started with interval: {:?}",
            self.interval
        );

        let mut timer = interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = shutdown.as_mut() => {
                    info!("Shutdown signal received, stopping scheduled backups");
                    break;
                }

                _ = timer.tick() => {
                    debug!("Starting scheduled backup");

                    let (outcome, stopped) =
                        run_graceful(&self.engine, self.lock_path.as_deref(), shutdown.as_mut()).await;
                    self.log_outcome(outcome);

                    if stopped {
                        break;
                    }
                }
            }
        }

        info!("Daemon loop exiting");
        Ok(())
    }

    fn log_outcome(&self, outcome: Result<Option<SyncSummary>>) {
        match outcome {
            Ok(Some(summary)) => info!(
                "Scheduled backup finished in {:.2}s: {} repos, {} failed; next run in {:?}",
                summary.duration.as_secs_f64(),
                summary.total_repositories,
                summary.failed,
                self.interval
            ),
            Ok(None) => warn!("Scheduled backup skipped, another run holds the lock"),
            Err(e) => error!("Scheduled backup failed: {:#}", e),
        }
    }
}

/// Resolves on Ctrl+C, or SIGTERM on Unix
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = ctrl_c() => {}
                    _ = terminate.recv() => debug!("SIGTERM received"),
                }
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c().await;
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => debug!("Ctrl+C received"),
        Err(e) => {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
