//! Idle-session reaper.
//!
//! On a fixed interval, every session whose last activity is older than
//! `max_idle` is removed from the registry (which tears down its agent-core
//! context).  Sessions with a turn in flight are skipped.  A failed removal
//! is logged and the sweep moves on.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use sb_domain::config::ReaperConfig;
use sb_domain::trace::TraceEvent;

use crate::registry::{SessionHandle, SessionRegistry};

/// Outcome of one sweep.
#[derive(Debug, Default, Clone)]
pub struct ReapReport {
    pub scanned: usize,
    pub evicted: Vec<String>,
    /// `(session_key, error)` for removals whose teardown failed.  The
    /// session is gone from the registry either way.
    pub failed: Vec<(String, String)>,
    pub skipped_busy: usize,
}

pub struct SessionReaper {
    registry: Arc<SessionRegistry>,
    interval: Duration,
    max_idle: chrono::Duration,
}

impl SessionReaper {
    pub fn new(registry: Arc<SessionRegistry>, interval: Duration, max_idle: Duration) -> Self {
        Self {
            registry,
            interval,
            max_idle: chrono::Duration::from_std(max_idle)
                .unwrap_or(chrono::Duration::MAX),
        }
    }

    pub fn from_config(registry: Arc<SessionRegistry>, config: &ReaperConfig) -> Self {
        Self::new(
            registry,
            Duration::from_secs(config.interval_secs.max(1)),
            Duration::from_secs(config.max_idle_secs),
        )
    }

    fn is_idle(&self, handle: &SessionHandle, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(handle.last_activity_at()) > self.max_idle
    }

    pub fn sweep(&self) -> ReapReport {
        self.sweep_at(Utc::now())
    }

    /// Evict every session idle at `now`.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> ReapReport {
        let snapshot = self.registry.list();
        let mut report = ReapReport {
            scanned: snapshot.len(),
            ..Default::default()
        };

        for handle in snapshot {
            if !self.is_idle(&handle, now) {
                continue;
            }
            if handle.is_busy() {
                tracing::debug!(session_key = %handle.key, "idle session has a turn in flight, skipping");
                report.skipped_busy += 1;
                continue;
            }

            // Re-check against the live handle: it may have been touched
            // since the snapshot was taken.
            let result = self.registry.remove_key_if(&handle.key, "idle", |live| {
                self.is_idle(live, now) && !live.is_busy()
            });
            match result {
                Ok(true) => report.evicted.push(handle.key.clone()),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(session_key = %handle.key, error = %e, "idle session eviction failed");
                    report.failed.push((handle.key.clone(), e.to_string()));
                }
            }
        }

        if !report.evicted.is_empty() || !report.failed.is_empty() {
            tracing::info!(
                scanned = report.scanned,
                evicted = report.evicted.len(),
                failed = report.failed.len(),
                "reaper sweep"
            );
        }
        TraceEvent::ReaperSweep {
            scanned: report.scanned,
            evicted: report.evicted.len(),
            failed: report.failed.len(),
            skipped_busy: report.skipped_busy,
        }
        .emit();

        report
    }

    /// Spawn the sweep loop on the current tokio runtime.
    pub fn start(self) -> ReaperHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let period = self.interval;

        let task = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(
                interval_secs = period.as_secs(),
                max_idle_secs = self.max_idle.num_seconds(),
                "session reaper started"
            );
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        self.sweep();
                    }
                }
            }
            tracing::info!("session reaper stopped");
        });

        ReaperHandle { cancel, task }
    }
}

/// Running reaper; stop it explicitly during shutdown.
pub struct ReaperHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Stop the loop and wait for an in-progress sweep to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "session reaper task ended abnormally");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}
