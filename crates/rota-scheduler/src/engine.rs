use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::db::JobStore;
use crate::dispatch::Dispatcher;
use crate::error::Result;

/// Timer mechanism: polls the job store every second and fires due jobs.
///
/// The loop serialises *triggering* only — each fired handler runs as its
/// own task. A job row is consumed after its handler has been dispatched,
/// so a crash on the fire boundary re-fires on restart (at-least-once).
pub(crate) struct Engine {
    store: Arc<JobStore>,
    dispatcher: Dispatcher,
}

impl Engine {
    pub(crate) fn new(store: Arc<JobStore>, dispatcher: Dispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// Main event loop. Polls every second until `shutdown` broadcasts
    /// `true`. In-flight handler tasks are not cancelled.
    pub(crate) async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("deadline engine started");
        self.recover();

        let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick() {
                        error!("deadline engine tick error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("deadline engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Startup pass: drop jobs missed beyond the grace window, then log the
    /// schedule that survived the restart.
    pub(crate) fn recover(&self) {
        let now = Utc::now();
        match self.store.sweep_misfired(now) {
            Ok(sweep) if sweep.dropped > 0 || sweep.advanced > 0 => {
                warn!(dropped = sweep.dropped, advanced = sweep.advanced,
                      "misfire sweep on startup");
            }
            Err(e) => error!("startup misfire sweep failed: {e}"),
            _ => {}
        }
        match self.store.list() {
            Ok(jobs) => {
                info!(count = jobs.len(), "recovered persisted schedule");
                for job in jobs {
                    debug!(job_id = %job.id, handler = %job.handler,
                           next_fire = %job.next_fire, trigger = ?job.trigger,
                           "recovered job");
                }
            }
            Err(e) => error!("could not enumerate recovered jobs: {e}"),
        }
    }

    /// Fire every job whose instant has arrived, consuming each row.
    pub(crate) fn tick(&self) -> Result<()> {
        let now = Utc::now();

        let sweep = self.store.sweep_misfired(now)?;
        if sweep.dropped > 0 {
            warn!(count = sweep.dropped, "dropped jobs missed beyond grace");
        }

        for job in self.store.due(now)? {
            info!(job_id = %job.id, handler = %job.handler,
                  scheduled = %job.next_fire, "firing deadline job");
            if let Err(e) = self.dispatcher.dispatch(&job) {
                // Configuration mismatch between persisted state and the
                // deployed registry; the job is consumed, never retried.
                error!(job_id = %job.id, handler = %job.handler, "dispatch failed: {e}");
            }
            if !self.store.consume(&job.id, job.updated_at)? {
                debug!(job_id = %job.id,
                       "job replaced while firing; keeping the newer schedule");
            }
        }
        Ok(())
    }
}
