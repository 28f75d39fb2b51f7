use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rota_core::{DeadlineConfig, Rotation, REMINDER_HANDLER};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::db::JobStore;
use crate::dispatch::{Dispatcher, HandlerRegistry};
use crate::engine::Engine;
use crate::error::{Result, SchedulerError};
use crate::trigger;
use crate::types::{JobPayload, ScheduledJob};

/// The deadline scheduler.
///
/// Owns the job store and the deadline table, exposes the scheduling API,
/// and drives the timer engine. Constructed once at process start via
/// [`Scheduler::start`]; the live instance is injected into the engine's
/// dispatch path explicitly, so handlers receive it by reference rather
/// than through global state.
pub struct Scheduler {
    store: Arc<JobStore>,
    config: DeadlineConfig,
    shutdown_tx: watch::Sender<bool>,
    stopped: AtomicBool,
}

impl Scheduler {
    /// Construct the scheduler and start its engine loop immediately.
    ///
    /// Must be called from within a tokio runtime. The registry has already
    /// been validated against `config` at construction time, so every
    /// persisted job written by this process resolves at fire time.
    pub fn start(
        store: Arc<JobStore>,
        registry: Arc<HandlerRegistry>,
        config: DeadlineConfig,
    ) -> Arc<Self> {
        let (scheduler, engine) = Self::with_engine(store, registry, config);
        let shutdown_rx = scheduler.shutdown_tx.subscribe();
        tokio::spawn(engine.run(shutdown_rx));
        scheduler
    }

    /// Construct the scheduler and its engine without spawning the loop.
    /// Tests drive the engine by hand for deterministic firing.
    pub(crate) fn with_engine(
        store: Arc<JobStore>,
        registry: Arc<HandlerRegistry>,
        config: DeadlineConfig,
    ) -> (Arc<Self>, Engine) {
        let (shutdown_tx, _) = watch::channel(false);
        let scheduler = Arc::new(Self {
            store: store.clone(),
            config,
            shutdown_tx,
            stopped: AtomicBool::new(false),
        });
        let dispatcher = Dispatcher::new(registry, Arc::downgrade(&scheduler));
        (scheduler, Engine::new(store, dispatcher))
    }

    /// Stop the engine loop. Idempotent; in-flight handler tasks are left
    /// to finish on their own.
    pub fn shutdown(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            info!("scheduler shutdown requested");
            let _ = self.shutdown_tx.send(true);
        }
    }

    /// Schedule (or reschedule) one of a rotation's deadlines.
    ///
    /// Registers a one-shot job under `{series}_{part}_{kind}`, replacing
    /// any pending job with that id. Kinds with configured reminder offsets
    /// get a second job under `reminders_for_{...}` whose trigger is the
    /// reminder set for the new date. Rescheduling is therefore idempotent:
    /// calling this again with a different date simply supersedes both jobs.
    pub fn schedule_rotation_deadline(
        &self,
        when: NaiveDate,
        kind: &str,
        rotation: &Rotation,
    ) -> Result<()> {
        let spec = self
            .config
            .rotation_spec(kind)
            .ok_or_else(|| SchedulerError::UnknownDeadline {
                kind: kind.to_string(),
            })?;

        let at = Self::normalize_time(when);
        let now = Utc::now();
        let job_id = format!("{}_{}_{}", rotation.series, rotation.part, kind);
        debug!(job_id = %job_id, fire_at = %at, "scheduling rotation deadline");

        let payload = JobPayload {
            deadline: Some(kind.to_string()),
            rotation_id: Some(rotation.id),
            extra: BTreeMap::new(),
        };
        self.store.upsert(&ScheduledJob::new(
            &job_id,
            kind,
            trigger::single_instant(at),
            payload.clone(),
            now,
        ))?;

        if !spec.reminder_offsets.is_empty() {
            self.store.upsert(&ScheduledJob::new(
                format!("reminders_for_{job_id}"),
                REMINDER_HANDLER,
                trigger::reminder_set(at, &spec.reminder_offsets),
                payload,
                now,
            ))?;
        }
        Ok(())
    }

    /// Schedule (or reschedule) a deadline tied to an individual entity
    /// rather than a whole rotation — e.g. one project's report submission.
    ///
    /// Single one-shot job under `{kind}_{suffix}`, no reminders. `extra`
    /// is carried verbatim to the handler.
    pub fn schedule_standalone_deadline(
        &self,
        when: NaiveDate,
        kind: &str,
        suffix: &str,
        extra: BTreeMap<String, String>,
    ) -> Result<()> {
        self.config
            .standalone_spec(kind)
            .ok_or_else(|| SchedulerError::UnknownDeadline {
                kind: kind.to_string(),
            })?;

        let at = Self::normalize_time(when);
        let job_id = format!("{kind}_{suffix}");
        debug!(job_id = %job_id, fire_at = %at, "scheduling standalone deadline");

        self.store.upsert(&ScheduledJob::new(
            &job_id,
            kind,
            trigger::single_instant(at),
            JobPayload {
                deadline: Some(kind.to_string()),
                rotation_id: None,
                extra,
            },
            Utc::now(),
        ))
    }

    /// The canonical fire instant for a calendar date: 23:59 on that day.
    ///
    /// Every same-day deadline across the system fires consistently just
    /// before day-end, without callers encoding a time-of-day themselves.
    /// Pure and deterministic.
    pub fn normalize_time(when: NaiveDate) -> DateTime<Utc> {
        when.and_hms_opt(23, 59, 0)
            .expect("23:59 exists on every calendar date")
            .and_utc()
    }

    /// Remove every pending job. Administrative / test-only.
    pub fn reset_all(&self) -> Result<()> {
        let removed = self.store.remove_all()?;
        info!(count = removed, "removed all scheduled jobs");
        Ok(())
    }

    /// Read-only job lookup by id.
    pub fn get_job(&self, id: &str) -> Result<Option<ScheduledJob>> {
        self.store.get(id)
    }

    /// Every pending job, ordered by next fire time.
    pub fn list_jobs(&self) -> Result<Vec<ScheduledJob>> {
        self.store.list()
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &JobStore {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use rota_core::REMINDER_HANDLER;
    use rusqlite::Connection;

    use crate::dispatch::HandlerFuture;
    use crate::types::Trigger;

    use super::*;

    fn noop() -> impl Fn(Arc<Scheduler>, JobPayload) -> HandlerFuture + Send + Sync {
        |_s: Arc<Scheduler>, _p: JobPayload| -> HandlerFuture { Box::pin(async { Ok(()) }) }
    }

    fn scheduler() -> Arc<Scheduler> {
        let store = Arc::new(JobStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let config = DeadlineConfig::default();
        let mut builder = HandlerRegistry::builder();
        for name in config.required_handlers() {
            builder = builder.register(name, noop());
        }
        let registry = builder.build(&config).unwrap();
        Scheduler::with_engine(store, Arc::new(registry), config).0
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn normalize_time_is_always_2359() {
        for day in [date(2024, 3, 1), date(2024, 12, 31), date(2025, 2, 28)] {
            let t = Scheduler::normalize_time(day);
            assert_eq!(t, Scheduler::normalize_time(day));
            assert_eq!(t.format("%H:%M:%S").to_string(), "23:59:00");
            assert_eq!(t.date_naive(), day);
        }
    }

    #[tokio::test]
    async fn rotation_deadline_schedules_job_and_reminders() {
        let scheduler = scheduler();
        let rotation = Rotation::new(10, 2024, 1);
        scheduler
            .schedule_rotation_deadline(date(2024, 3, 1), "student_choice", &rotation)
            .unwrap();

        let job = scheduler.get_job("2024_1_student_choice").unwrap().unwrap();
        assert_eq!(job.handler, "student_choice");
        assert_eq!(job.payload.rotation_id, Some(10));
        assert_eq!(
            job.trigger,
            Trigger::Once {
                at: Scheduler::normalize_time(date(2024, 3, 1))
            }
        );

        let reminders = scheduler
            .get_job("reminders_for_2024_1_student_choice")
            .unwrap()
            .unwrap();
        assert_eq!(reminders.handler, REMINDER_HANDLER);
        assert_eq!(reminders.payload.deadline.as_deref(), Some("student_choice"));
        assert_eq!(
            reminders.trigger,
            Trigger::EarliestOf {
                instants: vec![
                    Scheduler::normalize_time(date(2024, 2, 23)),
                    Scheduler::normalize_time(date(2024, 2, 29)),
                ]
            }
        );
    }

    #[tokio::test]
    async fn rescheduling_replaces_instead_of_duplicating() {
        let scheduler = scheduler();
        let rotation = Rotation::new(10, 2024, 1);
        scheduler
            .schedule_rotation_deadline(date(2024, 3, 1), "student_choice", &rotation)
            .unwrap();
        scheduler
            .schedule_rotation_deadline(date(2024, 4, 15), "student_choice", &rotation)
            .unwrap();

        let jobs = scheduler.list_jobs().unwrap();
        assert_eq!(jobs.len(), 2); // deadline + its reminder set, once each

        let job = scheduler.get_job("2024_1_student_choice").unwrap().unwrap();
        assert_eq!(
            job.trigger,
            Trigger::Once {
                at: Scheduler::normalize_time(date(2024, 4, 15))
            }
        );
    }

    #[tokio::test]
    async fn kinds_without_offsets_get_no_reminder_job() {
        let scheduler = scheduler();
        let rotation = Rotation::new(10, 2024, 2);
        scheduler
            .schedule_rotation_deadline(date(2024, 3, 1), "student_invite", &rotation)
            .unwrap();

        assert!(scheduler.get_job("2024_2_student_invite").unwrap().is_some());
        assert!(scheduler
            .get_job("reminders_for_2024_2_student_invite")
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn unknown_or_wrong_scope_kind_fails_fast() {
        let scheduler = scheduler();
        let rotation = Rotation::new(10, 2024, 1);

        let err = scheduler
            .schedule_rotation_deadline(date(2024, 3, 1), "no_such_kind", &rotation)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownDeadline { .. }));

        // A standalone kind cannot be scheduled as a rotation deadline,
        // and vice versa.
        assert!(scheduler
            .schedule_rotation_deadline(date(2024, 3, 1), "mark_project", &rotation)
            .is_err());
        assert!(scheduler
            .schedule_standalone_deadline(date(2024, 3, 1), "student_choice", "42", BTreeMap::new())
            .is_err());
    }

    #[tokio::test]
    async fn standalone_deadlines_are_independent_of_rotation_jobs() {
        let scheduler = scheduler();
        let rotation = Rotation::new(10, 2024, 1);
        scheduler
            .schedule_rotation_deadline(date(2024, 3, 1), "marking_complete", &rotation)
            .unwrap();
        scheduler
            .schedule_standalone_deadline(
                date(2024, 5, 1),
                "mark_project",
                "42",
                BTreeMap::from([("project_id".to_string(), "42".to_string())]),
            )
            .unwrap();

        let standalone = scheduler.get_job("mark_project_42").unwrap().unwrap();
        assert_eq!(standalone.payload.rotation_id, None);
        assert_eq!(standalone.payload.extra["project_id"], "42");

        // The rotation job is untouched by the standalone one.
        let job = scheduler.get_job("2024_1_marking_complete").unwrap().unwrap();
        assert_eq!(
            job.trigger,
            Trigger::Once {
                at: Scheduler::normalize_time(date(2024, 3, 1))
            }
        );
    }

    #[tokio::test]
    async fn reset_all_empties_the_schedule() {
        let scheduler = scheduler();
        let rotation = Rotation::new(10, 2024, 1);
        scheduler
            .schedule_rotation_deadline(date(2024, 3, 1), "student_choice", &rotation)
            .unwrap();
        scheduler
            .schedule_standalone_deadline(date(2024, 5, 1), "mark_project", "42", BTreeMap::new())
            .unwrap();

        scheduler.reset_all().unwrap();

        assert!(scheduler.list_jobs().unwrap().is_empty());
        assert!(scheduler.get_job("2024_1_student_choice").unwrap().is_none());
        assert!(scheduler.get_job("mark_project_42").unwrap().is_none());
    }

    #[tokio::test]
    async fn started_scheduler_fires_and_shuts_down_cleanly() {
        let store = Arc::new(JobStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let config = DeadlineConfig::default();
        let count = Arc::new(AtomicUsize::new(0));
        let mut builder = HandlerRegistry::builder();
        for name in config.required_handlers() {
            let count = count.clone();
            builder = builder.register(name, move |_s: Arc<Scheduler>, _p: JobPayload| -> HandlerFuture {
                let count = count.clone();
                Box::pin(async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            });
        }
        let registry = Arc::new(builder.build(&config).unwrap());

        let scheduler = Scheduler::start(store, registry, config);
        let yesterday = (Utc::now() - chrono::Duration::days(1)).date_naive();
        scheduler
            .schedule_standalone_deadline(yesterday, "grace_deadline", "7", BTreeMap::new())
            .unwrap();

        // The engine polls every second; give it two cycles.
        tokio::time::sleep(std::time::Duration::from_millis(2200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(scheduler.get_job("grace_deadline_7").unwrap().is_none());

        scheduler.shutdown();
        scheduler.shutdown(); // idempotent
    }
}
