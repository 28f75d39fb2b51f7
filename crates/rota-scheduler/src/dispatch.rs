//! Handler registry and fire-time dispatch.
//!
//! Persisted jobs reference handlers by name — a row must stay resolvable
//! after a restart, so it can never hold a live closure. The registry is
//! built and validated once at startup; the dispatcher re-attaches the live
//! [`Scheduler`] instance when a job fires.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use rota_core::DeadlineConfig;
use tracing::{error, warn};

use crate::error::{Result, SchedulerError};
use crate::scheduler::Scheduler;
use crate::types::{JobPayload, ScheduledJob};

/// A deadline or reminder handler.
///
/// Handlers are defined by the surrounding application, may perform their
/// own I/O (database writes, outbound mail), and receive the live scheduler
/// so they can schedule follow-up jobs. Delivery is at-least-once; handlers
/// are responsible for their own idempotency against shared state.
#[async_trait]
pub trait DeadlineHandler: Send + Sync {
    async fn run(&self, scheduler: Arc<Scheduler>, payload: JobPayload) -> Result<()>;
}

/// Boxed future type for plain-closure handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

#[async_trait]
impl<F> DeadlineHandler for F
where
    F: Fn(Arc<Scheduler>, JobPayload) -> HandlerFuture + Send + Sync,
{
    async fn run(&self, scheduler: Arc<Scheduler>, payload: JobPayload) -> Result<()> {
        (self)(scheduler, payload).await
    }
}

/// Statically enumerable map from handler name to handler.
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn DeadlineHandler>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder {
            handlers: HashMap::new(),
        }
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn DeadlineHandler>> {
        self.handlers.get(name).cloned()
    }
}

pub struct HandlerRegistryBuilder {
    handlers: HashMap<String, Arc<dyn DeadlineHandler>>,
}

impl HandlerRegistryBuilder {
    pub fn register(
        mut self,
        name: impl Into<String>,
        handler: impl DeadlineHandler + 'static,
    ) -> Self {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    /// Validate against the deadline table: every configured kind, plus the
    /// fixed `"reminder"` name, must resolve. Catching a rename here turns a
    /// fire-time surprise into a startup failure.
    pub fn build(self, config: &DeadlineConfig) -> Result<HandlerRegistry> {
        for name in config.required_handlers() {
            if !self.handlers.contains_key(name) {
                return Err(SchedulerError::HandlerNotFound {
                    name: name.to_string(),
                });
            }
        }
        Ok(HandlerRegistry {
            handlers: self.handlers,
        })
    }
}

/// Invokes handlers for fired jobs, re-attaching the live scheduler.
pub(crate) struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    /// Weak so the engine task never keeps the scheduler alive on its own.
    scheduler: Weak<Scheduler>,
}

impl Dispatcher {
    pub(crate) fn new(registry: Arc<HandlerRegistry>, scheduler: Weak<Scheduler>) -> Self {
        Self { registry, scheduler }
    }

    /// Spawn the handler for a fired job as its own task, so slow handler
    /// bodies never stall the tick loop.
    ///
    /// An unresolvable handler name means the persisted schedule no longer
    /// matches the deployed registry — a configuration error, surfaced to
    /// the caller and never retried.
    pub(crate) fn dispatch(&self, job: &ScheduledJob) -> Result<()> {
        let handler =
            self.registry
                .resolve(&job.handler)
                .ok_or_else(|| SchedulerError::HandlerNotFound {
                    name: job.handler.clone(),
                })?;
        let Some(scheduler) = self.scheduler.upgrade() else {
            // Scheduler already torn down; the job is consumed unfired.
            warn!(job_id = %job.id, "scheduler gone; skipping dispatch");
            return Ok(());
        };

        let job_id = job.id.clone();
        let payload = job.payload.clone();
        tokio::spawn(async move {
            if let Err(e) = handler.run(scheduler, payload).await {
                error!(job_id = %job_id, "handler failed: {e}");
            }
        });
        Ok(())
    }
}
