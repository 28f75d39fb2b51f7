//! `rota-scheduler` — durable deadline scheduler with SQLite persistence.
//!
//! # Overview
//!
//! Jobs are persisted to a SQLite `jobs` table under deterministic ids, so
//! the schedule survives process restarts and rescheduling an edited
//! deadline atomically replaces the pending job. The engine polls the store
//! every second, fires any job whose instant has arrived, and consumes it —
//! every job is one-shot.
//!
//! # Trigger variants
//!
//! | Variant      | Behaviour                                               |
//! |--------------|---------------------------------------------------------|
//! | `Once`       | Single fire at an absolute UTC instant                  |
//! | `EarliestOf` | Single fire at the earliest eligible member of a set,   |
//! |              | then retire — used for reminder lead times, collapsing  |
//! |              | missed offsets into one immediate firing                |
//!
//! Jobs missed for longer than the 31-day grace window while the process
//! was down are dropped on recovery without their handler running; anything
//! more recent fires as soon as possible. Delivery is at-least-once across
//! crash boundaries, so handlers must be idempotent.

pub mod db;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod scheduler;
pub mod trigger;
pub mod types;

pub use db::{JobStore, MisfireSweep};
pub use dispatch::{DeadlineHandler, HandlerFuture, HandlerRegistry, HandlerRegistryBuilder};
pub use error::{Result, SchedulerError};
pub use scheduler::Scheduler;
pub use types::{JobPayload, ScheduledJob, Trigger};
