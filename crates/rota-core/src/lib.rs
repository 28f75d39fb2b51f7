//! `rota-core` — shared types and configuration for the rota workspace.
//!
//! Holds the plain-data [`Rotation`] descriptor, the process-wide read-only
//! [`DeadlineConfig`] table (which deadline kinds exist, whether they are
//! rotation-scoped or standalone, and at which lead times reminders fire),
//! and the core error type. Loaded once at startup; never re-read at
//! runtime.

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    DatabaseConfig, DeadlineConfig, DeadlineScope, DeadlineSpec, RotaConfig, REMINDER_HANDLER,
};
pub use error::{Result, RotaError};
pub use types::Rotation;
