use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::trigger;

/// Defines when a job should fire. One-shot in both variants: a job is
/// consumed by its first firing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    /// Fire exactly once at the given UTC instant.
    Once { at: DateTime<Utc> },

    /// Fire once at the earliest still-eligible member of `instants`, then
    /// retire — the remaining members never fire. Used for reminder sets;
    /// `instants` is sorted ascending and deduplicated.
    EarliestOf { instants: Vec<DateTime<Utc>> },
}

/// Flat, restart-safe payload carried by a job.
///
/// Persisted jobs must survive a process restart, so the payload holds only
/// plain data — never live references. Handlers re-derive everything else
/// (rotation rows, mail recipients) from their own collaborators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
    /// The deadline kind this job is about. Set for reminder jobs, whose
    /// handler name is the generic `"reminder"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    /// Rotation the deadline belongs to, for rotation-scoped kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation_id: Option<i64>,
    /// Additional caller-supplied context for standalone deadlines
    /// (e.g. a student or project id).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

/// A persisted job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    /// Deterministic id — `{series}_{part}_{kind}` for rotation deadlines,
    /// `reminders_for_{series}_{part}_{kind}` for their reminder sets,
    /// `{kind}_{suffix}` for standalone deadlines. Primary key; scheduling
    /// under an existing id replaces the prior job.
    pub id: String,
    /// Name of the handler invoked at fire time.
    pub handler: String,
    /// When the job fires.
    pub trigger: Trigger,
    /// Data handed to the handler.
    pub payload: JobPayload,
    /// The instant the engine polls on — derived from `trigger`, never set
    /// directly.
    pub next_fire: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledJob {
    /// Build a fresh job record as of `now`.
    ///
    /// A job whose every instant already lies beyond the misfire grace
    /// window still yields a row — replace semantics must supersede any
    /// previous job under the same id — with `next_fire` placed before the
    /// grace floor so the engine's misfire sweep removes it.
    pub fn new(
        id: impl Into<String>,
        handler: impl Into<String>,
        trigger: Trigger,
        payload: JobPayload,
        now: DateTime<Utc>,
    ) -> Self {
        let next_fire = trigger::next_fire(&trigger, now)
            .or_else(|| trigger::earliest(&trigger))
            .unwrap_or_else(|| now - trigger::misfire_grace() - chrono::Duration::seconds(1));
        Self {
            id: id.into(),
            handler: handler.into(),
            trigger,
            payload,
            next_fire,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Canonical timestamp encoding for the store: fixed-width RFC 3339 UTC, so
/// lexicographic order in SQLite matches chronological order.
pub(crate) fn encode_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
