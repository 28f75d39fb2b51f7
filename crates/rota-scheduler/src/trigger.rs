//! Trigger construction and fire-time computation. Pure functions only.

use chrono::{DateTime, Duration, Utc};

use crate::types::Trigger;

/// How far past its scheduled time a job may still run after the process
/// comes back up. Anything older is permanently missed and removed.
pub const MISFIRE_GRACE_DAYS: i64 = 31;

pub fn misfire_grace() -> Duration {
    Duration::days(MISFIRE_GRACE_DAYS)
}

/// A trigger matching exactly one instant.
pub fn single_instant(at: DateTime<Utc>) -> Trigger {
    Trigger::Once { at }
}

/// A trigger matching the set `{deadline_instant - offset days}`, each at
/// the same wall-clock time as the deadline itself.
///
/// Semantically "fire once, at the earliest still-eligible member, then
/// retire". When a reschedule pushes several offsets into the past at once,
/// the earliest eligible member is already due, so exactly one immediate
/// firing occurs — not one per missed offset.
pub fn reminder_set(deadline_instant: DateTime<Utc>, offsets: &[u32]) -> Trigger {
    let mut instants: Vec<DateTime<Utc>> = offsets
        .iter()
        .map(|days| deadline_instant - Duration::days(i64::from(*days)))
        .collect();
    instants.sort();
    instants.dedup();
    Trigger::EarliestOf { instants }
}

/// The instant the store should poll on, as of `now`.
///
/// Members more than the grace window in the past are skipped; `None` means
/// the trigger is exhausted (every instant permanently missed) and the job
/// should be dropped without firing.
pub fn next_fire(trigger: &Trigger, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let floor = now - misfire_grace();
    match trigger {
        Trigger::Once { at } => (*at >= floor).then_some(*at),
        Trigger::EarliestOf { instants } => instants.iter().copied().find(|t| *t >= floor),
    }
}

/// The earliest instant the trigger names, eligible or not.
pub fn earliest(trigger: &Trigger) -> Option<DateTime<Utc>> {
    match trigger {
        Trigger::Once { at } => Some(*at),
        Trigger::EarliestOf { instants } => instants.first().copied(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    fn deadline() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 23, 59, 0).unwrap()
    }

    #[test]
    fn single_instant_matches_exactly_one_time() {
        let trigger = single_instant(deadline());
        assert_eq!(trigger, Trigger::Once { at: deadline() });
    }

    #[test]
    fn reminder_set_is_sorted_and_deduplicated() {
        let trigger = reminder_set(deadline(), &[1, 7, 7]);
        let Trigger::EarliestOf { instants } = trigger else {
            panic!("expected EarliestOf");
        };
        assert_eq!(
            instants,
            vec![
                deadline() - Duration::days(7),
                deadline() - Duration::days(1),
            ]
        );
    }

    #[test]
    fn reminder_instants_keep_the_deadline_wall_clock() {
        let trigger = reminder_set(deadline(), &[7]);
        let Trigger::EarliestOf { instants } = trigger else {
            panic!("expected EarliestOf");
        };
        assert_eq!(instants[0].hour(), 23);
        assert_eq!(instants[0].minute(), 59);
    }

    #[test]
    fn once_in_future_fires_at_its_instant() {
        let now = deadline() - Duration::days(10);
        assert_eq!(next_fire(&single_instant(deadline()), now), Some(deadline()));
    }

    #[test]
    fn once_within_grace_fires_late() {
        let now = deadline() + Duration::days(10);
        assert_eq!(next_fire(&single_instant(deadline()), now), Some(deadline()));
    }

    #[test]
    fn once_beyond_grace_is_exhausted() {
        let now = deadline() + Duration::days(MISFIRE_GRACE_DAYS + 1);
        assert_eq!(next_fire(&single_instant(deadline()), now), None);
    }

    #[test]
    fn earliest_of_collapses_past_members_to_one_firing() {
        // Offsets 7 and 3 already past, 1 still ahead: the earliest eligible
        // member is 7 days out, i.e. already due — exactly one immediate
        // firing, not one per missed offset.
        let trigger = reminder_set(deadline(), &[7, 3, 1]);
        let now = deadline() - Duration::days(2);
        let fire = next_fire(&trigger, now).unwrap();
        assert_eq!(fire, deadline() - Duration::days(7));
        assert!(fire <= now);
    }

    #[test]
    fn earliest_of_skips_members_beyond_grace() {
        let trigger = reminder_set(deadline(), &[60, 1]);
        let now = deadline();
        assert_eq!(
            next_fire(&trigger, now),
            Some(deadline() - Duration::days(1))
        );
    }

    #[test]
    fn earliest_of_with_every_member_stale_is_exhausted() {
        let trigger = reminder_set(deadline(), &[7, 1]);
        let now = deadline() + Duration::days(MISFIRE_GRACE_DAYS + 2);
        assert_eq!(next_fire(&trigger, now), None);
    }
}
