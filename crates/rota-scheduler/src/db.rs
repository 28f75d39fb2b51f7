use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::warn;

use crate::error::Result;
use crate::trigger;
use crate::types::{decode_ts, encode_ts, JobPayload, ScheduledJob, Trigger};

/// Initialise the job store schema in `conn`.
///
/// Creates the `jobs` table (idempotent) and an index on `next_fire` so the
/// polling and misfire-sweep queries stay efficient.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id          TEXT NOT NULL PRIMARY KEY,
            handler     TEXT NOT NULL,
            trigger     TEXT NOT NULL,   -- JSON-encoded Trigger enum
            payload     TEXT NOT NULL,   -- JSON-encoded JobPayload
            next_fire   TEXT NOT NULL,   -- fixed-width RFC 3339 UTC
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_jobs_next_fire ON jobs (next_fire);
        ",
    )?;
    Ok(())
}

/// Result of a misfire sweep.
#[derive(Debug, Clone, Copy, Default)]
pub struct MisfireSweep {
    /// Jobs whose stored instant was stale but which still have an eligible
    /// member (reminder sets spanning the grace boundary).
    pub advanced: usize,
    /// Jobs permanently missed and removed without firing.
    pub dropped: usize,
}

/// Durable job store over a single SQLite connection.
///
/// All schedule mutation goes through this type; jobs are never updated in
/// place — [`JobStore::upsert`] atomically replaces the whole row by id.
pub struct JobStore {
    db: Mutex<Connection>,
}

impl JobStore {
    /// Wrap a connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Create or replace a job by id. `created_at` of an existing row is
    /// preserved; everything else is superseded.
    pub fn upsert(&self, job: &ScheduledJob) -> Result<()> {
        let trigger_json = serde_json::to_string(&job.trigger)?;
        let payload_json = serde_json::to_string(&job.payload)?;
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO jobs (id, handler, trigger, payload, next_fire, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                 handler    = excluded.handler,
                 trigger    = excluded.trigger,
                 payload    = excluded.payload,
                 next_fire  = excluded.next_fire,
                 updated_at = excluded.updated_at",
            rusqlite::params![
                job.id,
                job.handler,
                trigger_json,
                payload_json,
                encode_ts(job.next_fire),
                encode_ts(job.created_at),
                encode_ts(job.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Remove a job by id. A missing row is not an error — firing and
    /// rescheduling may race, and removal only needs to be idempotent.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let n = db.execute("DELETE FROM jobs WHERE id = ?1", [id])?;
        Ok(n > 0)
    }

    /// Consume a fired job: delete the row only if it has not been replaced
    /// since the [`JobStore::due`] snapshot that produced it.
    ///
    /// Firing and rescheduling race — a handler or the application may
    /// upsert the same id with a new date while its old incarnation is
    /// being fired. `false` means exactly that: a fresher row arrived
    /// mid-fire and must survive.
    pub fn consume(&self, id: &str, as_of: DateTime<Utc>) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "DELETE FROM jobs WHERE id = ?1 AND updated_at = ?2",
            rusqlite::params![id, encode_ts(as_of)],
        )?;
        Ok(n > 0)
    }

    /// Remove every pending job. Returns the number of rows deleted.
    pub fn remove_all(&self) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let n = db.execute("DELETE FROM jobs", [])?;
        Ok(n)
    }

    /// Fetch a job by id.
    pub fn get(&self, id: &str) -> Result<Option<ScheduledJob>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, handler, trigger, payload, next_fire, created_at, updated_at
             FROM jobs WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map([id], row_to_raw)?;
        match rows.next() {
            Some(raw) => Ok(decode_row(raw?)),
            None => Ok(None),
        }
    }

    /// Return all known jobs ordered by next fire time.
    pub fn list(&self) -> Result<Vec<ScheduledJob>> {
        self.select_jobs("SELECT id, handler, trigger, payload, next_fire, created_at, updated_at
             FROM jobs ORDER BY next_fire", &[])
    }

    /// Jobs whose fire instant has arrived, earliest first.
    pub fn due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledJob>> {
        self.select_jobs(
            "SELECT id, handler, trigger, payload, next_fire, created_at, updated_at
             FROM jobs WHERE next_fire <= ?1 ORDER BY next_fire",
            &[&encode_ts(now)],
        )
    }

    /// Handle jobs whose stored instant is more than the grace window past.
    ///
    /// A reminder set with a later still-eligible member is advanced to that
    /// member; anything else is permanently missed and removed without its
    /// handler ever running.
    pub fn sweep_misfired(&self, now: DateTime<Utc>) -> Result<MisfireSweep> {
        let floor = now - trigger::misfire_grace();
        let stale = self.select_jobs(
            "SELECT id, handler, trigger, payload, next_fire, created_at, updated_at
             FROM jobs WHERE next_fire < ?1 ORDER BY next_fire",
            &[&encode_ts(floor)],
        )?;

        let mut sweep = MisfireSweep::default();
        let db = self.db.lock().unwrap();
        for job in stale {
            match trigger::next_fire(&job.trigger, now) {
                Some(next) => {
                    db.execute(
                        "UPDATE jobs SET next_fire = ?1, updated_at = ?2 WHERE id = ?3",
                        rusqlite::params![encode_ts(next), encode_ts(now), job.id],
                    )?;
                    warn!(job_id = %job.id, next_fire = %next,
                          "instants missed beyond grace; advanced to next eligible member");
                    sweep.advanced += 1;
                }
                None => {
                    db.execute("DELETE FROM jobs WHERE id = ?1", [&job.id])?;
                    warn!(job_id = %job.id, scheduled = %job.next_fire,
                          "job missed beyond grace window; dropped without firing");
                    sweep.dropped += 1;
                }
            }
        }
        Ok(sweep)
    }

    fn select_jobs(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<ScheduledJob>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(sql)?;
        let rows: Vec<RawRow> = stmt
            .query_map(params, row_to_raw)?
            .collect::<std::result::Result<_, _>>()?;
        Ok(rows.into_iter().filter_map(decode_row).collect())
    }
}

type RawRow = (String, String, String, String, String, String, String);

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?, // id
        row.get(1)?, // handler
        row.get(2)?, // trigger JSON
        row.get(3)?, // payload JSON
        row.get(4)?, // next_fire
        row.get(5)?, // created_at
        row.get(6)?, // updated_at
    ))
}

/// Decode a raw row, skipping (with a warning) anything that no longer
/// parses — a corrupt row must not wedge the whole schedule.
fn decode_row(raw: RawRow) -> Option<ScheduledJob> {
    let (id, handler, trigger_json, payload_json, next_fire, created_at, updated_at) = raw;
    let decoded = (|| {
        let trigger: Trigger = serde_json::from_str(&trigger_json).ok()?;
        let payload: JobPayload = serde_json::from_str(&payload_json).ok()?;
        Some(ScheduledJob {
            id: id.clone(),
            handler,
            trigger,
            payload,
            next_fire: decode_ts(&next_fire)?,
            created_at: decode_ts(&created_at)?,
            updated_at: decode_ts(&updated_at)?,
        })
    })();
    if decoded.is_none() {
        warn!(job_id = %id, "skipping undecodable job row");
    }
    decoded
}
