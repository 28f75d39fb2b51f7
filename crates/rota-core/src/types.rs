use serde::{Deserialize, Serialize};

/// The slice of a rotation that the scheduler needs to know about.
///
/// Rotations themselves live in the application's database; the scheduler
/// only ever sees this plain-data view. `series` and `part` together
/// identify a rotation within the academic calendar (e.g. series 2024,
/// part 1) and form the deterministic job ids for its deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rotation {
    /// Database id of the rotation — the only reference carried in job
    /// payloads across restarts.
    pub id: i64,
    /// Academic year the rotation belongs to.
    pub series: i32,
    /// Ordinal of the rotation within its series.
    pub part: i32,
}

impl Rotation {
    pub fn new(id: i64, series: i32, part: i32) -> Self {
        Self { id, series, part }
    }
}
