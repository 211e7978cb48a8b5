//! Timestamps for backup layer windows and revision history.

use std::fmt;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Nanosecond wall-clock timestamp. The zero value means "unset".
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Minimum non-zero timestamp. Assigned to descriptors from old backups
    /// that never recorded a modification time.
    pub const MIN: Timestamp = Timestamp(1);

    pub fn from_nanos(nanos: i64) -> Self {
        Timestamp(nanos)
    }

    pub fn as_nanos(&self) -> i64 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.0 / 1_000_000_000, self.0 % 1_000_000_000)
    }
}

/// Date-based subdirectory name for an incremental layer (`YYYYMMDD/HHMMSS.ss`),
/// appended beneath the base backup's path. Lexicographic order of these names
/// is chronological, which is what layer discovery relies on.
pub fn date_based_folder_name(t: DateTime<Utc>) -> String {
    let centis = t.nanosecond() / 10_000_000;
    format!("{}{:02}", t.format("%Y%m%d/%H%M%S."), centis)
}
