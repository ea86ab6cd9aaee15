use std::time::{SystemTime, UNIX_EPOCH};

use super::constants::SECONDS_PER_DAY;

/// Milliseconds since the Unix epoch, as stored on identities and events.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Day number (UTC) containing the given timestamp.
pub fn unix_day(millis: u64) -> u64 {
    millis / 1000 / SECONDS_PER_DAY
}
