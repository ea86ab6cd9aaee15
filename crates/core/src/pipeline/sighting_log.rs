use std::collections::HashMap;
use std::sync::Mutex;

use crate::identity::domain::identity::IdentityId;
use crate::shared::clock::unix_day;

/// Remembers which identities were already announced today, so a cow
/// standing in front of a camera all afternoon is reported once per day.
///
/// Shared by all camera workers of a process.
#[derive(Default)]
pub struct SightingLog {
    last_day: Mutex<HashMap<IdentityId, u64>>,
}

impl SightingLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a sighting at `timestamp_ms`. Returns `true` for the first
    /// sighting of `id` on that day.
    pub fn record(&self, id: IdentityId, timestamp_ms: u64) -> bool {
        let day = unix_day(timestamp_ms);
        let mut last_day = self.last_day.lock().unwrap_or_else(|e| e.into_inner());
        match last_day.get(&id) {
            Some(&seen) if seen >= day => false,
            _ => {
                last_day.insert(id, day);
                true
            }
        }
    }

    pub fn seen_count(&self) -> usize {
        self.last_day.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY_MS: u64 = 86_400_000;

    #[test]
    fn test_one_sighting_per_day() {
        let log = SightingLog::new();
        let id = IdentityId(4);
        assert!(log.record(id, 10 * DAY_MS + 5));
        assert!(!log.record(id, 10 * DAY_MS + 60_000));
        assert!(log.record(id, 11 * DAY_MS));
        assert!(!log.record(id, 11 * DAY_MS + 1));
    }

    #[test]
    fn test_identities_are_independent() {
        let log = SightingLog::new();
        assert!(log.record(IdentityId(1), DAY_MS));
        assert!(log.record(IdentityId(2), DAY_MS));
        assert_eq!(log.seen_count(), 2);
    }

    #[test]
    fn test_out_of_order_timestamp_does_not_repeat() {
        let log = SightingLog::new();
        assert!(log.record(IdentityId(1), 5 * DAY_MS));
        assert!(!log.record(IdentityId(1), 4 * DAY_MS));
    }
}
