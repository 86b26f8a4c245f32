//! Per-session duplicate suppression.
//!
//! Remembers when each identity was last logged. State lives only as long
//! as the owning resolver and is lost on restart.

use crate::types::IdentityId;
use chrono::{NaiveDateTime, TimeDelta};
use std::collections::HashMap;
use std::sync::Mutex;

pub const DEFAULT_COOLDOWN_SECS: i64 = 20;

/// Entries are pruned once the map grows past this many identities.
const PRUNE_THRESHOLD: usize = 1024;
/// Entries older than this many cooldown periods are dropped when pruning.
const PRUNE_AGE_PERIODS: i32 = 4;

pub struct CooldownTracker {
    period: TimeDelta,
    last_seen: Mutex<HashMap<IdentityId, NaiveDateTime>>,
}

impl CooldownTracker {
    pub fn new(period: TimeDelta) -> Self {
        Self {
            period,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn period(&self) -> TimeDelta {
        self.period
    }

    /// True iff `identity` was marked seen less than one period before `now`.
    ///
    /// A `now` earlier than the last sighting (wall clock set back, DST end)
    /// counts as outside the window.
    pub fn should_suppress(&self, identity: IdentityId, now: NaiveDateTime) -> bool {
        let map = self.lock();
        match map.get(&identity) {
            Some(&last) => {
                let elapsed = now - last;
                elapsed >= TimeDelta::zero() && elapsed < self.period
            }
            None => false,
        }
    }

    /// Record `now` as the last logged sighting of `identity`, overwriting any
    /// earlier entry.
    pub fn mark_seen(&self, identity: IdentityId, now: NaiveDateTime) {
        let mut map = self.lock();
        map.insert(identity, now);
        if map.len() > PRUNE_THRESHOLD {
            let horizon = self.period * PRUNE_AGE_PERIODS;
            let before = map.len();
            map.retain(|_, last| now - *last < horizon);
            tracing::debug!(pruned = before - map.len(), "pruned stale cooldown entries");
        }
    }

    /// Drop any entry for `identity`.
    pub fn forget(&self, identity: IdentityId) {
        self.lock().remove(&identity);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Entries are plain timestamps, so a poisoned map is still consistent.
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<IdentityId, NaiveDateTime>> {
        self.last_seen.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for CooldownTracker {
    fn default() -> Self {
        Self::new(TimeDelta::seconds(DEFAULT_COOLDOWN_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t(secs: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
            + TimeDelta::seconds(secs)
    }

    #[test]
    fn test_unseen_identity_not_suppressed() {
        let tracker = CooldownTracker::default();
        assert!(!tracker.should_suppress(IdentityId(1), t(0)));
    }

    #[test]
    fn test_within_period_suppressed() {
        let tracker = CooldownTracker::default();
        tracker.mark_seen(IdentityId(1), t(0));
        assert!(tracker.should_suppress(IdentityId(1), t(10)));
        assert!(tracker.should_suppress(IdentityId(1), t(19)));
        assert!(!tracker.should_suppress(IdentityId(2), t(10)));
    }

    #[test]
    fn test_period_boundary_not_suppressed() {
        let tracker = CooldownTracker::default();
        tracker.mark_seen(IdentityId(1), t(0));
        assert!(!tracker.should_suppress(IdentityId(1), t(20)));
        assert!(!tracker.should_suppress(IdentityId(1), t(21)));
    }

    #[test]
    fn test_mark_seen_overwrites() {
        let tracker = CooldownTracker::default();
        tracker.mark_seen(IdentityId(1), t(0));
        tracker.mark_seen(IdentityId(1), t(30));
        assert!(tracker.should_suppress(IdentityId(1), t(45)));
    }

    #[test]
    fn test_clock_set_back_is_outside_window() {
        let tracker = CooldownTracker::default();
        tracker.mark_seen(IdentityId(1), t(3000));
        // local time fell back 45 minutes
        assert!(!tracker.should_suppress(IdentityId(1), t(300)));
        assert!(!tracker.should_suppress(IdentityId(1), t(2999)));
        assert!(tracker.should_suppress(IdentityId(1), t(3000)));
    }

    #[test]
    fn test_zero_period_never_suppresses() {
        let tracker = CooldownTracker::new(TimeDelta::zero());
        tracker.mark_seen(IdentityId(1), t(0));
        assert!(!tracker.should_suppress(IdentityId(1), t(0)));
    }

    #[test]
    fn test_forget() {
        let tracker = CooldownTracker::default();
        tracker.mark_seen(IdentityId(1), t(0));
        tracker.forget(IdentityId(1));
        assert!(!tracker.should_suppress(IdentityId(1), t(1)));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_prunes_stale_entries_past_threshold() {
        let tracker = CooldownTracker::default();
        for i in 0..PRUNE_THRESHOLD as i64 {
            tracker.mark_seen(IdentityId(i), t(0));
        }
        assert_eq!(tracker.len(), PRUNE_THRESHOLD);
        // 1000s later everything above is older than 4 periods
        tracker.mark_seen(IdentityId(-1), t(1000));
        assert_eq!(tracker.len(), 1);
        assert!(tracker.should_suppress(IdentityId(-1), t(1005)));
    }
}
