use chrono::{DateTime, Duration, Utc};
use conditions::Validity;
use core_types::Timeframe;

/// Per-item satisfaction state for one playbook.
#[derive(Debug, Clone, Default)]
pub struct ItemState {
    /// Close time of the bar on which the item last evaluated true.
    satisfied_bar_close: Option<DateTime<Utc>>,
    /// Wall-clock instant of that evaluation, for minute-based validity.
    satisfied_at: Option<DateTime<Utc>>,
}

/// Tracks validity windows for a playbook's items across cycles.
///
/// When an item first evaluates true at bar `b0`, it is treated as still
/// true for the next `validity_bars` bars (or `validity_minutes` minutes)
/// without re-evaluation. After the window elapses the item must prove
/// itself again.
#[derive(Debug, Clone)]
pub struct PlaybookTracker {
    items: Vec<ItemState>,
}

impl PlaybookTracker {
    pub fn new(item_count: usize) -> Self {
        Self { items: vec![ItemState::default(); item_count] }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether item `idx` is inside its validity window at the current bar.
    /// Items without a validity never carry over.
    pub fn within_validity(
        &self,
        idx: usize,
        validity: Option<Validity>,
        timeframe: Timeframe,
        current_bar_close: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        let state = match self.items.get(idx) {
            Some(state) => state,
            None => return false,
        };
        match validity {
            None => false,
            Some(Validity::Bars(bars)) => match state.satisfied_bar_close {
                Some(satisfied) => {
                    current_bar_close <= satisfied + timeframe.duration() * bars as i32
                }
                None => false,
            },
            Some(Validity::Minutes(minutes)) => match state.satisfied_at {
                Some(satisfied) => now <= satisfied + Duration::minutes(minutes as i64),
                None => false,
            },
        }
    }

    /// Records a fresh true evaluation for item `idx`.
    pub fn stamp(&mut self, idx: usize, bar_close: DateTime<Utc>, now: DateTime<Utc>) {
        if let Some(state) = self.items.get_mut(idx) {
            state.satisfied_bar_close = Some(bar_close);
            state.satisfied_at = Some(now);
        }
    }

    /// Clears item `idx` after a false re-evaluation outside the window.
    pub fn clear(&mut self, idx: usize) {
        if let Some(state) = self.items.get_mut(idx) {
            *state = ItemState::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn bar_validity_counts_bars_from_satisfaction() {
        let mut tracker = PlaybookTracker::new(1);
        let b0 = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let now = Utc::now();
        tracker.stamp(0, b0, now);

        let validity = Some(Validity::Bars(10));
        // Three bars later: inside the window.
        let b3 = b0 + Duration::hours(3);
        assert!(tracker.within_validity(0, validity, Timeframe::H1, b3, now));
        // Exactly ten bars later: still valid.
        let b10 = b0 + Duration::hours(10);
        assert!(tracker.within_validity(0, validity, Timeframe::H1, b10, now));
        // Eleven bars later: expired.
        let b11 = b0 + Duration::hours(11);
        assert!(!tracker.within_validity(0, validity, Timeframe::H1, b11, now));
    }

    #[test]
    fn minute_validity_uses_wall_clock() {
        let mut tracker = PlaybookTracker::new(1);
        let b0 = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let satisfied_at = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 30).unwrap();
        tracker.stamp(0, b0, satisfied_at);

        let validity = Some(Validity::Minutes(5));
        let inside = satisfied_at + Duration::minutes(4);
        let outside = satisfied_at + Duration::minutes(6);
        assert!(tracker.within_validity(0, validity, Timeframe::M1, b0, inside));
        assert!(!tracker.within_validity(0, validity, Timeframe::M1, b0, outside));
    }

    #[test]
    fn no_validity_means_no_carry_over() {
        let mut tracker = PlaybookTracker::new(1);
        let b0 = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        tracker.stamp(0, b0, Utc::now());
        assert!(!tracker.within_validity(0, None, Timeframe::H1, b0, Utc::now()));
    }

    #[test]
    fn clear_resets_the_window() {
        let mut tracker = PlaybookTracker::new(2);
        let b0 = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        tracker.stamp(1, b0, Utc::now());
        tracker.clear(1);
        assert!(!tracker.within_validity(
            1,
            Some(Validity::Bars(10)),
            Timeframe::H1,
            b0,
            Utc::now()
        ));
    }
}
