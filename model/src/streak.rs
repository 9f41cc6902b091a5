//! Daily observation streak.
//!
//! A streak counts consecutive calendar days with at least one observation.
//! Days are taken in the offset of the `now` value passed in, so callers
//! decide which local calendar applies.

use chrono::{DateTime, Days, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakState {
    pub count: u32,
    /// When the last counted observation was logged.
    pub last_observed_at: Option<DateTime<Utc>>,
}

/// Result of logging an observation against a streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakAdvance {
    /// An observation was already counted today.
    Unchanged,
    /// The last counted day was yesterday; the streak grew by one.
    Extended(StreakState),
    /// No observation yesterday; a new streak of one starts today.
    Restarted(StreakState),
}

impl StreakAdvance {
    pub fn state(&self) -> Option<StreakState> {
        match self {
            Self::Unchanged => None,
            Self::Extended(s) | Self::Restarted(s) => Some(*s),
        }
    }
}

fn yesterday(today: NaiveDate) -> Option<NaiveDate> {
    today.checked_sub_days(Days::new(1))
}

impl StreakState {
    pub fn new(count: u32, last_observed_at: Option<DateTime<Utc>>) -> Self {
        Self {
            count,
            last_observed_at,
        }
    }

    fn last_day(&self, now: &DateTime<FixedOffset>) -> Option<NaiveDate> {
        self.last_observed_at
            .map(|at| at.with_timezone(now.offset()).date_naive())
    }

    /// The streak as it stands at `now`: zero once a full day has been missed.
    pub fn refreshed(&self, now: DateTime<FixedOffset>) -> StreakState {
        let today = now.date_naive();
        match self.last_day(&now) {
            Some(day) if day == today || Some(day) == yesterday(today) => *self,
            Some(_) => StreakState {
                count: 0,
                last_observed_at: self.last_observed_at,
            },
            None => StreakState {
                count: 0,
                last_observed_at: None,
            },
        }
    }

    /// Applies an observation logged at `now`.
    pub fn advance(&self, now: DateTime<FixedOffset>) -> StreakAdvance {
        let today = now.date_naive();
        let last_day = self.last_day(&now);
        if last_day == Some(today) {
            return StreakAdvance::Unchanged;
        }
        let observed = Some(now.with_timezone(&Utc));
        if last_day.is_some() && last_day == yesterday(today) {
            StreakAdvance::Extended(StreakState {
                count: self.count.saturating_add(1),
                last_observed_at: observed,
            })
        } else {
            StreakAdvance::Restarted(StreakState {
                count: 1,
                last_observed_at: observed,
            })
        }
    }
}
