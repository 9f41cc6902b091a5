//! Growing batches.

use std::path::PathBuf;

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::observation::Observation;
use crate::validation::ValidationErrors;

/// One tray or sowing of microgreens, with its observations newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub sow_date: NaiveDate,
    pub comments: String,
    pub created_at: DateTime<Utc>,
    pub image_url: Option<String>,
    pub estimated_harvest_days: Option<u32>,
    pub observations: Vec<Observation>,
}

impl Batch {
    /// Whole days between sowing and `today`. Negative if sown in the future.
    pub fn days_since_sown(&self, today: NaiveDate) -> i64 {
        (today - self.sow_date).num_days()
    }

    pub fn expected_harvest_date(&self) -> Option<NaiveDate> {
        self.estimated_harvest_days
            .and_then(|d| self.sow_date.checked_add_days(Days::new(u64::from(d))))
    }

    pub fn latest_observation(&self) -> Option<&Observation> {
        self.observations.first()
    }

    /// Most recent recorded height, skipping observations without one.
    pub fn latest_height(&self) -> Option<f64> {
        self.observations.iter().find_map(|o| o.height_cm)
    }
}

/// User input for a new batch.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBatch {
    pub name: String,
    pub sow_date: NaiveDate,
    pub comments: String,
    /// Local file to upload as the cover image.
    pub image_path: Option<PathBuf>,
    pub estimated_harvest_days: Option<u32>,
}

impl NewBatch {
    pub fn new(name: impl Into<String>, sow_date: NaiveDate) -> Self {
        Self {
            name: name.into(),
            sow_date,
            comments: String::new(),
            image_path: None,
            estimated_harvest_days: None,
        }
    }

    pub fn validate(&self, today: NaiveDate) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if self.name.trim().is_empty() {
            errors.push("name", "Please enter a name for your microgreen batch.");
        }
        if self.sow_date > today {
            errors.push("sow_date", "Sowing date cannot be in the future.");
        }
        if self.estimated_harvest_days == Some(0) {
            errors.push(
                "estimated_harvest_days",
                "Estimated harvest days must be a positive whole number.",
            );
        }
        errors.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_validate_accepts_today() {
        let input = NewBatch::new("Radish", day(2026, 4, 2));
        assert!(input.validate(day(2026, 4, 2)).is_ok());
    }

    #[test]
    fn test_validate_reports_each_field() {
        let mut input = NewBatch::new("  ", day(2026, 4, 3));
        input.estimated_harvest_days = Some(0);
        let err = input.validate(day(2026, 4, 2)).unwrap_err();
        assert_eq!(err.len(), 3);
        assert!(err.for_field("name").is_some());
        assert!(err.for_field("sow_date").is_some());
        assert!(err.for_field("estimated_harvest_days").is_some());
    }

    #[test]
    fn test_harvest_date_and_age() {
        let batch = Batch {
            id: "b1".into(),
            user_id: "u1".into(),
            name: "Pea shoots".into(),
            sow_date: day(2026, 4, 1),
            comments: String::new(),
            created_at: Utc::now(),
            image_url: None,
            estimated_harvest_days: Some(10),
            observations: vec![],
        };
        assert_eq!(batch.expected_harvest_date(), Some(day(2026, 4, 11)));
        assert_eq!(batch.days_since_sown(day(2026, 4, 4)), 3);
        assert_eq!(batch.latest_height(), None);
    }
}
