//! Row schemas as stored by the backend.
//!
//! Column names are the backend's snake_case names. Optional columns default
//! to `None` when absent from a response.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::traits::{Patch, Record, Table};

/// Column names used in filters and ordering.
pub mod columns {
    pub const ID: &str = "id";
    pub const USER_ID: &str = "user_id";
    pub const BATCH_ID: &str = "batch_id";
    pub const NAME: &str = "name";
    pub const CREATED_AT: &str = "created_at";
    pub const OBSERVATION_DATE: &str = "observation_date";
    pub const ACHIEVEMENT_ID: &str = "achievement_id";
    pub const USERNAME: &str = "username";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRow {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub sow_date: NaiveDate,
    #[serde(default)]
    pub comments: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub estimated_harvest_days: Option<i32>,
    /// Embedded observations, present only when the select asked for them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observations: Option<Vec<ObservationRow>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBatchRow {
    pub user_id: String,
    pub name: String,
    pub sow_date: NaiveDate,
    pub comments: Option<String>,
    pub image_url: Option<String>,
    pub estimated_harvest_days: Option<i32>,
}

impl Record for BatchRow {
    const TABLE: Table = Table::Batches;
    type Insert = NewBatchRow;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRow {
    pub id: String,
    pub batch_id: String,
    pub user_id: String,
    pub observation_date: DateTime<Utc>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub height: Option<f64>,
    #[serde(default)]
    pub phenology_stage: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewObservationRow {
    pub batch_id: String,
    pub user_id: String,
    pub observation_date: DateTime<Utc>,
    pub notes: Option<String>,
    pub height: Option<f64>,
    pub phenology_stage: Option<String>,
    pub photo_url: Option<String>,
    pub tags: Vec<String>,
}

impl Record for ObservationRow {
    const TABLE: Table = Table::Observations;
    type Insert = NewObservationRow;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBaseRow {
    pub id: String,
    pub name: String,
    pub description: String,
    pub difficulty: String,
    #[serde(default)]
    pub min_harvest_days: Option<i32>,
    #[serde(default)]
    pub max_harvest_days: Option<i32>,
    #[serde(default)]
    pub germination_time: Option<String>,
    #[serde(default)]
    pub ideal_temp: Option<String>,
    #[serde(default)]
    pub lighting: Option<String>,
    #[serde(default)]
    pub watering: Option<String>,
    #[serde(default)]
    pub harvest: Option<String>,
    #[serde(default)]
    pub tips: Option<Vec<String>>,
    #[serde(default)]
    pub common_problems: Option<Vec<String>>,
    #[serde(default)]
    pub nutritional_info: Option<String>,
    #[serde(default)]
    pub taste_profile: Option<String>,
    #[serde(default, rename = "type")]
    pub category: Option<String>,
    #[serde(default)]
    pub icon_name: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewKnowledgeBaseRow {
    pub name: String,
    pub description: String,
    pub difficulty: String,
    pub min_harvest_days: Option<i32>,
    pub max_harvest_days: Option<i32>,
    pub germination_time: Option<String>,
    pub ideal_temp: Option<String>,
    pub lighting: Option<String>,
    pub watering: Option<String>,
    pub harvest: Option<String>,
    pub tips: Option<Vec<String>>,
    pub common_problems: Option<Vec<String>>,
    pub nutritional_info: Option<String>,
    pub taste_profile: Option<String>,
    #[serde(rename = "type")]
    pub category: Option<String>,
    pub icon_name: Option<String>,
    pub image_url: Option<String>,
}

impl Record for KnowledgeBaseRow {
    const TABLE: Table = Table::KnowledgeBase;
    type Insert = NewKnowledgeBaseRow;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRow {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub current_streak: Option<i32>,
    #[serde(default)]
    pub last_observation_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Profiles are normally created by the backend on sign-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProfileRow {
    pub id: String,
    pub username: Option<String>,
}

impl Record for ProfileRow {
    const TABLE: Table = Table::Profiles;
    type Insert = NewProfileRow;
}

/// Streak fields written back after an observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileStreakPatch {
    pub current_streak: i32,
    pub last_observation_date: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Patch for ProfileStreakPatch {
    const TABLE: Table = Table::Profiles;
}

/// Username and avatar chosen during profile setup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileSetupPatch {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Patch for ProfileSetupPatch {
    const TABLE: Table = Table::Profiles;
}

/// The fact that a user earned an achievement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarnedAchievementRow {
    pub user_id: String,
    pub achievement_id: String,
    #[serde(default)]
    pub earned_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEarnedAchievementRow {
    pub user_id: String,
    pub achievement_id: String,
}

impl Record for EarnedAchievementRow {
    const TABLE: Table = Table::UserAchievements;
    type Insert = NewEarnedAchievementRow;
}
