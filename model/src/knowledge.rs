//! Knowledge-base entries describing microgreen varieties.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::validation::ValidationErrors;

/// Growing difficulty. Stored case-sensitively as `Easy`, `Medium`, `Hard`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Easy => "Easy",
            Self::Medium => "Medium",
            Self::Hard => "Hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown difficulty: {0:?}")]
pub struct UnknownDifficulty(pub String);

impl FromStr for Difficulty {
    type Err = UnknownDifficulty;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Easy" => Ok(Self::Easy),
            "Medium" => Ok(Self::Medium),
            "Hard" => Ok(Self::Hard),
            other => Err(UnknownDifficulty(other.to_string())),
        }
    }
}

/// A variety described in the shared knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBaseEntry {
    pub id: String,
    pub name: String,
    pub description: String,
    pub difficulty: Difficulty,
    pub min_harvest_days: Option<u32>,
    pub max_harvest_days: Option<u32>,
    pub germination_time: Option<String>,
    pub ideal_temp: Option<String>,
    pub lighting: Option<String>,
    pub watering: Option<String>,
    pub harvest: Option<String>,
    pub tips: Vec<String>,
    pub common_problems: Vec<String>,
    pub nutritional_info: Option<String>,
    pub taste_profile: Option<String>,
    pub category: Option<String>,
    pub icon_name: Option<String>,
    pub image_url: Option<String>,
}

impl KnowledgeBaseEntry {
    /// Harvest window as text, e.g. `"7-10 days"`.
    pub fn harvest_window(&self) -> Option<String> {
        match (self.min_harvest_days, self.max_harvest_days) {
            (Some(min), Some(max)) if min == max => Some(format!("{} days", min)),
            (Some(min), Some(max)) => Some(format!("{}-{} days", min, max)),
            (Some(min), None) => Some(format!("{}+ days", min)),
            (None, Some(max)) => Some(format!("up to {} days", max)),
            (None, None) => None,
        }
    }
}

/// User input for a new knowledge-base entry.
#[derive(Debug, Clone, PartialEq)]
pub struct NewKnowledgeBaseEntry {
    pub name: String,
    pub description: String,
    pub difficulty: Option<Difficulty>,
    pub min_harvest_days: Option<u32>,
    pub max_harvest_days: Option<u32>,
    pub germination_time: Option<String>,
    pub ideal_temp: Option<String>,
    pub lighting: Option<String>,
    pub watering: Option<String>,
    pub harvest: Option<String>,
    pub tips: Vec<String>,
    pub common_problems: Vec<String>,
    pub nutritional_info: Option<String>,
    pub taste_profile: Option<String>,
    pub category: Option<String>,
    pub icon_name: Option<String>,
    pub image_path: Option<PathBuf>,
}

const MIN_NAME_CHARS: usize = 3;
const MIN_DESCRIPTION_CHARS: usize = 10;

impl NewKnowledgeBaseEntry {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        difficulty: Difficulty,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            difficulty: Some(difficulty),
            min_harvest_days: None,
            max_harvest_days: None,
            germination_time: None,
            ideal_temp: None,
            lighting: None,
            watering: None,
            harvest: None,
            tips: Vec::new(),
            common_problems: Vec::new(),
            nutritional_info: None,
            taste_profile: None,
            category: None,
            icon_name: None,
            image_path: None,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if self.name.trim().chars().count() < MIN_NAME_CHARS {
            errors.push("name", "Name must be at least 3 characters");
        }
        if self.description.trim().chars().count() < MIN_DESCRIPTION_CHARS {
            errors.push("description", "Description requires at least 10 characters");
        }
        if self.difficulty.is_none() {
            errors.push("difficulty", "Please select a difficulty");
        }
        if self.min_harvest_days == Some(0) {
            errors.push(
                "min_harvest_days",
                "Min days must be a positive whole number if entered",
            );
        }
        if self.max_harvest_days == Some(0) {
            errors.push(
                "max_harvest_days",
                "Max days must be a positive whole number if entered",
            );
        }
        if let (Some(min), Some(max)) = (self.min_harvest_days, self.max_harvest_days) {
            if max < min {
                errors.push(
                    "max_harvest_days",
                    "Max harvest days must be greater than or equal to min days",
                );
            }
        }
        errors.into_result()
    }
}

/// Splits multi-line form text into trimmed, non-empty lines.
pub fn split_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}
