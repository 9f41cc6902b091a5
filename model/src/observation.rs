//! Observations logged against a batch, and the event tag vocabulary.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::validation::{non_blank, ValidationErrors, FORM_FIELD};

/// Event tag attached to an observation.
///
/// The five named variants form the wire vocabulary of the `tags` column.
/// Anything else read from the backend is kept as [`EventTag::Other`] so it
/// survives a round trip, but is not rendered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventTag {
    Watered,
    Fertilized,
    PestIssue,
    Harvested,
    Relocated,
    Other(String),
}

impl EventTag {
    /// The tags offered to the user, in display order.
    pub const VOCABULARY: [EventTag; 5] = [
        EventTag::Watered,
        EventTag::Fertilized,
        EventTag::PestIssue,
        EventTag::Harvested,
        EventTag::Relocated,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Self::Watered => "watered",
            Self::Fertilized => "fertilized",
            Self::PestIssue => "pest_issue",
            Self::Harvested => "harvested",
            Self::Relocated => "relocated",
            Self::Other(id) => id,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Watered => "Watered",
            Self::Fertilized => "Fertilized",
            Self::PestIssue => "Pest/Issue",
            Self::Harvested => "Harvested",
            Self::Relocated => "Relocated",
            Self::Other(id) => id,
        }
    }

    pub fn is_renderable(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl From<&str> for EventTag {
    fn from(id: &str) -> Self {
        match id {
            "watered" => Self::Watered,
            "fertilized" => Self::Fertilized,
            "pest_issue" => Self::PestIssue,
            "harvested" => Self::Harvested,
            "relocated" => Self::Relocated,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for EventTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let id = String::deserialize(deserializer)?;
        Ok(EventTag::from(id.as_str()))
    }
}

/// Insertion-ordered set of tags without duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<EventTag>", into = "Vec<EventTag>")]
pub struct TagSet(Vec<EventTag>);

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `tag` unless it is already present. Returns whether it was added.
    pub fn insert(&mut self, tag: EventTag) -> bool {
        if self.0.contains(&tag) {
            return false;
        }
        self.0.push(tag);
        true
    }

    /// Removes `tag` if present, otherwise appends it.
    pub fn toggle(&mut self, tag: EventTag) {
        if let Some(pos) = self.0.iter().position(|t| *t == tag) {
            self.0.remove(pos);
        } else {
            self.0.push(tag);
        }
    }

    pub fn contains(&self, tag: &EventTag) -> bool {
        self.0.contains(tag)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventTag> {
        self.0.iter()
    }

    /// Tags that have a display label.
    pub fn renderable(&self) -> impl Iterator<Item = &EventTag> {
        self.0.iter().filter(|t| t.is_renderable())
    }

    pub fn to_ids(&self) -> Vec<String> {
        self.0.iter().map(|t| t.as_str().to_string()).collect()
    }
}

impl From<Vec<EventTag>> for TagSet {
    fn from(tags: Vec<EventTag>) -> Self {
        tags.into_iter().collect()
    }
}

impl From<TagSet> for Vec<EventTag> {
    fn from(set: TagSet) -> Self {
        set.0
    }
}

impl FromIterator<EventTag> for TagSet {
    fn from_iter<I: IntoIterator<Item = EventTag>>(iter: I) -> Self {
        let mut set = TagSet::new();
        for tag in iter {
            set.insert(tag);
        }
        set
    }
}

/// A single logged observation on a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: String,
    pub batch_id: String,
    pub user_id: String,
    /// Set from the write time; never supplied by the user.
    pub observed_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub height_cm: Option<f64>,
    pub phenology_stage: Option<String>,
    pub photo_url: Option<String>,
    pub tags: TagSet,
    pub created_at: DateTime<Utc>,
}

/// Sorts observations newest first. Stable, so equal timestamps keep their order.
pub fn sort_newest_first(observations: &mut [Observation]) {
    observations.sort_by(|a, b| b.observed_at.cmp(&a.observed_at));
}

/// User input for a new observation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewObservation {
    pub notes: Option<String>,
    pub height_cm: Option<f64>,
    pub phenology_stage: Option<String>,
    pub tags: TagSet,
    /// Local file to upload as the observation photo.
    pub photo_path: Option<PathBuf>,
}

impl NewObservation {
    pub fn notes(&self) -> Option<&str> {
        non_blank(self.notes.as_deref())
    }

    pub fn phenology_stage(&self) -> Option<&str> {
        non_blank(self.phenology_stage.as_deref())
    }

    /// True when none of notes, height, stage, tags or photo carries content.
    pub fn is_empty(&self) -> bool {
        self.notes().is_none()
            && self.height_cm.is_none()
            && self.phenology_stage().is_none()
            && self.tags.is_empty()
            && self.photo_path.is_none()
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Some(h) = self.height_cm {
            if !h.is_finite() || h < 0.0 {
                errors.push(
                    "height",
                    "Height must be a non-negative number (e.g., 0, 2.5)",
                );
            }
        }
        if self.is_empty() {
            errors.push(FORM_FIELD, "Please add notes, height, stage, tags, or a photo.");
        }
        errors.into_result()
    }
}

/// Error returned by [`parse_height`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid height: {0:?}")]
pub struct InvalidHeight(pub String);

/// Parses a height typed by the user.
///
/// Blank input means "no height". A comma is accepted as decimal separator.
pub fn parse_height(input: &str) -> Result<Option<f64>, InvalidHeight> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let normalized = trimmed.replacen(',', ".", 1);
    match f64::from_str(&normalized) {
        Ok(h) if h.is_finite() && h >= 0.0 => Ok(Some(h)),
        _ => Err(InvalidHeight(input.to_string())),
    }
}
