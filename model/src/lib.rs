//! Domain types and growing policy for Greensight.
//!
//! Everything here is pure: no I/O, no clocks. Callers pass the current time
//! in where a rule depends on it.

pub mod achievement;
pub mod batch;
pub mod knowledge;
pub mod observation;
pub mod profile;
pub mod streak;
pub mod tips;
pub mod validation;

pub use achievement::{Achievement, AchievementKind, Progress, CATALOG};
pub use batch::{Batch, NewBatch};
pub use knowledge::{Difficulty, KnowledgeBaseEntry, NewKnowledgeBaseEntry, UnknownDifficulty};
pub use observation::{parse_height, EventTag, NewObservation, Observation, TagSet};
pub use profile::{validate_username, Profile};
pub use streak::{StreakAdvance, StreakState};
pub use validation::{FieldError, ValidationErrors};
