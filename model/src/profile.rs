//! User profile.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::streak::StreakState;
use crate::validation::ValidationErrors;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
    pub streak: StreakState,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Profile {
    /// A profile is set up once it has a username.
    pub fn is_setup_complete(&self) -> bool {
        self.username
            .as_deref()
            .is_some_and(|u| !u.trim().is_empty())
    }
}

const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 30;

/// Checks a username and returns it trimmed.
pub fn validate_username(input: &str) -> Result<String, ValidationErrors> {
    let username = input.trim();
    let mut errors = ValidationErrors::new();
    let len = username.chars().count();
    if len < USERNAME_MIN {
        errors.push("username", "Username must be at least 3 characters");
    } else if len > USERNAME_MAX {
        errors.push("username", "Username cannot exceed 30 characters");
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        errors.push(
            "username",
            "Username can only contain letters, numbers, and underscores (_)",
        );
    }
    errors.into_result().map(|()| username.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_complete_requires_username() {
        let mut profile = Profile {
            id: "u1".into(),
            username: None,
            avatar_url: None,
            streak: StreakState::default(),
            updated_at: None,
        };
        assert!(!profile.is_setup_complete());
        profile.username = Some("  ".into());
        assert!(!profile.is_setup_complete());
        profile.username = Some("sprouty".into());
        assert!(profile.is_setup_complete());
    }

    #[test]
    fn test_validate_username() {
        assert_eq!(validate_username("  pea_shoot_7 "), Ok("pea_shoot_7".to_string()));
        assert!(validate_username("ab").is_err());
        assert!(validate_username("has space").is_err());
        assert!(validate_username(&"x".repeat(31)).is_err());
    }
}
