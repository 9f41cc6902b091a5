//! Error types for the remote gateway

use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Postgres error codes the backend surfaces verbatim.
pub mod codes {
    pub const UNIQUE_VIOLATION: &str = "23505";
    pub const FOREIGN_KEY_VIOLATION: &str = "23503";
    pub const INSUFFICIENT_PRIVILEGE: &str = "42501";
    /// PostgREST: a single row was requested but none matched.
    pub const NO_ROWS: &str = "PGRST116";
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Invalid gateway configuration: {0}")]
    InvalidConfig(String),

    #[error("Duplicate value: {message}")]
    UniqueViolation {
        constraint: Option<String>,
        message: String,
    },

    #[error("Referenced row does not exist: {0}")]
    ForeignKeyViolation(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No active session")]
    Unauthenticated,

    #[error("Storage request failed ({status}): {message}")]
    Storage { status: u16, message: String },

    #[error("Request failed ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl GatewayError {
    /// Classifies a database error reported by the table API.
    pub fn from_database(status: u16, code: Option<&str>, message: &str) -> Self {
        match code {
            Some(codes::UNIQUE_VIOLATION) => Self::UniqueViolation {
                constraint: quoted_name(message),
                message: message.to_string(),
            },
            Some(codes::FOREIGN_KEY_VIOLATION) => Self::ForeignKeyViolation(message.to_string()),
            Some(codes::INSUFFICIENT_PRIVILEGE) => Self::PermissionDenied(message.to_string()),
            Some(codes::NO_ROWS) => Self::NotFound(message.to_string()),
            _ if message.contains("row-level security") || message.contains("security policy") => {
                Self::PermissionDenied(message.to_string())
            }
            _ if status == 401 => Self::Unauthenticated,
            _ if status == 403 => Self::PermissionDenied(message.to_string()),
            _ if status == 404 => Self::NotFound(message.to_string()),
            _ => Self::Api {
                status,
                code: code.map(str::to_string),
                message: message.to_string(),
            },
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation { .. })
    }

    /// Constraint name of a unique violation, when the backend reported one.
    pub fn constraint(&self) -> Option<&str> {
        match self {
            Self::UniqueViolation { constraint, .. } => constraint.as_deref(),
            _ => None,
        }
    }

    /// Whether repeating the same idempotent request could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Api { status, .. } | Self::Storage { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Extracts the first double-quoted name from a Postgres message, e.g. the
/// constraint in `duplicate key value violates unique constraint "x_key"`.
fn quoted_name(message: &str) -> Option<String> {
    let start = message.find('"')? + 1;
    let len = message[start..].find('"')?;
    Some(message[start..start + len].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_violation_keeps_constraint() {
        let err = GatewayError::from_database(
            409,
            Some("23505"),
            r#"duplicate key value violates unique constraint "knowledge_base_name_key""#,
        );
        assert!(err.is_unique_violation());
        assert_eq!(err.constraint(), Some("knowledge_base_name_key"));
    }

    #[test]
    fn test_foreign_key_and_permission() {
        assert!(matches!(
            GatewayError::from_database(409, Some("23503"), "fk"),
            GatewayError::ForeignKeyViolation(_)
        ));
        assert!(matches!(
            GatewayError::from_database(
                403,
                None,
                "new row violates row-level security policy for table \"batches\""
            ),
            GatewayError::PermissionDenied(_)
        ));
        assert!(matches!(
            GatewayError::from_database(401, None, "JWT expired"),
            GatewayError::Unauthenticated
        ));
    }

    #[test]
    fn test_transient_classification() {
        let server = GatewayError::Api {
            status: 503,
            code: None,
            message: "unavailable".into(),
        };
        assert!(server.is_transient());
        assert!(!GatewayError::NotFound("x".into()).is_transient());
    }
}
