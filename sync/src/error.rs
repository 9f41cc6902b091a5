//! Error types returned by the sync layer's services.

use greensight_gateway::GatewayError;
use greensight_model::ValidationErrors;
use thiserror::Error;

/// Failure of a [`DataCache`](crate::cache::DataCache) operation.
///
/// By the time a caller sees one of these, the user has already been told.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("{0}")]
    Validation(ValidationErrors),

    #[error("An entry named \"{0}\" already exists.")]
    DuplicateName(String),

    #[error("Permission denied: {0}. Check the access policy for this table.")]
    PermissionDenied(String),

    #[error("Batch {0} is not loaded")]
    BatchNotFound(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("The data cache has been closed")]
    Closed,
}

impl From<ValidationErrors> for CacheError {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors)
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0}")]
    Validation(ValidationErrors),

    #[error("Username already taken. Please choose another.")]
    UsernameTaken,

    #[error("You must be signed in to do this")]
    NotSignedIn,

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl From<ValidationErrors> for SessionError {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors)
    }
}
