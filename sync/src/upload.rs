//! Image upload helper.
//!
//! Uploads are best-effort: a failed upload is reported to the user as a
//! warning and the caller carries on without an image.

use std::path::Path;

use chrono::Utc;
use greensight_gateway::{GatewayError, Storage};
use thiserror::Error;

use crate::notify::{Notice, Notifier};

/// Storage buckets used by the app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    BatchImages,
    ObservationPhotos,
    Avatars,
    KnowledgeBaseImages,
}

impl Bucket {
    pub fn name(self) -> &'static str {
        match self {
            Self::BatchImages => "batch-images",
            Self::ObservationPhotos => "observation-photos",
            Self::Avatars => "avatars",
            Self::KnowledgeBaseImages => "knowledge-base-images",
        }
    }
}

#[derive(Debug, Error)]
pub enum UploadFailure {
    #[error("Only image files can be uploaded (got {0}).")]
    UnsupportedType(String),

    #[error("The storage bucket \"{0}\" does not exist.")]
    BucketNotFound(&'static str),

    #[error("The image is too large ({size} bytes, limit {limit} bytes).")]
    TooLarge { size: u64, limit: u64 },

    #[error("You do not have permission to upload here: {0}")]
    PermissionDenied(String),

    #[error("Could not read the selected file: {0}")]
    Unreadable(#[from] std::io::Error),

    #[error("Failed to upload: {0}")]
    Other(String),
}

impl UploadFailure {
    /// Sorts a storage error into a category the user can act on.
    pub fn classify(bucket: Bucket, error: GatewayError, size: u64, limit: u64) -> Self {
        match error {
            GatewayError::PermissionDenied(message) => Self::PermissionDenied(message),
            GatewayError::Storage { status, message } => {
                let lower = message.to_lowercase();
                if status == 404 || lower.contains("bucket not found") {
                    Self::BucketNotFound(bucket.name())
                } else if status == 413
                    || lower.contains("maximum allowed size")
                    || lower.contains("too large")
                {
                    Self::TooLarge { size, limit }
                } else if lower.contains("mime type") || lower.contains("invalid_mime_type") {
                    Self::UnsupportedType(message)
                } else if status == 403
                    || lower.contains("row-level security")
                    || lower.contains("unauthorized")
                {
                    Self::PermissionDenied(message)
                } else {
                    Self::Other(message)
                }
            }
            other => Self::Other(other.to_string()),
        }
    }
}

/// Content type for an image file, judged by its extension.
pub fn image_content_type(path: &Path) -> Result<String, UploadFailure> {
    let mime = mime_guess::from_path(path).first();
    match mime {
        Some(m) if m.type_() == mime_guess::mime::IMAGE => Ok(m.essence_str().to_string()),
        Some(m) => Err(UploadFailure::UnsupportedType(m.essence_str().to_string())),
        None => Err(UploadFailure::UnsupportedType(
            path.extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_else(|| "unknown type".to_string()),
        )),
    }
}

/// Object path for a new upload: `{user_id}/{prefix}_{millis}_{uuid}.{ext}`.
pub fn object_path(user_id: &str, prefix: &str, file: &Path) -> String {
    let ext = file
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| "jpg".to_string());
    format!(
        "{}/{}_{}_{}.{}",
        user_id,
        prefix,
        Utc::now().timestamp_millis(),
        uuid::Uuid::new_v4().simple(),
        ext
    )
}

/// Uploads `file` and returns its public URL.
pub async fn try_upload_image<S: Storage + ?Sized>(
    storage: &S,
    bucket: Bucket,
    user_id: &str,
    file: &Path,
    prefix: &str,
    max_bytes: u64,
) -> Result<String, UploadFailure> {
    let content_type = image_content_type(file)?;

    let size = tokio::fs::metadata(file).await?.len();
    if size > max_bytes {
        return Err(UploadFailure::TooLarge {
            size,
            limit: max_bytes,
        });
    }
    let bytes = tokio::fs::read(file).await?;

    let path = object_path(user_id, prefix, file);
    tracing::debug!(bucket = bucket.name(), path = %path, size, "Uploading image");
    let stored = storage
        .upload(bucket.name(), &path, bytes, &content_type)
        .await
        .map_err(|e| UploadFailure::classify(bucket, e, size, max_bytes))?;

    Ok(storage.public_url(bucket.name(), &stored))
}

/// Uploads `file` and returns its public URL, or `None` after warning the user.
pub async fn upload_image<S: Storage + ?Sized>(
    storage: &S,
    notifier: &dyn Notifier,
    bucket: Bucket,
    user_id: &str,
    file: &Path,
    prefix: &str,
    max_bytes: u64,
) -> Option<String> {
    match try_upload_image(storage, bucket, user_id, file, prefix, max_bytes).await {
        Ok(url) => {
            tracing::info!(bucket = bucket.name(), user_id = %user_id, "Image uploaded");
            Some(url)
        }
        Err(failure) => {
            tracing::warn!(
                bucket = bucket.name(),
                user_id = %user_id,
                file = %file.display(),
                error = %failure,
                "Image upload failed"
            );
            notifier.notify(Notice::warning("Upload Error", failure.to_string()));
            None
        }
    }
}
