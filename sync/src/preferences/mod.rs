//! Device-local preferences.
//!
//! Small JSON values (theme choice, reminder settings) stored under string
//! keys. Two interchangeable backends implement [`PreferenceStore`]:
//! - [`JsonFilePreferenceStore`]: one JSON file per key in a directory
//! - [`SqlitePreferenceStore`]: a single SQLite table, WAL mode, embedded migration
//!
//! [`Preferences`] is the typed facade used by hosts. Reads never fail: a
//! missing or unreadable value yields the default and the error is logged.

mod json_store;
mod sqlite;

pub use json_store::JsonFilePreferenceStore;
pub use sqlite::SqlitePreferenceStore;

use std::future::Future;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Errors from the preference backends.
#[derive(Debug, thiserror::Error)]
pub enum PreferenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Invalid preference value: {0}")]
    Invalid(String),
}

/// Key-value storage for JSON-serializable preferences.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str)
        -> impl Future<Output = Result<Option<Value>, PreferenceError>> + Send;

    fn set(
        &self,
        key: &str,
        value: &Value,
    ) -> impl Future<Output = Result<(), PreferenceError>> + Send;

    fn remove(&self, key: &str) -> impl Future<Output = Result<(), PreferenceError>> + Send;
}

pub const COLOR_SCHEME_KEY: &str = "colorSchemePreference";
pub const REMINDER_SETTINGS_KEY: &str = "reminderSettings";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorScheme {
    Light,
    Dark,
    /// Follow the operating system.
    #[default]
    System,
}

/// Daily check-in reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderSettings {
    pub enabled: bool,
    pub hour: u8,
    pub minute: u8,
}

impl Default for ReminderSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            hour: 10,
            minute: 0,
        }
    }
}

impl ReminderSettings {
    pub fn validate(&self) -> Result<(), PreferenceError> {
        if self.hour >= 24 {
            return Err(PreferenceError::Invalid(format!(
                "reminder hour {} is out of range",
                self.hour
            )));
        }
        if self.minute >= 60 {
            return Err(PreferenceError::Invalid(format!(
                "reminder minute {} is out of range",
                self.minute
            )));
        }
        Ok(())
    }

    /// Time of day as `HH:MM`.
    pub fn time_label(&self) -> String {
        format!("{:02}:{:02}", self.hour, self.minute)
    }
}

/// Typed access to the app's preferences.
pub struct Preferences<S> {
    store: S,
}

impl<S: PreferenceStore> Preferences<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    async fn read_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        match self.store.get(key).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(v) => v,
                Err(e) => {
                    tracing::error!(key, error = %e, "Stored preference is malformed, using default");
                    T::default()
                }
            },
            Ok(None) => T::default(),
            Err(e) => {
                tracing::error!(key, error = %e, "Failed to read preference, using default");
                T::default()
            }
        }
    }

    async fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<(), PreferenceError> {
        let value = serde_json::to_value(value)?;
        self.store.set(key, &value).await.inspect_err(|e| {
            tracing::error!(key, error = %e, "Failed to save preference");
        })
    }

    pub async fn color_scheme(&self) -> ColorScheme {
        self.read_or_default(COLOR_SCHEME_KEY).await
    }

    pub async fn set_color_scheme(&self, scheme: ColorScheme) -> Result<(), PreferenceError> {
        self.write(COLOR_SCHEME_KEY, &scheme).await
    }

    pub async fn reminder_settings(&self) -> ReminderSettings {
        let settings: ReminderSettings = self.read_or_default(REMINDER_SETTINGS_KEY).await;
        match settings.validate() {
            Ok(()) => settings,
            Err(e) => {
                tracing::error!(error = %e, "Stored reminder settings are invalid, using default");
                ReminderSettings::default()
            }
        }
    }

    pub async fn set_reminder_settings(
        &self,
        settings: ReminderSettings,
    ) -> Result<(), PreferenceError> {
        settings.validate()?;
        self.write(REMINDER_SETTINGS_KEY, &settings).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_defaults_when_nothing_stored() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = Preferences::new(JsonFilePreferenceStore::new(dir.path().to_path_buf()));
        assert_eq!(prefs.color_scheme().await, ColorScheme::System);
        assert_eq!(prefs.reminder_settings().await, ReminderSettings::default());
    }

    #[tokio::test]
    async fn test_color_scheme_is_stored_as_plain_string() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = Preferences::new(JsonFilePreferenceStore::new(dir.path().to_path_buf()));
        prefs.set_color_scheme(ColorScheme::Dark).await.unwrap();
        assert_eq!(prefs.color_scheme().await, ColorScheme::Dark);
        assert_eq!(
            prefs.store().get(COLOR_SCHEME_KEY).await.unwrap(),
            Some(Value::String("dark".into()))
        );
    }

    #[tokio::test]
    async fn test_reminder_settings_validated() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = Preferences::new(JsonFilePreferenceStore::new(dir.path().to_path_buf()));
        let bad = ReminderSettings {
            enabled: true,
            hour: 24,
            minute: 0,
        };
        assert!(matches!(
            prefs.set_reminder_settings(bad).await,
            Err(PreferenceError::Invalid(_))
        ));

        let good = ReminderSettings {
            enabled: true,
            hour: 7,
            minute: 30,
        };
        prefs.set_reminder_settings(good).await.unwrap();
        assert_eq!(prefs.reminder_settings().await, good);
        assert_eq!(good.time_label(), "07:30");
    }

    #[tokio::test]
    async fn test_malformed_value_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFilePreferenceStore::new(dir.path().to_path_buf());
        store
            .set(COLOR_SCHEME_KEY, &Value::String("sepia".into()))
            .await
            .unwrap();
        store
            .set(
                REMINDER_SETTINGS_KEY,
                &serde_json::json!({ "enabled": true, "hour": 30, "minute": 0 }),
            )
            .await
            .unwrap();
        let prefs = Preferences::new(store);
        assert_eq!(prefs.color_scheme().await, ColorScheme::System);
        assert_eq!(prefs.reminder_settings().await, ReminderSettings::default());
    }
}
