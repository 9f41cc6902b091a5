use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{PreferenceError, PreferenceStore};

/// On-disk shape of one preference file.
#[derive(Debug, Serialize, Deserialize)]
struct StoredPreference {
    key: String,
    value: Value,
    updated_at: i64,
}

/// JSON-file-per-key preference store.
pub struct JsonFilePreferenceStore {
    dir: PathBuf,
}

impl JsonFilePreferenceStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn ensure_dir(&self) -> Result<(), PreferenceError> {
        std::fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// Keys may contain characters that are not valid in file names.
    pub fn file_path(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", name))
    }
}

impl PreferenceStore for JsonFilePreferenceStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, PreferenceError> {
        let path = self.file_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)?;
        let stored: StoredPreference = serde_json::from_str(&contents)?;
        if stored.key != key {
            // Two keys sanitized to the same file name.
            tracing::warn!(key, stored_key = %stored.key, "Preference file belongs to another key");
            return Ok(None);
        }
        Ok(Some(stored.value))
    }

    async fn set(&self, key: &str, value: &Value) -> Result<(), PreferenceError> {
        self.ensure_dir()?;
        let stored = StoredPreference {
            key: key.to_string(),
            value: value.clone(),
            updated_at: chrono::Utc::now().timestamp(),
        };
        let json = serde_json::to_string_pretty(&stored)?;
        std::fs::write(self.file_path(key), json)?;
        tracing::debug!(key, "Preference saved");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), PreferenceError> {
        let path = self.file_path(key);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFilePreferenceStore::new(dir.path().join("prefs"));

        assert_eq!(store.get("theme").await.unwrap(), None);
        store.set("theme", &Value::from("dark")).await.unwrap();
        assert_eq!(store.get("theme").await.unwrap(), Some(Value::from("dark")));

        store.set("theme", &Value::from("light")).await.unwrap();
        assert_eq!(store.get("theme").await.unwrap(), Some(Value::from("light")));

        store.remove("theme").await.unwrap();
        assert_eq!(store.get("theme").await.unwrap(), None);
        store.remove("theme").await.unwrap();
    }

    #[test]
    fn test_file_name_is_sanitized() {
        let store = JsonFilePreferenceStore::new(PathBuf::from("/tmp/p"));
        assert_eq!(
            store.file_path("@Greensight:theme"),
            PathBuf::from("/tmp/p/_Greensight_theme.json")
        );
    }

    #[tokio::test]
    async fn test_colliding_keys_do_not_leak() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFilePreferenceStore::new(dir.path().to_path_buf());
        store.set("a:b", &Value::from(1)).await.unwrap();
        assert_eq!(store.get("a_b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFilePreferenceStore::new(dir.path().to_path_buf());
        std::fs::write(store.file_path("theme"), "not json").unwrap();
        assert!(matches!(
            store.get("theme").await,
            Err(PreferenceError::Json(_))
        ));
    }
}
