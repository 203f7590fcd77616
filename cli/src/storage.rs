//! File-backed session storage.
//!
//! A `--session-file` makes one "session" outlive the process, the way a
//! browser tab keeps its session storage across reloads. The file is a flat
//! JSON object of string values.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use presence::identity::{SessionStorage, StorageError};
use serde_json::{Map, Value};

pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<Map<String, Value>, StorageError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(StorageError::Unavailable(e.to_string())),
        };
        if raw.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(StorageError::Unavailable(format!("{} is not a JSON object", self.path.display()))),
            Err(e) => Err(StorageError::Unavailable(e.to_string())),
        }
    }
}

impl SessionStorage for JsonFileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let map = self.load()?;
        Ok(map.get(key).and_then(Value::as_str).map(ToOwned::to_owned))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut map = self.load().map_err(|e| StorageError::Write(e.to_string()))?;
        map.insert(key.to_owned(), Value::String(value.to_owned()));
        let rendered = serde_json::to_string_pretty(&Value::Object(map)).map_err(|e| StorageError::Write(e.to_string()))?;
        fs::write(&self.path, rendered).map_err(|e| StorageError::Write(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use presence::identity::{SESSION_KEY, participant_id};

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("cursorcast-{name}-{}.json", uuid::Uuid::new_v4()))
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let storage = JsonFileStorage::new(temp_path("missing"));
        assert_eq!(storage.get_item(SESSION_KEY).expect("read"), None);
    }

    #[test]
    fn id_survives_a_new_storage_handle() {
        let path = temp_path("persist");
        let first = participant_id(&JsonFileStorage::new(&path));
        let second = participant_id(&JsonFileStorage::new(&path));
        assert_eq!(first, second);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn other_keys_are_preserved() {
        let path = temp_path("keys");
        fs::write(&path, r#"{"theme": "dark"}"#).expect("seed file");
        let storage = JsonFileStorage::new(&path);
        storage.set_item(SESSION_KEY, "abc").expect("write");

        assert_eq!(storage.get_item("theme").expect("read").as_deref(), Some("dark"));
        assert_eq!(storage.get_item(SESSION_KEY).expect("read").as_deref(), Some("abc"));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn corrupt_file_is_unavailable() {
        let path = temp_path("corrupt");
        fs::write(&path, "[1, 2").expect("seed file");
        let storage = JsonFileStorage::new(&path);
        assert!(matches!(storage.get_item(SESSION_KEY), Err(StorageError::Unavailable(_))));
        assert!(matches!(storage.set_item(SESSION_KEY, "x"), Err(StorageError::Write(_))));
        let _ = fs::remove_file(&path);
    }
}
