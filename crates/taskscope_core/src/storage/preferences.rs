use super::write_private;
use crate::error::AppError;
use crate::query::QueryState;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoredPreferences {
    schema_version: u32,
    query: QueryState,
}

/// One preference file per remote location.
pub fn preferences_path(dir: &Path, location_id: &str) -> PathBuf {
    let safe: String = location_id
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '-' || *ch == '_')
        .collect();
    let key = if safe.is_empty() {
        "unknown"
    } else {
        safe.as_str()
    };
    dir.join(format!("preferences-{key}.json"))
}

/// Never fails: anything unreadable yields the defaults.
pub fn load_preferences(path: &Path) -> QueryState {
    let loaded = std::fs::read_to_string(path)
        .ok()
        .and_then(|content| serde_json::from_str::<StoredPreferences>(&content).ok())
        .filter(|stored| stored.schema_version == SCHEMA_VERSION);

    let mut query = match loaded {
        Some(stored) => stored.query,
        None => {
            debug!("no usable preferences at {}", path.display());
            QueryState::default()
        }
    };
    query.sanitize();
    query
}

pub fn save_preferences(path: &Path, query: &QueryState) -> Result<(), AppError> {
    let stored = StoredPreferences {
        schema_version: SCHEMA_VERSION,
        query: query.clone(),
    };
    let content = serde_json::to_string_pretty(&stored)
        .map_err(|err| AppError::invalid_data(err.to_string()))?;
    write_private(path, &content)
}

#[cfg(test)]
mod tests {
    use super::{load_preferences, preferences_path, save_preferences};
    use crate::model::StatusUi;
    use crate::query::{DEFAULT_PAGE_SIZE, QueryState, SortKey};
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("taskscope-{nanos}-{name}"))
    }

    #[test]
    fn path_is_keyed_by_location() {
        let dir = PathBuf::from("/tmp/x");
        assert_eq!(
            preferences_path(&dir, "loc-1"),
            dir.join("preferences-loc-1.json")
        );
        assert_eq!(
            preferences_path(&dir, "../../etc"),
            dir.join("preferences-etc.json")
        );
        assert_eq!(preferences_path(&dir, ""), dir.join("preferences-unknown.json"));
    }

    #[test]
    fn saved_preferences_load_back() {
        let dir = temp_dir("prefs");
        let path = preferences_path(&dir, "loc-1");
        let mut query = QueryState::default();
        query.page_size = 50;
        query.sort.key = SortKey::Type;
        query.filters.statuses = vec![StatusUi::Overdue];

        save_preferences(&path, &query).unwrap();
        let loaded = load_preferences(&path);
        fs::remove_dir_all(&dir).ok();

        assert_eq!(loaded, query);
    }

    #[test]
    fn corrupt_or_missing_preferences_fall_back_to_defaults() {
        let dir = temp_dir("corrupt-prefs");
        let path = preferences_path(&dir, "loc-1");
        assert_eq!(load_preferences(&path), QueryState::default());

        fs::create_dir_all(&dir).unwrap();
        fs::write(&path, "{\"schema_version\": 1, \"query\": {\"page_size\": \"big\"}}").unwrap();
        let loaded = load_preferences(&path);
        fs::remove_dir_all(&dir).ok();

        assert_eq!(loaded, QueryState::default());
    }

    #[test]
    fn out_of_range_page_size_is_repaired() {
        let dir = temp_dir("repair-prefs");
        let path = preferences_path(&dir, "loc-1");
        fs::create_dir_all(&dir).unwrap();
        fs::write(&path, "{\"schema_version\": 1, \"query\": {\"page_size\": 7}}").unwrap();
        let loaded = load_preferences(&path);
        fs::remove_dir_all(&dir).ok();

        assert_eq!(loaded.page_size, DEFAULT_PAGE_SIZE);
    }
}
