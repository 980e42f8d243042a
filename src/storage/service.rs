use super::backend::KeyValueBackend;
use crate::tasks::task::{Task, TaskPriority, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const STORAGE_KEY: &str = "taskManager_data";
const PREFERENCES_KEY: &str = "taskManager_preferences";
const STORAGE_VERSION: &str = "1.0.0";
const PROBE_KEY: &str = "__storage_probe__";

/// Assumed backend capacity for the usage diagnostic; nothing enforces it.
const ASSUMED_CAPACITY: usize = 5 * 1024 * 1024;

pub const DEFAULT_AUTOSAVE_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
    Auto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    pub theme: Theme,
    pub default_priority: TaskPriority,
    pub default_status: TaskStatus,
    pub show_completed_tasks: bool,
    pub enable_notifications: bool,
    pub auto_save: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            theme: Theme::Light,
            default_priority: TaskPriority::Medium,
            default_status: TaskStatus::Pending,
            show_completed_tasks: true,
            enable_notifications: true,
            auto_save: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StorageData {
    tasks: Vec<Task>,
    version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_sync: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportBundle {
    tasks: Vec<Task>,
    preferences: Preferences,
    export_date: DateTime<Utc>,
    version: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportResult {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageInfo {
    pub used: usize,
    pub available: usize,
    pub percentage: f64,
}

/// Translates the task collection and preferences to and from the key-value
/// backend. An explicit instance owns its keys, version string and the
/// autosave timer state; no module-level globals. Storage trouble is never
/// raised to callers, only logged and reported as a bool/default.
#[derive(Clone)]
pub struct StorageService {
    backend: Arc<dyn KeyValueBackend>,
    storage_key: String,
    preferences_key: String,
    version: String,
    autosave_generation: Arc<AtomicU64>,
}

impl StorageService {
    pub fn new(backend: Arc<dyn KeyValueBackend>) -> Self {
        Self::with_config(backend, STORAGE_KEY, PREFERENCES_KEY, STORAGE_VERSION)
    }

    pub fn with_config(
        backend: Arc<dyn KeyValueBackend>,
        storage_key: &str,
        preferences_key: &str,
        version: &str,
    ) -> Self {
        Self {
            backend,
            storage_key: storage_key.to_string(),
            preferences_key: preferences_key.to_string(),
            version: version.to_string(),
            autosave_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn save_tasks(&self, tasks: &[Task]) -> bool {
        let data = StorageData {
            tasks: tasks.to_vec(),
            version: self.version.clone(),
            last_sync: Some(Utc::now()),
        };

        let json = match serde_json::to_string(&data) {
            Ok(json) => json,
            Err(err) => {
                log::warn!("Could not serialize tasks: {}", err);
                return false;
            }
        };

        match self.backend.set(&self.storage_key, &json) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("Could not save tasks: {}", err);
                false
            }
        }
    }

    /// Empty on a missing key or any parse failure; never panics. A stored
    /// version that differs from ours is warned about and loaded anyway.
    pub fn load_tasks(&self) -> Vec<Task> {
        let Some(json) = self.backend.get(&self.storage_key) else {
            return Vec::new();
        };

        match serde_json::from_str::<StorageData>(&json) {
            Ok(data) => {
                if data.version != self.version {
                    log::warn!(
                        "Stored data version {} does not match {}, loading anyway",
                        data.version,
                        self.version
                    );
                }
                data.tasks
            }
            Err(err) => {
                log::warn!("Could not parse stored tasks: {}", err);
                Vec::new()
            }
        }
    }

    pub fn save_preferences(&self, preferences: &Preferences) -> bool {
        let json = match serde_json::to_string(preferences) {
            Ok(json) => json,
            Err(err) => {
                log::warn!("Could not serialize preferences: {}", err);
                return false;
            }
        };

        match self.backend.set(&self.preferences_key, &json) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("Could not save preferences: {}", err);
                false
            }
        }
    }

    pub fn load_preferences(&self) -> Preferences {
        let Some(json) = self.backend.get(&self.preferences_key) else {
            return Preferences::default();
        };

        match serde_json::from_str(&json) {
            Ok(preferences) => preferences,
            Err(err) => {
                log::warn!("Could not parse stored preferences: {}", err);
                Preferences::default()
            }
        }
    }

    pub fn clear_all(&self) {
        if let Err(err) = self.backend.remove(&self.storage_key) {
            log::warn!("Could not remove stored tasks: {}", err);
        }
        if let Err(err) = self.backend.remove(&self.preferences_key) {
            log::warn!("Could not remove stored preferences: {}", err);
        }
    }

    /// Pretty-printed backup bundle of tasks and preferences.
    pub fn export_data(&self) -> String {
        let bundle = ExportBundle {
            tasks: self.load_tasks(),
            preferences: self.load_preferences(),
            export_date: Utc::now(),
            version: self.version.clone(),
        };

        match serde_json::to_string_pretty(&bundle) {
            Ok(json) => json,
            Err(err) => {
                log::warn!("Could not serialize export bundle: {}", err);
                String::new()
            }
        }
    }

    /// Restores a backup produced by `export_data`. `tasks` must be present
    /// and array-shaped, or nothing is touched. Individual unreadable records
    /// are skipped and logged.
    pub fn import_data(&self, json: &str) -> ImportResult {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(json) else {
            return ImportResult {
                success: false,
                message: "Could not parse backup data".to_string(),
            };
        };

        let Some(records) = value.get("tasks").and_then(|tasks| tasks.as_array()) else {
            return ImportResult {
                success: false,
                message: "Invalid backup format".to_string(),
            };
        };

        let mut tasks = Vec::new();
        let mut skipped = 0;
        for record in records {
            match serde_json::from_value::<Task>(record.clone()) {
                Ok(task) => tasks.push(task),
                Err(err) => {
                    skipped += 1;
                    log::warn!("Skipping unreadable task record in backup: {}", err);
                }
            }
        }

        let count = tasks.len();
        let success = self.save_tasks(&tasks);

        if let Some(preferences) = value.get("preferences") {
            match serde_json::from_value::<Preferences>(preferences.clone()) {
                Ok(preferences) => {
                    self.save_preferences(&preferences);
                }
                Err(err) => log::warn!("Ignoring unreadable preferences in backup: {}", err),
            }
        }

        let message = if !success {
            "Import failed".to_string()
        } else if skipped > 0 {
            format!("Imported {} tasks, skipped {} unreadable", count, skipped)
        } else {
            format!("Imported {} tasks", count)
        };
        ImportResult { success, message }
    }

    /// Approximate usage: Σ(key length + value length) over every key,
    /// against a fixed assumed capacity. Diagnostic only.
    pub fn storage_info(&self) -> StorageInfo {
        let used: usize = self
            .backend
            .keys()
            .iter()
            .map(|key| key.len() + self.backend.get(key).map_or(0, |value| value.len()))
            .sum();

        StorageInfo {
            used,
            available: ASSUMED_CAPACITY,
            percentage: used as f64 / ASSUMED_CAPACITY as f64 * 100.0,
        }
    }

    /// Writes and removes a probe key; any failure means unavailable.
    pub fn is_storage_available(&self) -> bool {
        self.backend.set(PROBE_KEY, "probe").is_ok() && self.backend.remove(PROBE_KEY).is_ok()
    }

    /// Debounced save. Every call supersedes the previous pending one; only
    /// the latest call within the window persists. Not awaitable.
    pub fn auto_save(&self, tasks: Vec<Task>, delay: Duration) {
        let generation = self.autosave_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let service = self.clone();
        thread::spawn(move || {
            thread::sleep(delay);
            if service.autosave_generation.load(Ordering::SeqCst) == generation {
                service.save_tasks(&tasks);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::{MemoryBackend, StorageError};
    use crate::tasks::task::NewTask;
    use std::io;

    struct FailingBackend;

    impl KeyValueBackend for FailingBackend {
        fn get(&self, _key: &str) -> Option<String> {
            None
        }
        fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Io(io::Error::new(
                io::ErrorKind::Other,
                "quota exceeded",
            )))
        }
        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Ok(())
        }
        fn keys(&self) -> Vec<String> {
            Vec::new()
        }
    }

    fn service() -> StorageService {
        StorageService::new(Arc::new(MemoryBackend::new()))
    }

    fn task(title: &str) -> Task {
        Task::new(NewTask {
            title: title.to_string(),
            ..NewTask::default()
        })
    }

    #[test]
    fn tasks_round_trip_with_timestamps_intact() {
        let service = service();
        let tasks = vec![task("one"), task("two")];

        assert!(service.save_tasks(&tasks));
        let loaded = service.load_tasks();
        assert_eq!(loaded, tasks);
    }

    #[test]
    fn load_tasks_is_empty_when_nothing_is_stored() {
        assert!(service().load_tasks().is_empty());
    }

    #[test]
    fn load_tasks_swallows_malformed_json() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set(STORAGE_KEY, "{not json").unwrap();
        let service = StorageService::new(backend);
        assert!(service.load_tasks().is_empty());
    }

    #[test]
    fn version_mismatch_warns_but_loads() {
        let backend = Arc::new(MemoryBackend::new());
        let service = StorageService::new(Arc::clone(&backend) as Arc<dyn KeyValueBackend>);

        let old = StorageService::with_config(
            Arc::clone(&backend) as Arc<dyn KeyValueBackend>,
            STORAGE_KEY,
            PREFERENCES_KEY,
            "0.9.0",
        );
        old.save_tasks(&[task("from an older build")]);

        let loaded = service.load_tasks();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].title, "from an older build");
    }

    #[test]
    fn save_tasks_reports_backend_failure() {
        let service = StorageService::new(Arc::new(FailingBackend));
        assert!(!service.save_tasks(&[task("doomed")]));
    }

    #[test]
    fn preferences_fall_back_to_defaults() {
        let service = service();
        assert_eq!(service.load_preferences(), Preferences::default());

        let backend = Arc::new(MemoryBackend::new());
        backend.set(PREFERENCES_KEY, "][").unwrap();
        let service = StorageService::new(backend);
        assert_eq!(service.load_preferences(), Preferences::default());
    }

    #[test]
    fn preferences_round_trip() {
        let service = service();
        let preferences = Preferences {
            theme: Theme::Dark,
            default_priority: TaskPriority::High,
            show_completed_tasks: false,
            ..Preferences::default()
        };
        assert!(service.save_preferences(&preferences));
        assert_eq!(service.load_preferences(), preferences);
    }

    #[test]
    fn clear_all_removes_both_keys() {
        let backend = Arc::new(MemoryBackend::new());
        let service = StorageService::new(Arc::clone(&backend) as Arc<dyn KeyValueBackend>);
        service.save_tasks(&[task("stored")]);
        service.save_preferences(&Preferences::default());

        service.clear_all();
        assert!(backend.get(STORAGE_KEY).is_none());
        assert!(backend.get(PREFERENCES_KEY).is_none());
    }

    #[test]
    fn export_produces_a_parseable_pretty_bundle() {
        let service = service();
        service.save_tasks(&[task("exported")]);

        let json = service.export_data();
        assert!(json.contains('\n'));

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["tasks"].as_array().unwrap().len(), 1);
        assert_eq!(value["version"], STORAGE_VERSION);
        assert!(value["preferences"].is_object());
        assert!(value["exportDate"].is_string());
    }

    #[test]
    fn import_rejects_non_array_tasks_without_touching_storage() {
        let service = service();
        service.save_tasks(&[task("precious")]);
        service.save_preferences(&Preferences {
            theme: Theme::Dark,
            ..Preferences::default()
        });

        let result = service.import_data(r#"{"tasks": "not-an-array"}"#);
        assert!(!result.success);
        assert_eq!(service.load_tasks()[0].title, "precious");
        assert_eq!(service.load_preferences().theme, Theme::Dark);

        let result = service.import_data("not json at all");
        assert!(!result.success);
        assert_eq!(service.load_tasks().len(), 1);
    }

    #[test]
    fn import_restores_tasks_and_preferences() {
        let source = service();
        source.save_tasks(&[task("carried over")]);
        source.save_preferences(&Preferences {
            theme: Theme::Auto,
            ..Preferences::default()
        });
        let backup = source.export_data();

        let target = service();
        let result = target.import_data(&backup);
        assert!(result.success);
        assert!(result.message.contains("1 tasks"));
        assert_eq!(target.load_tasks()[0].title, "carried over");
        assert_eq!(target.load_preferences().theme, Theme::Auto);
    }

    #[test]
    fn import_skips_unreadable_records() {
        let service = service();
        let good = serde_json::to_value(task("good")).unwrap();
        let bundle = serde_json::json!({ "tasks": [good, {"junk": 1}] });

        let result = service.import_data(&bundle.to_string());
        assert!(result.success);
        assert!(result.message.contains("skipped 1"));
        assert_eq!(service.load_tasks().len(), 1);
    }

    #[test]
    fn storage_info_sums_key_and_value_lengths() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set("ab", "cdef").unwrap();
        let service = StorageService::new(backend);

        let info = service.storage_info();
        assert_eq!(info.used, 6);
        assert_eq!(info.available, ASSUMED_CAPACITY);
        assert!(info.percentage > 0.0 && info.percentage < 1.0);
    }

    #[test]
    fn availability_probe_reflects_the_backend() {
        assert!(service().is_storage_available());
        assert!(!StorageService::new(Arc::new(FailingBackend)).is_storage_available());
    }

    #[test]
    fn auto_save_persists_only_the_latest_burst() {
        let service = service();
        service.auto_save(vec![task("superseded")], Duration::from_millis(50));
        service.auto_save(vec![task("kept")], Duration::from_millis(50));

        thread::sleep(Duration::from_millis(250));
        let loaded = service.load_tasks();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].title, "kept");
    }

    #[test]
    fn auto_save_does_nothing_before_the_delay_elapses() {
        let service = service();
        service.auto_save(vec![task("pending write")], Duration::from_millis(200));
        assert!(service.load_tasks().is_empty());

        thread::sleep(Duration::from_millis(400));
        assert_eq!(service.load_tasks().len(), 1);
    }
}
