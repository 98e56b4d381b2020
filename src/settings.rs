// THEORY:
// The `settings` module holds everything the caller configures: regions,
// detection criteria and alert actions, persisted as JSON.
//
// Key architectural principles:
// 1.  **Caller-owned**: The scheduler never owns configuration. It holds a
//     `SettingsHandle` shared with the caller.
// 2.  **Snapshot per tick**: Each cycle clones a fresh snapshot, so edits made
//     while a session runs take effect on the next cycle.
// 3.  **Forgiving load**: A missing file yields the defaults and missing fields
//     fall back to theirs. A corrupt file is an error.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::actions::ActionConfig;
use crate::core_modules::policy::DetectionSettings;
use crate::core_modules::region::RegionSet;
use crate::error::{Result, SentinelError};

/// Everything the caller configures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub regions: RegionSet,
    pub detection: DetectionSettings,
    pub actions: ActionConfig,
}

/// Settings shared between the caller and a running scheduler.
pub type SettingsHandle = Arc<RwLock<MonitorSettings>>;

impl MonitorSettings {
    pub fn into_handle(self) -> SettingsHandle {
        Arc::new(RwLock::new(self))
    }
}

/// Loads settings from disk. A missing file yields the defaults.
pub fn load_settings(path: &Path) -> Result<MonitorSettings> {
    let json = match std::fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(MonitorSettings::default()),
        Err(e) => {
            return Err(SentinelError::Settings(format!(
                "failed to read {}: {}",
                path.display(),
                e
            )));
        }
    };
    serde_json::from_str(&json)
        .map_err(|e| SentinelError::Settings(format!("failed to parse {}: {}", path.display(), e)))
}

/// Saves settings to disk as pretty-printed JSON.
pub fn save_settings(path: &Path, settings: &MonitorSettings) -> Result<()> {
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| SentinelError::Settings(format!("failed to serialize settings: {}", e)))?;
    std::fs::write(path, json)
        .map_err(|e| SentinelError::Settings(format!("failed to write {}: {}", path.display(), e)))
}
