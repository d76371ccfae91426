use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::convert::time_to_habits::HabitMapping;
use crate::convert::ConflictPolicy;
use crate::error::Result;
use crate::util::{env_bool, env_i64, env_opt_i32, env_optional, ENV_PREFIX};

pub(crate) const DEFAULT_CONFIG_FILE: &str = "backup-bridge.json";
pub(crate) const DEFAULT_HISTORY_WINDOW_MS: i64 = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct BridgeConfig {
    /// Two watch events of one stream closer than this are the same event.
    pub(crate) history_window_ms: i64,
    /// Day boundary for habit grouping; `None` uses the local time zone.
    pub(crate) utc_offset_minutes: Option<i32>,
    pub(crate) policy: ConflictPolicy,
    pub(crate) include_history: bool,
    pub(crate) mappings: Vec<HabitMapping>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            history_window_ms: DEFAULT_HISTORY_WINDOW_MS,
            utc_offset_minutes: None,
            policy: ConflictPolicy::default(),
            include_history: false,
            mappings: Vec::new(),
        }
    }
}

pub(crate) fn config_file_path(cli: Option<&Path>) -> PathBuf {
    if let Some(path) = cli {
        return path.to_path_buf();
    }
    if let Some(value) = env_optional(&format!("{ENV_PREFIX}CONFIG")) {
        return PathBuf::from(value);
    }
    PathBuf::from(DEFAULT_CONFIG_FILE)
}

/// Missing file -> defaults. An unreadable or malformed file is reported and also falls back.
pub(crate) fn load_file_config(path: &Path) -> BridgeConfig {
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("cannot read config {}: {e}; using defaults", path.display());
            } else {
                debug!("no config at {}; using defaults", path.display());
            }
            return BridgeConfig::default();
        }
    };
    match serde_json::from_str(&data) {
        Ok(config) => config,
        Err(e) => {
            warn!("ignoring malformed config {}: {e}", path.display());
            BridgeConfig::default()
        }
    }
}

impl BridgeConfig {
    /// `BACKUP_BRIDGE_*` variables override file values.
    pub(crate) fn apply_env(&mut self) -> Result<()> {
        self.history_window_ms =
            env_i64(&format!("{ENV_PREFIX}HISTORY_WINDOW_MS"), self.history_window_ms)?;
        if let Some(offset) = env_opt_i32(&format!("{ENV_PREFIX}UTC_OFFSET_MINUTES"))? {
            self.utc_offset_minutes = Some(offset);
        }
        self.include_history =
            env_bool(&format!("{ENV_PREFIX}INCLUDE_HISTORY"), self.include_history);
        if self.history_window_ms < 0 {
            warn!("negative history window {}ms; using 0", self.history_window_ms);
            self.history_window_ms = 0;
        }
        Ok(())
    }

    pub(crate) fn resolve(cli_path: Option<&Path>) -> Result<Self> {
        let path = config_file_path(cli_path);
        let mut config = load_file_config(&path);
        config.apply_env()?;
        Ok(config)
    }
}
