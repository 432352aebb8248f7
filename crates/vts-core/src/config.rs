use std::path::PathBuf;
use std::time::Duration;

use crate::util::{env_bool, env_non_empty};

pub const DEFAULT_URL: &str = "http://localhost/status/format/json";
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Env vars as set by munin-node from the plugin configuration.
pub const ENV_URL: &str = "url";
pub const ENV_TIMEOUT: &str = "timeout";
pub const ENV_STATE_DIR: &str = "MUNIN_PLUGSTATE";
pub const ENV_DIRTY_CONFIG: &str = "MUNIN_CAP_DIRTYCONFIG";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginConfig {
    pub url: String,
    pub timeout: Duration,
    /// Directory holding the snapshot; `None` disables carry-over.
    pub state_dir: Option<PathBuf>,
    /// Print values right after the config output.
    pub dirty_config: bool,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            state_dir: None,
            dirty_config: false,
        }
    }
}

impl PluginConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(url) = env_non_empty(ENV_URL) {
            cfg.url = url;
        }
        if let Some(secs) = env_non_empty(ENV_TIMEOUT).and_then(|v| v.parse::<u64>().ok()) {
            cfg.timeout = Duration::from_secs(secs.max(1));
        }
        cfg.state_dir = env_non_empty(ENV_STATE_DIR).map(PathBuf::from);
        cfg.dirty_config = env_bool(ENV_DIRTY_CONFIG).unwrap_or(false);
        cfg
    }
}
