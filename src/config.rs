// src/config.rs

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::alerts::{default_rules, AlertRule};
use crate::error::ConfigError;

pub const CONFIG_PATH_ENV: &str = "VIGIL_CONFIG";

/// Base update intervals offered to the user, in seconds.
pub const ACCEPTED_INTERVALS: [f64; 5] = [0.5, 1.0, 2.0, 5.0, 10.0];
pub const FALLBACK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    pub api_key: Option<String>, // Default: none (weather disabled)
    pub latitude: f64,           // Default: San Francisco
    pub longitude: f64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        WeatherConfig {
            api_key: None,
            latitude: 37.7749,
            longitude: -122.4194,
        }
    }
}

impl WeatherConfig {
    /// Key usable against the weather API, ignoring blanks and the "demo" placeholder.
    pub fn usable_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty() && *k != "demo")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    // Scheduling
    pub update_interval_secs: f64, // Default: 1.0, one of ACCEPTED_INTERVALS
    pub dispatch_budget_ms: u64,   // Default: 250

    // Alerting
    pub notifications_enabled: bool, // Default: true
    pub notification_sound: bool,    // Default: true
    pub alert_rules: Vec<AlertRule>,

    // Collectors
    pub top_process_count: usize, // Default: 5
    pub weather: WeatherConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            update_interval_secs: 1.0,
            dispatch_budget_ms: 250,
            notifications_enabled: true,
            notification_sound: true,
            alert_rules: default_rules(),
            top_process_count: 5,
            weather: WeatherConfig::default(),
        }
    }
}

impl MonitorConfig {
    pub fn base_interval(&self) -> Duration {
        sanitize_update_interval(self.update_interval_secs)
    }

    /// How long a tick waits for dispatched collectors before publishing.
    pub fn dispatch_budget(&self) -> Duration {
        Duration::from_millis(self.dispatch_budget_ms.max(1))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: MonitorConfig = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Load from `$VIGIL_CONFIG` or the per-user config dir. A missing file
    /// means defaults.
    pub fn load_default() -> Result<Self, ConfigError> {
        let Some(path) = default_path() else {
            return Ok(MonitorConfig::default());
        };
        match Self::load(&path) {
            Ok(config) => Ok(config),
            Err(ConfigError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                debug!("no config at {}, using defaults", path.display());
                Ok(MonitorConfig::default())
            }
            Err(err) => Err(err),
        }
    }
}

pub fn default_path() -> Option<PathBuf> {
    if let Ok(p) = std::env::var(CONFIG_PATH_ENV) {
        if !p.trim().is_empty() {
            return Some(PathBuf::from(p));
        }
    }
    dirs::config_dir().map(|mut path| {
        path.push("vigil");
        path.push("config.json");
        path
    })
}

/// Map a user-supplied interval onto the accepted set; anything unlisted
/// falls back to one second.
pub fn sanitize_update_interval(secs: f64) -> Duration {
    if secs.is_finite() {
        if let Some(accepted) = ACCEPTED_INTERVALS
            .iter()
            .find(|candidate| (**candidate - secs).abs() < 1e-9)
        {
            return Duration::from_secs_f64(*accepted);
        }
    }
    warn!(
        "update interval {} is not one of {:?}; using {:?}",
        secs, ACCEPTED_INTERVALS, FALLBACK_INTERVAL
    );
    FALLBACK_INTERVAL
}
