use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::handle::TrackedTypes;

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "VKCAP_CONFIG";

/// Top-level vkcap configuration, loaded from vkcap.toml.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VkcapConfig {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
}

/// Settings for the capture-side transform chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Handle type names the tracker is responsible for ("all", "none" or
    /// individual names such as "buffer").
    #[serde(default = "default_tracked")]
    pub tracked: Vec<String>,
    /// What to do with an unrecognized `p_next` link while cloning
    #[serde(default)]
    pub unknown_extensions: UnknownExtensionPolicy,
    /// What to do when the handle table disagrees with the call stream
    #[serde(default)]
    pub on_desync: DesyncPolicy,
    /// Log every intercepted call at trace level
    #[serde(default)]
    pub trace_calls: bool,
}

/// Settings for the replay-side transform chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Handle types whose trace-time values are remapped
    #[serde(default = "default_tracked")]
    pub tracked: Vec<String>,
    #[serde(default)]
    pub on_desync: DesyncPolicy,
}

/// Policy for extension-chain links the cloner does not recognize.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownExtensionPolicy {
    /// Leave the link out of the clone and record its structure type
    #[default]
    Skip,
    /// Fail the clone
    Reject,
}

/// Policy for tracking-desync faults (double create, erase of a missing handle).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesyncPolicy {
    /// Panic with the offending handle and operation
    #[default]
    Abort,
    /// Log at error level and keep going with the table as it is
    Log,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            tracked: default_tracked(),
            unknown_extensions: UnknownExtensionPolicy::default(),
            on_desync: DesyncPolicy::default(),
            trace_calls: false,
        }
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            tracked: default_tracked(),
            on_desync: DesyncPolicy::default(),
        }
    }
}

impl CaptureConfig {
    pub fn tracked_types(&self) -> Result<TrackedTypes, CoreError> {
        TrackedTypes::from_names(&self.tracked)
    }
}

impl ReplayConfig {
    pub fn tracked_types(&self) -> Result<TrackedTypes, CoreError> {
        TrackedTypes::from_names(&self.tracked)
    }
}

impl VkcapConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text, validating handle type names.
    pub fn parse(content: &str) -> Result<Self, CoreError> {
        let config: VkcapConfig =
            toml::from_str(content).map_err(|e| CoreError::ConfigError(e.to_string()))?;
        config.capture.tracked_types()?;
        config.replay.tracked_types()?;
        Ok(config)
    }

    /// Load configuration from file if it exists, otherwise return defaults.
    pub fn load_or_default(path: &str) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(CoreError::Io(_)) => Self::default(),
            Err(e) => {
                tracing::warn!("ignoring invalid config {}: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn to_toml(&self) -> Result<String, CoreError> {
        toml::to_string_pretty(self).map_err(|e| CoreError::ConfigError(e.to_string()))
    }
}

/// Returns the config file path: `$VKCAP_CONFIG` if set, otherwise `./vkcap.toml`.
pub fn default_config_path() -> String {
    std::env::var(CONFIG_ENV).unwrap_or_else(|_| "vkcap.toml".to_string())
}

fn default_tracked() -> Vec<String> {
    vec!["all".to_string()]
}
