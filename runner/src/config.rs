//! Engine configuration
//!
//! Read once at startup from `ACE_*` environment variables and shared by
//! `Arc` afterwards.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::context::DEFAULT_LOOKBACK_HOURS;
use crate::stream::DEFAULT_COMPLETION_TIMEOUT;

pub const DEFAULT_ENDPOINT_ID: &str = "local";
pub const DEFAULT_DATA_DIR: &str = ".ace-data";
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {name}")]
    InvalidValue { name: &'static str, value: String },

    #[error("ACE_SETTINGS must be a JSON object: {0}")]
    InvalidSettings(String),
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub endpoint_id: String,
    pub data_dir: PathBuf,
    /// Recency bound for history sent to the model
    pub lookback: chrono::Duration,
    /// Bound on the wait for a streaming worker to complete
    pub stream_completion_timeout: Duration,
    pub queue_capacity: usize,
    /// Deployment settings handed to every adapter
    pub settings: serde_json::Map<String, serde_json::Value>,
    pub test_mode: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint_id: DEFAULT_ENDPOINT_ID.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            lookback: chrono::Duration::hours(DEFAULT_LOOKBACK_HOURS),
            stream_completion_timeout: DEFAULT_COMPLETION_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            settings: serde_json::Map::new(),
            test_mode: false,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; unset variables keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(endpoint_id) = non_blank(lookup("ACE_ENDPOINT_ID")) {
            config.endpoint_id = endpoint_id;
        }
        if let Some(data_dir) = non_blank(lookup("ACE_DATA_DIR")) {
            config.data_dir = PathBuf::from(data_dir);
        }
        if let Some(hours) = parse_var::<i64>("ACE_LOOKBACK_HOURS", lookup("ACE_LOOKBACK_HOURS"))? {
            config.lookback = Some(hours)
                .filter(|hours| *hours > 0)
                .and_then(chrono::Duration::try_hours)
                .ok_or_else(|| ConfigError::InvalidValue {
                    name: "ACE_LOOKBACK_HOURS",
                    value: hours.to_string(),
                })?;
        }
        if let Some(secs) =
            parse_var::<u64>("ACE_STREAM_TIMEOUT_SECS", lookup("ACE_STREAM_TIMEOUT_SECS"))?
        {
            config.stream_completion_timeout = Duration::from_secs(secs);
        }
        if let Some(capacity) =
            parse_var::<usize>("ACE_QUEUE_CAPACITY", lookup("ACE_QUEUE_CAPACITY"))?
        {
            config.queue_capacity = capacity.max(1);
        }
        if let Some(raw) = non_blank(lookup("ACE_SETTINGS")) {
            config.settings = match serde_json::from_str(&raw) {
                Ok(serde_json::Value::Object(map)) => map,
                Ok(other) => {
                    return Err(ConfigError::InvalidSettings(format!(
                        "got {}",
                        json_kind(&other)
                    )))
                }
                Err(e) => return Err(ConfigError::InvalidSettings(e.to_string())),
            };
        }
        config.test_mode = flag(lookup("ACE_TEST_MODE"), false);

        Ok(config)
    }
}

fn non_blank(raw: Option<String>) -> Option<String> {
    raw.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_var<T: FromStr>(name: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError> {
    match non_blank(raw) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        None => Ok(None),
    }
}

fn flag(raw: Option<String>, default: bool) -> bool {
    match raw {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        None => default,
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
