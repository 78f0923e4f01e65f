//! Interpreter configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via SCXMLRT_CONFIG)
//! 3. Environment variables

use scxmlrt_model::BindingMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Interpreter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Prefix of generated session ids.
    pub session_prefix: String,
    /// Prefix of generated send ids.
    pub send_id_prefix: String,
    /// Maximum microsteps per call into the driver before the machine is
    /// considered livelocked.
    pub max_microsteps: usize,
    /// Overrides the document's binding mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binding: Option<BindingMode>,
    /// Capacity of a session's signal channel.
    pub signal_capacity: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            session_prefix: "session-".to_string(),
            send_id_prefix: "send-".to_string(),
            max_microsteps: 100_000,
            binding: None,
            signal_capacity: 256,
        }
    }
}

impl InterpreterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("SCXMLRT_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: InterpreterConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(prefix) = std::env::var("SCXMLRT_SESSION_PREFIX") {
            self.session_prefix = prefix;
        }

        if let Ok(max) = std::env::var("SCXMLRT_MAX_MICROSTEPS") {
            if let Ok(n) = max.parse() {
                self.max_microsteps = n;
            }
        }

        if let Ok(binding) = std::env::var("SCXMLRT_BINDING") {
            match binding.to_lowercase().as_str() {
                "early" => self.binding = Some(BindingMode::Early),
                "late" => self.binding = Some(BindingMode::Late),
                _ => {}
            }
        }

        if let Ok(capacity) = std::env::var("SCXMLRT_SIGNAL_CAPACITY") {
            if let Ok(n) = capacity.parse() {
                self.signal_capacity = n;
            }
        }
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_microsteps == 0 {
            return Err(ConfigError::ValidationError(
                "max_microsteps must be greater than zero".to_string(),
            ));
        }
        if self.signal_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "signal_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_session_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.session_prefix = prefix.into();
        self
    }

    pub fn with_max_microsteps(mut self, max: usize) -> Self {
        self.max_microsteps = max;
        self
    }

    pub fn with_binding(mut self, binding: BindingMode) -> Self {
        self.binding = Some(binding);
        self
    }

    pub fn with_signal_capacity(mut self, capacity: usize) -> Self {
        self.signal_capacity = capacity;
        self
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
