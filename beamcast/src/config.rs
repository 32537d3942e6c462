use std::path::Path;
use std::sync::Arc;

use beamcast_signaling::{
    AllowAllValidator, PatternValidator, SignalingConfig, StaticKeyValidator, StreamKeyValidator,
};
use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub signaling: SignalingConfig,
    pub validator: ValidatorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
    /// Largest accepted WebSocket frame in bytes
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
            max_message_size: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level for beamcast's own crates; other crates log at `warn`
    pub level: String,
    pub format: LogFormat,
    /// Append to this file instead of stdout
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorMode {
    #[default]
    AllowAll,
    Static,
    Pattern,
}

/// Stream key validation for broadcaster joins
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub mode: ValidatorMode,
    /// Accepted keys for `static` mode
    pub keys: Vec<String>,
    /// Regular expression for `pattern` mode
    pub pattern: Option<String>,
}

impl ValidatorConfig {
    pub fn build(&self) -> anyhow::Result<Arc<dyn StreamKeyValidator>> {
        let validator: Arc<dyn StreamKeyValidator> = match self.mode {
            ValidatorMode::AllowAll => Arc::new(AllowAllValidator),
            ValidatorMode::Static => Arc::new(StaticKeyValidator::new(self.keys.iter().cloned())),
            ValidatorMode::Pattern => {
                let pattern = self.pattern.as_deref().ok_or_else(|| {
                    anyhow::anyhow!("validator.pattern is required in pattern mode")
                })?;
                Arc::new(PatternValidator::new(pattern)?)
            }
        };
        Ok(validator)
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // BEAMCAST_SERVER__HTTP_PORT, BEAMCAST_SIGNALING__PEER_TIMEOUT_SECS, ...
        builder = builder.add_source(
            Environment::with_prefix("BEAMCAST")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("validator.keys")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }

    /// Check the whole configuration, returning every problem found
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.http_port == 0 {
            errors.push("server.http_port must be greater than 0".to_string());
        }
        if self.server.max_message_size == 0 {
            errors.push("server.max_message_size must be greater than 0".to_string());
        }
        if crate::logging::parse_log_level(&self.logging.level).is_err() {
            errors.push(format!("logging.level '{}' is not a valid level", self.logging.level));
        }

        if let Err(signaling_errors) = self.signaling.validate() {
            errors.extend(signaling_errors);
        }

        match self.validator.mode {
            ValidatorMode::AllowAll => {}
            ValidatorMode::Static => {
                if self.validator.keys.is_empty() {
                    errors.push("validator.keys must not be empty in static mode".to_string());
                }
            }
            ValidatorMode::Pattern => match self.validator.pattern.as_deref() {
                None => errors.push("validator.pattern is required in pattern mode".to_string()),
                Some(pattern) => {
                    if let Err(e) = regex::Regex::new(pattern) {
                        errors.push(format!("validator.pattern is invalid: {e}"));
                    }
                }
            },
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Resolve the config file (env var, then working directory) and load it
pub fn load_config() -> Config {
    let config_path = std::env::var("BEAMCAST_CONFIG_PATH")
        .ok()
        .filter(|p| Path::new(p).exists())
        .or_else(|| {
            let cwd = "config.yaml";
            Path::new(cwd).exists().then(|| cwd.to_string())
        });

    if let Some(path) = config_path {
        eprintln!("Loading config from {path}");
        Config::from_file(&path).unwrap_or_else(|e| {
            eprintln!("Failed to load {path}: {e}");
            eprintln!("Falling back to environment variables");
            Config::from_env().unwrap_or_default()
        })
    } else {
        Config::from_env().unwrap_or_else(|e| {
            eprintln!("Failed to load config: {e}");
            eprintln!("Using default configuration");
            Config::default()
        })
    }
}
