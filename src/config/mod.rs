//! Configuration

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn, Level};

/// Configuration for the task board
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    /// Upper bound on each remote call, in seconds
    pub operation_timeout_secs: u64,

    /// Time allowed for feed tasks to stop during teardown, in seconds
    pub shutdown_timeout_secs: u64,

    /// Maximum log level: trace, debug, info, warn or error
    pub log_level: String,

    /// Seed the Backlog with the starter tasks when the demo starts
    pub seed_demo_tasks: bool,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            operation_timeout_secs: 10,
            shutdown_timeout_secs: 5,
            log_level: "info".to_string(),
            seed_demo_tasks: true,
        }
    }
}

impl BoardConfig {
    /// Load configuration from file, environment variables, or defaults
    pub fn load() -> crate::Result<Self> {
        if let Ok(config_path) = env::var("TASK_BOARD_CONFIG") {
            info!("Loading config from TASK_BOARD_CONFIG: {}", config_path);
            return Self::from_file(&config_path);
        }

        let default_paths = [
            "board.yaml",
            "board.toml",
            "config/board.yaml",
            "config/board.toml",
        ];

        for path in default_paths {
            if Path::new(path).exists() {
                info!("Loading config from: {}", path);
                return Self::from_file(path);
            }
        }

        if let Ok(config) = Self::from_env() {
            info!("Loaded config from environment variables");
            return Ok(config);
        }

        warn!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a file (YAML or TOML)
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()
            .map_err(|e| {
                crate::BoardError::ConfigError(format!("Failed to load config file: {}", e))
            })?;

        let config: BoardConfig = settings.try_deserialize().map_err(|e| {
            crate::BoardError::ConfigError(format!("Failed to parse config: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `TASK_BOARD_*` environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Self::default();
        let mut found_any = false;

        if let Ok(val) = env::var("TASK_BOARD_OPERATION_TIMEOUT_SECS") {
            config.operation_timeout_secs = val.parse().map_err(|e| {
                crate::BoardError::ConfigError(format!("Invalid OPERATION_TIMEOUT_SECS: {}", e))
            })?;
            found_any = true;
        }

        if let Ok(val) = env::var("TASK_BOARD_SHUTDOWN_TIMEOUT_SECS") {
            config.shutdown_timeout_secs = val.parse().map_err(|e| {
                crate::BoardError::ConfigError(format!("Invalid SHUTDOWN_TIMEOUT_SECS: {}", e))
            })?;
            found_any = true;
        }

        if let Ok(val) = env::var("TASK_BOARD_LOG_LEVEL") {
            config.log_level = val;
            found_any = true;
        }

        if let Ok(val) = env::var("TASK_BOARD_SEED_DEMO_TASKS") {
            config.seed_demo_tasks = val.parse().map_err(|e| {
                crate::BoardError::ConfigError(format!("Invalid SEED_DEMO_TASKS: {}", e))
            })?;
            found_any = true;
        }

        if !found_any {
            return Err(crate::BoardError::ConfigError(
                "No environment variables found".to_string(),
            ));
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.operation_timeout_secs == 0 {
            return Err(crate::BoardError::ConfigError(
                "Operation timeout must be greater than 0".to_string(),
            ));
        }

        if self.shutdown_timeout_secs == 0 {
            return Err(crate::BoardError::ConfigError(
                "Shutdown timeout must be greater than 0".to_string(),
            ));
        }

        self.max_log_level()?;
        Ok(())
    }

    /// Parsed `log_level`
    pub fn max_log_level(&self) -> crate::Result<Level> {
        self.log_level.parse::<Level>().map_err(|_| {
            crate::BoardError::ConfigError(format!("Invalid log level: {}", self.log_level))
        })
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
