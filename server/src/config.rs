use std::env;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub queue: QueueSettings,
    pub webhook: WebhookSettings,
    pub websocket: WebSocketSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    /// SQLite database URL. Defaults to a per-user data directory.
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct QueueSettings {
    /// Ceiling on simultaneously running tasks.
    pub max_concurrent_tasks: usize,
    pub default_priority: i64,
    pub max_retries: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WebhookSettings {
    /// Per-attempt HTTP timeout for webhook posts.
    pub timeout_seconds: u64,
    pub max_retries: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WebSocketSettings {
    pub heartbeat_interval_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Console,
}

impl Config {
    /// Load configuration from the embedded defaults, an optional
    /// CONFIG_FILE, and MAESTRO_-prefixed environment variables.
    pub fn from_env() -> Result<Self> {
        let mut builder = ConfigBuilder::builder().add_source(File::from_str(
            include_str!("../config/default.toml"),
            FileFormat::Toml,
        ));

        if let Ok(config_file) = env::var("CONFIG_FILE") {
            builder = builder.add_source(
                File::with_name(&config_file)
                    .required(false)
                    .format(FileFormat::Toml),
            );
        }

        builder = builder.add_source(
            Environment::with_prefix("MAESTRO")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let mut result: Config = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Self::apply_standard_env_vars(&mut result);

        Ok(result)
    }

    /// Load configuration from a specific file path, with environment
    /// overrides on top.
    pub fn from_file(path: &str) -> Result<Self> {
        let builder = ConfigBuilder::builder()
            .add_source(File::from_str(
                include_str!("../config/default.toml"),
                FileFormat::Toml,
            ))
            .add_source(File::with_name(path).format(FileFormat::Toml))
            .add_source(
                Environment::with_prefix("MAESTRO")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder
            .build()
            .context("Failed to build configuration from file")?;

        let mut result: Config = config
            .try_deserialize()
            .context("Failed to deserialize configuration from file")?;

        Self::apply_standard_env_vars(&mut result);

        Ok(result)
    }

    /// Honor the conventional deployment variables (DATABASE_URL,
    /// LOG_LEVEL) on top of the config-crate sources.
    fn apply_standard_env_vars(config: &mut Config) {
        if let Ok(database_url) = env::var("DATABASE_URL") {
            config.database.url = Some(database_url);
        }

        if let Ok(log_level) = env::var("LOG_LEVEL") {
            config.logging.level = log_level;
        }
    }

    /// The database URL, falling back to a per-user data directory.
    pub fn database_url(&self) -> String {
        match &self.database.url {
            Some(url) => url.clone(),
            None => Self::default_database_url(),
        }
    }

    pub fn default_database_url() -> String {
        if let Ok(xdg_data) = env::var("XDG_DATA_HOME") {
            return format!("sqlite://{xdg_data}/maestro/maestro.sqlite");
        }

        let home = env::var("HOME")
            .or_else(|_| env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        format!("sqlite://{home}/maestro.sqlite")
    }

    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(anyhow::anyhow!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                ));
            }
        }

        let database_url = self.database_url();
        if !database_url.starts_with("sqlite://") && !database_url.starts_with(":memory:") {
            return Err(anyhow::anyhow!(
                "Only SQLite databases are supported. URL must start with 'sqlite://'. Got: {}",
                database_url
            ));
        }

        if self.queue.max_concurrent_tasks == 0 {
            return Err(anyhow::anyhow!(
                "queue.max_concurrent_tasks must be greater than 0"
            ));
        }

        if self.queue.max_retries < 0 {
            return Err(anyhow::anyhow!("queue.max_retries cannot be negative"));
        }

        if self.webhook.timeout_seconds == 0 {
            return Err(anyhow::anyhow!(
                "webhook.timeout_seconds must be greater than 0"
            ));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig { url: None },
            queue: QueueSettings {
                max_concurrent_tasks: 5,
                default_priority: 5,
                max_retries: 3,
            },
            webhook: WebhookSettings {
                timeout_seconds: 10,
                max_retries: 3,
            },
            websocket: WebSocketSettings {
                heartbeat_interval_seconds: 30,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Console,
            },
        }
    }
}
