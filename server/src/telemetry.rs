use anyhow::{Context, Result};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry,
};

use crate::config::{LogFormat, LoggingConfig};

/// Initialize the tracing subscriber for the server process.
pub fn init_telemetry(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("Invalid log level configuration")?;

    let registry = Registry::default().with(env_filter);

    match config.format {
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_target(true)
                .with_span_list(true)
                .flatten_event(true);

            registry.with(fmt_layer).init();
        }
        LogFormat::Console => {
            let fmt_layer = fmt::layer().with_target(true);

            registry.with(fmt_layer).init();
        }
    }

    tracing::info!(
        log_level = %config.level,
        log_format = ?config.format,
        "telemetry initialized"
    );

    Ok(())
}

/// Log the effective configuration at startup.
pub fn log_startup_info(config: &crate::config::Config) {
    tracing::info!(
        database_url = %config.database_url(),
        max_concurrent_tasks = config.queue.max_concurrent_tasks,
        default_priority = config.queue.default_priority,
        max_retries = config.queue.max_retries,
        webhook_timeout_seconds = config.webhook.timeout_seconds,
        "maestro server starting up"
    );
}

pub fn log_shutdown_info() {
    tracing::info!("maestro server shutting down gracefully");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_are_recognized() {
        // Initialization itself can only happen once per process; this
        // checks the configuration plumbing.
        for format in [LogFormat::Json, LogFormat::Console] {
            let config = LoggingConfig {
                level: "debug".to_string(),
                format,
            };
            assert!(matches!(config.format, LogFormat::Json | LogFormat::Console));
        }
    }
}
