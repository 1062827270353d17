mod config;
mod setup;
mod telemetry;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use config::Config;
use setup::initialize_app;
use telemetry::{init_telemetry, log_shutdown_info, log_startup_info};

#[derive(Parser)]
#[command(name = "maestro")]
#[command(about = "Maestro task orchestration server")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "CONFIG_FILE")]
    config: Option<String>,

    /// Database URL override
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Log level override
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(config_file) => Config::from_file(config_file)?,
        None => Config::from_env()?,
    };

    if let Some(ref database_url) = cli.database_url {
        config.database.url = Some(database_url.clone());
    }

    if let Some(ref log_level) = cli.log_level {
        config.logging.level = log_level.clone();
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    init_telemetry(&config.logging)?;
    config.validate()?;
    log_startup_info(&config);

    let app = match initialize_app(&config).await {
        Ok(app) => app,
        Err(err) => {
            error!(error = %err, "startup failed");
            return Err(err);
        }
    };

    let stats = app.queue.stats().await?;
    info!(
        total_tasks = stats.tasks.total_tasks,
        queue_depth = stats.queue_depth,
        "maestro core ready; waiting for transport traffic"
    );

    tokio::signal::ctrl_c().await?;
    log_shutdown_info();

    Ok(())
}
