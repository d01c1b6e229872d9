use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tiercache_core::{init_logging, BackendKind, Cache, ConfigManager};
use tracing::{error, info};

mod commands;

use commands::*;

#[derive(Parser)]
#[command(name = "tiercache-admin")]
#[command(about = "TierCache administration CLI")]
#[command(version)]
struct Cli {
    /// Configuration file path (created with defaults if missing)
    #[arg(short, long, default_value = "tiercache.toml")]
    config: PathBuf,

    /// Cache database file, overriding the configuration
    #[arg(short, long, env = "TIERCACHE_FILE")]
    file: Option<PathBuf>,

    /// Key prefix, overriding the configuration
    #[arg(short, long)]
    prefix: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read, write and inspect keys
    #[command(flatten)]
    Data(DataCommands),
    /// Sweeps, compaction and health checks
    #[command(flatten)]
    Maintenance(MaintenanceCommands),
    /// Print the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let manager = ConfigManager::new(cli.config.clone())?;
    let mut config = manager.get_config().await;
    if cli.verbose {
        config.logging.level = "DEBUG".to_string();
    }
    init_logging(&config.logging)?;

    // The admin tool always works on the database file
    config.cache.backend = BackendKind::File;
    if let Some(file) = cli.file {
        config.cache.file_path = file;
    }
    if let Some(prefix) = cli.prefix {
        config.cache.prefix = prefix;
    }

    if let Commands::ShowConfig = cli.command {
        let rendered = serde_json::to_string_pretty(&config)
            .context("Failed to render configuration")?;
        println!("{}", rendered);
        return Ok(());
    }

    let cache = Cache::open(&config.cache).with_context(|| {
        format!("Failed to open cache file: {}", config.cache.file_path.display())
    })?;
    info!("Opened {}", config.cache.file_path.display());

    let result = match cli.command {
        Commands::Data(action) => execute_data_command(&cache, action),
        Commands::Maintenance(action) => execute_maintenance_command(&cache, action),
        Commands::ShowConfig => Ok(()),
    };

    if let Err(e) = cache.close() {
        error!("Failed to close cache: {}", e);
    }

    match result {
        Ok(_) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            Err(e)
        }
    }
}
