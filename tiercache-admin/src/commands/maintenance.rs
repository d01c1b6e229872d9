use anyhow::{Context, Result};
use clap::Subcommand;
use tiercache_core::Cache;

#[derive(Subcommand)]
pub enum MaintenanceCommands {
    /// Reclaim expired keys now
    Sweep {
        /// Maximum keys to process
        #[arg(long, default_value_t = 1000)]
        limit: usize,
    },
    /// Rewrite the database file to reclaim space
    Compact,
    /// Check that the cache is reachable
    Ping,
}

pub fn execute_maintenance_command(cache: &Cache, command: MaintenanceCommands) -> Result<()> {
    match command {
        MaintenanceCommands::Sweep { limit } => {
            println!("Sweeping up to {} expired keys...", limit);
            let stats = cache.sweep_expired(limit).context("Sweep failed")?;
            println!("Processed: {}", stats.processed);
            println!("Removed:   {}", stats.removed);
        }

        MaintenanceCommands::Compact => {
            println!("Compacting database...");
            match cache.compact().context("Compaction failed")? {
                Some(stats) => {
                    println!("\nCompaction Summary");
                    println!("{}", "=".repeat(40));
                    println!("Entries copied: {}", stats.entries);
                    println!("Size before:    {:.2} KB", stats.bytes_before as f64 / 1024.0);
                    println!("Size after:     {:.2} KB", stats.bytes_after as f64 / 1024.0);
                    println!("Duration:       {:?}", stats.duration);
                }
                None => println!("Backend has nothing to compact"),
            }
        }

        MaintenanceCommands::Ping => {
            cache.ping().context("Ping failed")?;
            println!("PONG");
        }
    }

    Ok(())
}
