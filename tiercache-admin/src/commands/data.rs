use anyhow::{Context, Result};
use clap::Subcommand;
use std::time::Duration;
use tiercache_core::{Cache, CacheError, CacheValue, Ttl};

#[derive(Subcommand)]
pub enum DataCommands {
    /// Print the value stored under a key
    Get {
        key: String,
    },
    /// Store a value
    Set {
        key: String,
        value: String,
        /// Expire after this many seconds
        #[arg(long)]
        ttl: Option<u64>,
        /// Parse the value as JSON instead of storing it as text
        #[arg(long)]
        json: bool,
    },
    /// Delete keys of any kind
    Del {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// List keys matching a glob pattern
    Keys {
        #[arg(default_value = "*")]
        pattern: String,
    },
    /// Show the remaining lifetime of a key
    Ttl {
        key: String,
    },
}

pub fn execute_data_command(cache: &Cache, command: DataCommands) -> Result<()> {
    match command {
        DataCommands::Get { key } => match cache.get(&key) {
            Ok(value) => println!("{}", value),
            Err(CacheError::KeyNotFound) => println!("(nil)"),
            Err(e) => return Err(e).with_context(|| format!("GET {} failed", key)),
        },

        DataCommands::Set { key, value, ttl, json } => {
            let value = if json {
                let document: serde_json::Value = serde_json::from_str(&value)
                    .with_context(|| format!("Value for {} is not valid JSON", key))?;
                CacheValue::Json(document)
            } else {
                CacheValue::from(value)
            };
            let ttl = ttl.filter(|secs| *secs > 0).map(Duration::from_secs);
            cache
                .set(&key, value, ttl)
                .with_context(|| format!("SET {} failed", key))?;
            println!("OK");
        }

        DataCommands::Del { keys } => {
            let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
            let removed = cache.del(&refs).context("DEL failed")?;
            println!("(integer) {}", removed);
        }

        DataCommands::Keys { pattern } => {
            let keys = cache
                .keys(&pattern)
                .with_context(|| format!("KEYS {} failed", pattern))?;
            if keys.is_empty() {
                println!("(empty)");
            }
            for (i, key) in keys.iter().enumerate() {
                println!("{:>4}) {}", i + 1, key);
            }
        }

        DataCommands::Ttl { key } => match cache.ttl(&key) {
            Ok(Ttl::Never) => println!("(integer) -1 (no expiry)"),
            Ok(ttl) => println!("(integer) {}", ttl.as_secs_i64()),
            Err(CacheError::KeyNotFound) => println!("(integer) -2 (no such key)"),
            Err(e) => return Err(e).with_context(|| format!("TTL {} failed", key)),
        },
    }

    Ok(())
}
