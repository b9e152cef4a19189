//! # Bulk Configuration Validator
//!
//! Loads a bulk engine configuration the way the service does (defaults, then
//! the file, then `BULK__*` environment overrides), validates it, and prints
//! the effective configuration as JSON.
//!
//! ```bash
//! config-validator config/bulk.toml
//! BULK_CONFIG_PATH=config/bulk.toml config-validator
//! ```

use anyhow::Context;
use bulk_core::config::{BulkConfig, ConfigLoader};
use bulk_core::logging::init_structured_logging;
use std::process;
use tracing::{error, info};

fn main() {
    init_structured_logging();

    match run() {
        Ok(()) => {
            info!("Configuration validation completed successfully");
        }
        Err(e) => {
            error!("Configuration validation failed: {e:#}");
            eprintln!("Configuration invalid: {e:#}");
            process::exit(1);
        }
    }
}

fn run() -> anyhow::Result<()> {
    let loader = match std::env::args().nth(1) {
        Some(path) if path == "-h" || path == "--help" => {
            println!("usage: config-validator [CONFIG_FILE]");
            return Ok(());
        }
        Some(path) => ConfigLoader::new().with_file(path),
        None => ConfigLoader::from_env(),
    };

    match loader.file() {
        Some(path) => println!("Validating {}", path.display()),
        None => println!("No configuration file given, validating defaults and environment"),
    }

    let config = loader.load().context("loading bulk configuration")?;
    print_summary(&config);
    println!(
        "{}",
        serde_json::to_string_pretty(&config).context("serializing effective configuration")?
    );
    Ok(())
}

fn print_summary(config: &BulkConfig) {
    println!(
        "dispatcher: bucket {} / batch {}, fetch x{}",
        config.dispatcher.default_bucket_size,
        config.dispatcher.default_batch_size,
        config.dispatcher.scroll_fetch_multiplier
    );
    println!(
        "channel: {} partitions of {} buckets",
        config.channel.partitions, config.channel.capacity
    );
    println!(
        "status: retention {}s, {} buffered events",
        config.status.retention_seconds, config.status.event_capacity
    );
}
