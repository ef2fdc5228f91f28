// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Datapond Broker
//!
//! Standalone broker hosting the global pond and every owner-scoped
//! persistent pond for a group of datapond clients. Values live in broker
//! memory only: "persistent" elements survive their owning client's
//! reconnects, not a broker restart.
//!
//! # Usage
//!
//! ```bash
//! # Start on the default port (9310)
//! datapond-broker
//!
//! # Custom port and config file
//! datapond-broker --port 9410 --config broker.json
//! ```

use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod config;
mod server;

pub use config::BrokerConfig;
pub use server::Broker;

/// Datapond Broker - central value store for cooperating vehicle services
#[derive(Parser, Debug)]
#[command(name = "datapond-broker")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TCP port to listen on
    #[arg(short, long, default_value = "9310")]
    port: u16,

    /// Bind address (0.0.0.0 for all interfaces)
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Configuration file (JSON format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Identity announced to connecting clients
    #[arg(short, long, default_value = "datapond-broker")]
    name: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    // Load or create config
    let config = if let Some(config_path) = args.config {
        info!("Loading config from {:?}", config_path);
        BrokerConfig::from_file(&config_path)?
    } else {
        BrokerConfig {
            bind_address: args.bind.parse()?,
            port: args.port,
            broker_name: args.name,
            ..Default::default()
        }
    };

    info!("+----------------------------------------------------+");
    info!(
        "|       Datapond Broker v{}                       |",
        env!("CARGO_PKG_VERSION")
    );
    info!("+----------------------------------------------------+");
    info!("|  Bind:   {:40} |", format!("{}:{}", config.bind_address, config.port));
    info!("|  Name:   {:40} |", config.broker_name);
    info!(
        "|  Limit:  {:40} |",
        format!("{} clients", config.max_clients)
    );
    info!("+----------------------------------------------------+");

    let mut broker = Broker::start(config)?;
    broker.wait();

    info!("broker stopped");
    Ok(())
}
