use clap::{Parser, Subcommand};

use std::path::PathBuf;

use super::config::StoreBackend;
use super::constants::{
    ENV_CLICKHOUSE_URL, ENV_CONFIG, ENV_MQ_ADDR, ENV_REDIS_URL, ENV_STORE_BACKEND,
};

#[derive(Parser)]
#[command(name = "spanloop")]
#[command(version, about = "Span ingestion and trace query service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to config file
    #[arg(long, short = 'c', global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// Span store backend (memory or clickhouse)
    #[arg(long, global = true, env = ENV_STORE_BACKEND, value_parser = parse_store_backend)]
    pub store: Option<StoreBackend>,

    /// Redis URL for the id counter store and cache
    #[arg(long, global = true, env = ENV_REDIS_URL)]
    pub redis_url: Option<String>,

    /// ClickHouse URL (replaces configured hosts)
    #[arg(long, global = true, env = ENV_CLICKHOUSE_URL)]
    pub clickhouse_url: Option<String>,

    /// Message queue address; unset keeps the in-process queue
    #[arg(long, global = true, env = ENV_MQ_ADDR)]
    pub mq_addr: Option<String>,
}

/// Parse store backend from CLI/env string
fn parse_store_backend(s: &str) -> Result<StoreBackend, String> {
    match s.to_lowercase().as_str() {
        "memory" => Ok(StoreBackend::Memory),
        "clickhouse" => Ok(StoreBackend::Clickhouse),
        _ => Err(format!(
            "Invalid store backend '{}'. Valid options: memory, clickhouse",
            s
        )),
    }
}

#[derive(Subcommand, Clone, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Start the service (default command)
    Start,
    /// Load and validate the configuration, then exit
    CheckConfig,
}

/// Configuration derived from CLI arguments
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub config: Option<PathBuf>,
    pub store: Option<StoreBackend>,
    pub redis_url: Option<String>,
    pub clickhouse_url: Option<String>,
    pub mq_addr: Option<String>,
}

impl From<Cli> for CliConfig {
    fn from(cli: Cli) -> Self {
        Self {
            config: cli.config,
            store: cli.store,
            redis_url: cli.redis_url,
            clickhouse_url: cli.clickhouse_url,
            mq_addr: cli.mq_addr,
        }
    }
}

/// Parse CLI arguments and return config with command
pub fn parse() -> (CliConfig, Option<Commands>) {
    let mut cli = Cli::parse();
    let command = cli.command.take();
    (cli.into(), command)
}
