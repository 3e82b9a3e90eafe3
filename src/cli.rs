//! Command-line interface definition for the bridge
//!
//! This module defines the CLI structure using clap's derive API. Every flag
//! is optional and overrides the matching file or environment setting.

use clap::Parser;
use std::path::PathBuf;

/// kafka-bridge - forward Kafka records to an HTTP sink as CloudEvents
#[derive(Parser, Debug, Clone)]
#[command(name = "kafka-bridge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "BRIDGE_CONFIG", default_value = "config/bridge.yaml")]
    pub config: Option<String>,

    /// Comma-separated Kafka brokers
    #[arg(short, long)]
    pub bootstrap_servers: Option<String>,

    /// Comma-separated topics to consume
    #[arg(short, long)]
    pub topics: Option<String>,

    /// Consumer group id
    #[arg(short = 'g', long)]
    pub consumer_group: Option<String>,

    /// Sink endpoint receiving the events
    #[arg(short, long)]
    pub sink_uri: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Emit JSON-formatted logs
    #[arg(long)]
    pub json_logs: bool,

    /// Also write logs to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/bridge.yaml".to_string()),
            bootstrap_servers: None,
            topics: None,
            consumer_group: None,
            sink_uri: None,
            log_level: None,
            json_logs: false,
            log_file: None,
            verbose: false,
        }
    }
}
