//! Configuration management for the bridge
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.
//! The precedence is file < environment < command line.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure for one running bridge instance
///
/// Built once at startup and read-only afterwards; the adapter owns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Kafka brokers (comma-separated)
    #[serde(default = "default_bootstrap_servers")]
    pub bootstrap_servers: String,

    /// Topics to subscribe to (comma-separated)
    #[serde(default)]
    pub topics: String,

    /// Consumer group used for offset coordination
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// SASL and TLS settings
    #[serde(default)]
    pub net: NetConfig,

    /// Destination endpoint for delivered events
    #[serde(default)]
    pub sink_uri: String,

    /// HTTP sink settings
    #[serde(default)]
    pub sink: SinkConfig,

    /// Consumer tuning
    #[serde(default)]
    pub consumer: ConsumerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network security configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NetConfig {
    /// SASL authentication
    #[serde(default)]
    pub sasl: SaslConfig,

    /// TLS encryption and client certificates
    #[serde(default)]
    pub tls: TlsConfig,
}

/// SASL authentication configuration
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct SaslConfig {
    /// Enable SASL authentication
    #[serde(default)]
    pub enable: bool,

    /// SASL username
    #[serde(default)]
    pub user: String,

    /// SASL password (prefer env var KAFKA_NET_SASL_PASSWORD)
    #[serde(default)]
    pub password: String,

    /// SASL mechanism
    #[serde(default)]
    pub mechanism: SaslMechanism,
}

impl std::fmt::Debug for SaslConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaslConfig")
            .field("enable", &self.enable)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("mechanism", &self.mechanism)
            .finish()
    }
}

/// SASL authentication mechanism.
///
/// Supported mechanisms for SASL authentication with Kafka.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaslMechanism {
    /// PLAIN mechanism (username/password in clear text).
    #[default]
    #[serde(rename = "PLAIN")]
    Plain,
    /// SCRAM-SHA-256 mechanism.
    #[serde(rename = "SCRAM-SHA-256")]
    ScramSha256,
    /// SCRAM-SHA-512 mechanism.
    #[serde(rename = "SCRAM-SHA-512")]
    ScramSha512,
}

impl SaslMechanism {
    /// Returns the Kafka configuration string for this mechanism.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::ScramSha256 => "SCRAM-SHA-256",
            Self::ScramSha512 => "SCRAM-SHA-512",
        }
    }
}

impl std::str::FromStr for SaslMechanism {
    type Err = BridgeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PLAIN" => Ok(Self::Plain),
            "SCRAM-SHA-256" => Ok(Self::ScramSha256),
            "SCRAM-SHA-512" => Ok(Self::ScramSha512),
            other => Err(BridgeError::Config(format!(
                "Invalid SASL mechanism: {}",
                other
            ))),
        }
    }
}

/// TLS configuration
///
/// Certificate material is carried as PEM text, not file paths.
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct TlsConfig {
    /// Enable TLS
    #[serde(default)]
    pub enable: bool,

    /// PEM-encoded client certificate
    #[serde(default)]
    pub cert: String,

    /// PEM-encoded client private key
    #[serde(default)]
    pub key: String,

    /// PEM-encoded CA certificate(s)
    #[serde(default)]
    pub ca_cert: String,

    /// Require the broker certificate to match the broker hostname
    #[serde(default)]
    pub verify_hostname: bool,
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("enable", &self.enable)
            .field("cert", &format_args!("<{} bytes>", self.cert.len()))
            .field("key", &"<redacted>")
            .field("ca_cert", &format_args!("<{} bytes>", self.ca_cert.len()))
            .field("verify_hostname", &self.verify_hostname)
            .finish()
    }
}

/// HTTP sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Request timeout in seconds enforced by the HTTP client
    #[serde(default = "default_sink_timeout")]
    pub timeout_secs: u64,
}

/// Consumer tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Interval between automatic commits of marked offsets
    #[serde(default = "default_auto_commit_interval")]
    pub auto_commit_interval_ms: u64,

    /// Group session timeout
    #[serde(default = "default_session_timeout")]
    pub session_timeout_ms: u64,

    /// Queued messages per partition before that partition is paused
    #[serde(default = "default_high_watermark")]
    pub partition_queue_high_watermark: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Enable JSON-formatted logs
    #[serde(default = "default_json_logs")]
    pub json_format: bool,

    /// Log file path (if None, STDOUT only)
    pub file_path: Option<std::path::PathBuf>,

    /// Include delivered payloads in debug logs
    #[serde(default)]
    pub include_payload: bool,
}

fn default_bootstrap_servers() -> String {
    "localhost:9092".to_string()
}

fn default_consumer_group() -> String {
    "kafka-bridge".to_string()
}

fn default_sink_timeout() -> u64 {
    30
}

fn default_auto_commit_interval() -> u64 {
    1000
}

fn default_session_timeout() -> u64 {
    10000
}

fn default_high_watermark() -> usize {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_json_logs() -> bool {
    true
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_sink_timeout(),
        }
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            auto_commit_interval_ms: default_auto_commit_interval(),
            session_timeout_ms: default_session_timeout(),
            partition_queue_high_watermark: default_high_watermark(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: default_json_logs(),
            file_path: None,
            include_payload: false,
        }
    }
}

/// Split a comma-delimited list, trimming entries and dropping empty and
/// repeated ones while keeping first-seen order.
pub fn split_list(raw: &str) -> Vec<String> {
    let mut items: Vec<String> = Vec::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !items.iter().any(|seen| seen == item) {
            items.push(item.to_string());
        }
    }
    items
}

fn parse_bool(name: &str, raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => {
            tracing::warn!("Invalid {}: {}", name, raw);
            None
        }
    }
}

impl AdapterConfig {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Returns
    ///
    /// Returns the loaded and merged configuration
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| BridgeError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(servers) = std::env::var("KAFKA_BOOTSTRAP_SERVERS") {
            self.bootstrap_servers = servers;
        }

        if let Ok(topics) = std::env::var("KAFKA_TOPICS") {
            self.topics = topics;
        }

        if let Ok(group) = std::env::var("KAFKA_CONSUMER_GROUP") {
            self.consumer_group = group;
        }

        if let Ok(enable) = std::env::var("KAFKA_NET_SASL_ENABLE") {
            if let Some(value) = parse_bool("KAFKA_NET_SASL_ENABLE", &enable) {
                self.net.sasl.enable = value;
            }
        }

        if let Ok(user) = std::env::var("KAFKA_NET_SASL_USER") {
            self.net.sasl.user = user;
        }

        if let Ok(password) = std::env::var("KAFKA_NET_SASL_PASSWORD") {
            self.net.sasl.password = password;
        }

        if let Ok(mechanism) = std::env::var("KAFKA_NET_SASL_MECHANISM") {
            match mechanism.parse() {
                Ok(value) => self.net.sasl.mechanism = value,
                Err(_) => tracing::warn!("Invalid KAFKA_NET_SASL_MECHANISM: {}", mechanism),
            }
        }

        if let Ok(enable) = std::env::var("KAFKA_NET_TLS_ENABLE") {
            if let Some(value) = parse_bool("KAFKA_NET_TLS_ENABLE", &enable) {
                self.net.tls.enable = value;
            }
        }

        if let Ok(cert) = std::env::var("KAFKA_NET_TLS_CERT") {
            self.net.tls.cert = cert;
        }

        if let Ok(key) = std::env::var("KAFKA_NET_TLS_KEY") {
            self.net.tls.key = key;
        }

        if let Ok(ca_cert) = std::env::var("KAFKA_NET_TLS_CA_CERT") {
            self.net.tls.ca_cert = ca_cert;
        }

        if let Ok(verify) = std::env::var("KAFKA_NET_TLS_VERIFY_HOSTNAME") {
            if let Some(value) = parse_bool("KAFKA_NET_TLS_VERIFY_HOSTNAME", &verify) {
                self.net.tls.verify_hostname = value;
            }
        }

        if let Ok(sink_uri) = std::env::var("SINK_URI") {
            self.sink_uri = sink_uri;
        }

        if let Ok(level) = std::env::var("BRIDGE_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(json) = std::env::var("BRIDGE_JSON_LOGS") {
            if let Some(value) = parse_bool("BRIDGE_JSON_LOGS", &json) {
                self.logging.json_format = value;
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(servers) = &cli.bootstrap_servers {
            self.bootstrap_servers = servers.clone();
        }
        if let Some(topics) = &cli.topics {
            self.topics = topics.clone();
        }
        if let Some(group) = &cli.consumer_group {
            self.consumer_group = group.clone();
        }
        if let Some(sink_uri) = &cli.sink_uri {
            self.sink_uri = sink_uri.clone();
        }
        if let Some(level) = &cli.log_level {
            self.logging.level = level.clone();
        }
        if cli.verbose {
            self.logging.level = "debug".to_string();
        }
        if cli.json_logs {
            self.logging.json_format = true;
        }
        if let Some(path) = &cli.log_file {
            self.logging.file_path = Some(path.clone());
        }
    }

    /// Broker addresses in configured order
    pub fn broker_list(&self) -> Vec<String> {
        split_list(&self.bootstrap_servers)
    }

    /// Topic set in configured order
    pub fn topic_list(&self) -> Vec<String> {
        split_list(&self.topics)
    }

    /// Whether client-certificate TLS material should be built
    pub fn wants_client_certificate(&self) -> bool {
        self.net.tls.enable && !self.net.tls.cert.trim().is_empty()
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns error if any validation check fails
    pub fn validate(&self) -> Result<()> {
        if self.broker_list().is_empty() {
            return Err(
                BridgeError::Config("bootstrap_servers cannot be empty".to_string()).into(),
            );
        }

        if self.topic_list().is_empty() {
            return Err(BridgeError::Config("topics cannot be empty".to_string()).into());
        }

        if self.consumer_group.trim().is_empty() {
            return Err(BridgeError::Config("consumer_group cannot be empty".to_string()).into());
        }

        match url::Url::parse(&self.sink_uri) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(url) => {
                return Err(BridgeError::Config(format!(
                    "sink_uri must use http or https, got {}",
                    url.scheme()
                ))
                .into());
            }
            Err(e) => {
                return Err(BridgeError::Config(format!(
                    "sink_uri is not a valid URL ({}): {}",
                    self.sink_uri, e
                ))
                .into());
            }
        }

        if self.net.sasl.enable && self.net.sasl.user.is_empty() {
            return Err(BridgeError::Config(
                "net.sasl.user is required when SASL is enabled".to_string(),
            )
            .into());
        }

        if self.net.tls.enable
            && !self.net.tls.cert.trim().is_empty()
            && self.net.tls.key.trim().is_empty()
        {
            return Err(BridgeError::Config(
                "net.tls.key is required when net.tls.cert is set".to_string(),
            )
            .into());
        }

        if self.consumer.partition_queue_high_watermark == 0 {
            return Err(BridgeError::Config(
                "consumer.partition_queue_high_watermark must be greater than 0".to_string(),
            )
            .into());
        }

        if self.sink.timeout_secs == 0 {
            return Err(
                BridgeError::Config("sink.timeout_secs must be greater than 0".to_string()).into(),
            );
        }

        Ok(())
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: default_bootstrap_servers(),
            topics: String::new(),
            consumer_group: default_consumer_group(),
            net: NetConfig::default(),
            sink_uri: String::new(),
            sink: SinkConfig::default(),
            consumer: ConsumerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
