//! librdkafka client configuration for the consumer group

use rdkafka::ClientConfig;
use tracing::info;

use crate::config::AdapterConfig;
use crate::security::{CertificateError, SecurityContext, VerificationStrategy};

/// Oldest broker protocol assumed when version negotiation is unavailable.
pub const BROKER_VERSION_FALLBACK: &str = "2.0.0";

/// Security protocol for the given SASL and TLS switches
pub fn security_protocol(sasl: bool, tls: bool) -> &'static str {
    match (sasl, tls) {
        (false, false) => "plaintext",
        (false, true) => "ssl",
        (true, false) => "sasl_plaintext",
        (true, true) => "sasl_ssl",
    }
}

/// Broker verification policy for the configuration
///
/// The hostname check is skipped only when a client certificate is
/// configured and `verify_hostname` is off. TLS without a client
/// certificate always checks the broker hostname.
pub fn verification_strategy(config: &AdapterConfig) -> VerificationStrategy {
    if config.wants_client_certificate() {
        VerificationStrategy::from_verify_hostname(config.net.tls.verify_hostname)
    } else {
        VerificationStrategy::ChainAndHostname
    }
}

/// Build the key/value settings for the consumer
///
/// Offsets are committed automatically, but only offsets explicitly stored
/// after a successful delivery are eligible.
pub fn client_settings(config: &AdapterConfig) -> Vec<(String, String)> {
    let sasl = &config.net.sasl;
    let tls = &config.net.tls;

    let mut settings = vec![
        (
            "bootstrap.servers".to_string(),
            config.broker_list().join(","),
        ),
        ("group.id".to_string(), config.consumer_group.clone()),
        ("auto.offset.reset".to_string(), "earliest".to_string()),
        (
            "broker.version.fallback".to_string(),
            BROKER_VERSION_FALLBACK.to_string(),
        ),
        ("api.version.request".to_string(), "true".to_string()),
        ("enable.auto.commit".to_string(), "true".to_string()),
        (
            "auto.commit.interval.ms".to_string(),
            config.consumer.auto_commit_interval_ms.to_string(),
        ),
        ("enable.auto.offset.store".to_string(), "false".to_string()),
        (
            "session.timeout.ms".to_string(),
            config.consumer.session_timeout_ms.to_string(),
        ),
        (
            "client.id".to_string(),
            format!("kafka-bridge-{}", config.consumer_group),
        ),
        (
            "security.protocol".to_string(),
            security_protocol(sasl.enable, tls.enable).to_string(),
        ),
    ];

    if sasl.enable {
        settings.push((
            "sasl.mechanism".to_string(),
            sasl.mechanism.as_str().to_string(),
        ));
        settings.push(("sasl.username".to_string(), sasl.user.clone()));
        settings.push(("sasl.password".to_string(), sasl.password.clone()));
    }

    if tls.enable {
        let strategy = verification_strategy(config);
        settings.push((
            "enable.ssl.certificate.verification".to_string(),
            "true".to_string(),
        ));
        settings.push((
            "ssl.endpoint.identification.algorithm".to_string(),
            strategy.endpoint_identification_algorithm().to_string(),
        ));
    }

    settings
}

/// Build the librdkafka client configuration
///
/// # Arguments
///
/// * `config` - Adapter configuration
/// * `security` - Parsed TLS material, present only when TLS is enabled and a
///   client certificate is configured
///
/// # Errors
///
/// Returns `CertificateError` if the TLS material cannot be handed to the client
pub fn build_client_config(
    config: &AdapterConfig,
    security: Option<&SecurityContext>,
) -> Result<ClientConfig, CertificateError> {
    let mut client = ClientConfig::new();
    for (key, value) in client_settings(config) {
        client.set(key, value);
    }

    if let Some(security) = security {
        security.apply(&mut client)?;
    }

    info!(
        brokers = %config.broker_list().join(","),
        group_id = %config.consumer_group,
        security_protocol = %security_protocol(config.net.sasl.enable, config.net.tls.enable),
        client_certificate = security.is_some(),
        "Built Kafka client configuration"
    );

    Ok(client)
}
