//! HTTP sink delivering CloudEvents in binary content mode

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use tracing::debug;
use url::Url;

use super::{Sink, SinkError};
use crate::config::AdapterConfig;
use crate::event::EventEnvelope;

const HEADER_PREFIX: &str = "ce-";

/// Sink posting each envelope to a single HTTP endpoint
///
/// Built once at startup and shared by every partition task. The underlying
/// `reqwest::Client` pools connections across tasks.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: Client,
    target: Url,
}

impl HttpSink {
    /// Create a new HTTP sink
    ///
    /// # Arguments
    ///
    /// * `target` - Absolute http(s) URL receiving the events
    /// * `timeout` - Per-request timeout enforced by the client
    ///
    /// # Errors
    ///
    /// Returns `SinkError::InvalidUri` if `target` is not an absolute http(s)
    /// URL, or `SinkError::Http` if the client cannot be built
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use kafka_bridge::sink::HttpSink;
    ///
    /// let sink = HttpSink::new("http://event-display.default.svc", Duration::from_secs(30));
    /// assert!(sink.is_ok());
    /// ```
    pub fn new(target: &str, timeout: Duration) -> Result<Self, SinkError> {
        let target = Url::parse(target)
            .map_err(|e| SinkError::InvalidUri(format!("{}: {}", target, e)))?;
        if target.scheme() != "http" && target.scheme() != "https" {
            return Err(SinkError::InvalidUri(format!(
                "unsupported scheme {}",
                target.scheme()
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("kafka-bridge/", env!("CARGO_PKG_VERSION")))
            .build()?;

        tracing::info!(sink = %target, "Initialized HTTP sink");

        Ok(Self { client, target })
    }

    /// Create the sink described by the adapter configuration
    ///
    /// # Errors
    ///
    /// Same as [`HttpSink::new`]
    pub fn from_config(config: &AdapterConfig) -> Result<Self, SinkError> {
        Self::new(
            &config.sink_uri,
            Duration::from_secs(config.sink.timeout_secs),
        )
    }

    /// Endpoint receiving the events
    pub fn target(&self) -> &Url {
        &self.target
    }
}

/// CloudEvents binary-mode headers for an envelope
///
/// Attribute values that are not valid header values are skipped.
pub fn binary_headers(envelope: &EventEnvelope) -> HeaderMap {
    let mut headers = HeaderMap::new();

    let mut attributes: Vec<(String, String)> = vec![
        ("specversion".to_string(), envelope.spec_version.to_string()),
        ("type".to_string(), envelope.event_type.to_string()),
        ("id".to_string(), envelope.id.clone()),
        ("source".to_string(), envelope.source.clone()),
    ];
    if let Some(time) = envelope.time {
        attributes.push(("time".to_string(), time.to_rfc3339()));
    }
    for (name, value) in &envelope.extensions {
        attributes.push((name.to_lowercase(), value.clone()));
    }

    for (name, value) in attributes {
        let header = HeaderName::from_bytes(format!("{}{}", HEADER_PREFIX, name).as_bytes());
        let value = HeaderValue::from_str(&value);
        match (header, value) {
            (Ok(header), Ok(value)) => {
                headers.insert(header, value);
            }
            _ => {
                tracing::warn!(
                    event_id = %envelope.id,
                    attribute = %name,
                    "Skipping attribute that is not a valid header"
                );
            }
        }
    }

    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(envelope.content_type),
    );
    headers
}

#[async_trait]
impl Sink for HttpSink {
    async fn send(&self, envelope: &EventEnvelope) -> Result<(), SinkError> {
        let body = envelope.data.to_body()?;

        let response = self
            .client
            .post(self.target.clone())
            .headers(binary_headers(envelope))
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Status {
                status: status.as_u16(),
                body,
            });
        }

        debug!(event_id = %envelope.id, status = status.as_u16(), "Event delivered");
        Ok(())
    }
}
