//! Test utilities for the bridge
//!
//! Certificate generation, record fixtures, and recording test doubles for
//! the sink and the offset marker.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{
    BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
};
use openssl::x509::{X509Builder, X509NameBuilder, X509};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};

use crate::config::AdapterConfig;
use crate::event::EventEnvelope;
use crate::kafka::{ConsumedMessage, OffsetMarker};
use crate::sink::{Sink, SinkError};

static SERIAL: AtomicUsize = AtomicUsize::new(1);

/// Generated certificate with its key in the forms tests need
pub struct TestCert {
    /// Parsed certificate
    pub cert: X509,
    /// Private key
    pub key: PKey<Private>,
    /// Certificate PEM
    pub cert_pem: String,
    /// PKCS#8 private key PEM
    pub key_pem: String,
    /// Certificate DER
    pub cert_der: Vec<u8>,
}

fn new_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).expect("P-256 group");
    let ec = EcKey::generate(&group).expect("generate EC key");
    PKey::from_ec_key(ec).expect("wrap EC key")
}

fn build_cert(
    common_name: &str,
    sans: &[&str],
    key: &PKey<Private>,
    issuer: Option<&TestCert>,
    is_ca: bool,
) -> X509 {
    let mut name = X509NameBuilder::new().expect("name builder");
    name.append_entry_by_nid(Nid::COMMONNAME, common_name)
        .expect("common name");
    let name = name.build();

    let mut builder = X509Builder::new().expect("x509 builder");
    builder.set_version(2).expect("version");
    let serial = BigNum::from_u32(SERIAL.fetch_add(1, Ordering::SeqCst) as u32)
        .and_then(|bn| bn.to_asn1_integer())
        .expect("serial");
    builder.set_serial_number(&serial).expect("set serial");
    builder.set_subject_name(&name).expect("subject");
    match issuer {
        Some(ca) => builder
            .set_issuer_name(ca.cert.subject_name())
            .expect("issuer"),
        None => builder.set_issuer_name(&name).expect("issuer"),
    }
    builder.set_pubkey(key).expect("pubkey");

    let not_before = Asn1Time::from_unix(Utc::now().timestamp() - 3600).expect("not before");
    let not_after = Asn1Time::days_from_now(365).expect("not after");
    builder.set_not_before(&not_before).expect("set not before");
    builder.set_not_after(&not_after).expect("set not after");

    if is_ca {
        builder
            .append_extension(BasicConstraints::new().critical().ca().build().expect("bc"))
            .expect("append bc");
        builder
            .append_extension(
                KeyUsage::new()
                    .critical()
                    .key_cert_sign()
                    .crl_sign()
                    .build()
                    .expect("ku"),
            )
            .expect("append ku");
    } else {
        builder
            .append_extension(BasicConstraints::new().build().expect("bc"))
            .expect("append bc");
        builder
            .append_extension(
                KeyUsage::new()
                    .critical()
                    .digital_signature()
                    .build()
                    .expect("ku"),
            )
            .expect("append ku");
        builder
            .append_extension(
                ExtendedKeyUsage::new()
                    .server_auth()
                    .client_auth()
                    .build()
                    .expect("eku"),
            )
            .expect("append eku");
    }

    if !sans.is_empty() {
        let mut san = SubjectAlternativeName::new();
        for entry in sans {
            if entry.parse::<std::net::IpAddr>().is_ok() {
                san.ip(entry);
            } else {
                san.dns(entry);
            }
        }
        let extension = san
            .build(&builder.x509v3_context(issuer.map(|ca| &*ca.cert), None))
            .expect("san");
        builder.append_extension(extension).expect("append san");
    }

    let signing_key = issuer.map(|ca| &ca.key).unwrap_or(key);
    builder
        .sign(signing_key, MessageDigest::sha256())
        .expect("sign certificate");
    builder.build()
}

fn finish(cert: X509, key: PKey<Private>) -> TestCert {
    let cert_pem = String::from_utf8(cert.to_pem().expect("cert pem")).expect("utf8 pem");
    let key_pem =
        String::from_utf8(key.private_key_to_pem_pkcs8().expect("key pem")).expect("utf8 pem");
    let cert_der = cert.to_der().expect("cert der");
    TestCert {
        cert,
        key,
        cert_pem,
        key_pem,
        cert_der,
    }
}

/// Generate a self-signed CA certificate
pub fn generate_ca(common_name: &str) -> TestCert {
    let key = new_key();
    let cert = build_cert(common_name, &[], &key, None, true);
    finish(cert, key)
}

/// Generate an intermediate CA certificate signed by `ca`
pub fn generate_intermediate(ca: &TestCert, common_name: &str) -> TestCert {
    let key = new_key();
    let cert = build_cert(common_name, &[], &key, Some(ca), true);
    finish(cert, key)
}

/// Generate a leaf certificate signed by `ca`
///
/// Entries in `sans` that parse as IP addresses become IP SANs, the rest DNS
/// SANs.
pub fn generate_leaf(ca: &TestCert, common_name: &str, sans: &[&str]) -> TestCert {
    let key = new_key();
    let cert = build_cert(common_name, sans, &key, Some(ca), false);
    finish(cert, key)
}

/// Generate a self-signed leaf certificate that no test CA vouches for
pub fn generate_self_signed(common_name: &str, sans: &[&str]) -> TestCert {
    let key = new_key();
    let cert = build_cert(common_name, sans, &key, None, false);
    finish(cert, key)
}

/// Timestamp carried by fixture records
pub fn fixture_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2019, 3, 1, 12, 0, 0).unwrap()
}

/// Record without a key
pub fn message(topic: &str, partition: i32, offset: i64, value: &[u8]) -> ConsumedMessage {
    ConsumedMessage {
        topic: topic.to_string(),
        partition,
        offset,
        key: None,
        value: Bytes::copy_from_slice(value),
        timestamp: Some(fixture_time()),
    }
}

/// Record with a key
pub fn keyed_message(
    topic: &str,
    partition: i32,
    offset: i64,
    key: &[u8],
    value: &[u8],
) -> ConsumedMessage {
    ConsumedMessage {
        key: Some(Bytes::copy_from_slice(key)),
        ..message(topic, partition, offset, value)
    }
}

/// Valid configuration pointing at `sink_uri`
pub fn test_config(sink_uri: &str) -> AdapterConfig {
    AdapterConfig {
        topics: "orders".to_string(),
        sink_uri: sink_uri.to_string(),
        ..AdapterConfig::default()
    }
}

/// Sink that records every envelope and fails for selected event ids
#[derive(Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<EventEnvelope>>,
    fail_ids: HashSet<String>,
    attempts: AtomicUsize,
}

impl RecordingSink {
    /// Sink accepting every event
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink rejecting the events with the given ids
    pub fn failing_on(ids: &[&str]) -> Self {
        Self {
            fail_ids: ids.iter().map(|id| id.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Envelopes accepted so far, in delivery order
    pub fn delivered(&self) -> Vec<EventEnvelope> {
        self.delivered.lock().unwrap().clone()
    }

    /// Number of send attempts, successful or not
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for RecordingSink {
    async fn send(&self, envelope: &EventEnvelope) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_ids.contains(&envelope.id) {
            return Err(SinkError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        self.delivered.lock().unwrap().push(envelope.clone());
        Ok(())
    }
}

/// Sink that holds every delivery for a fixed delay and tracks overlap
pub struct SlowSink {
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    completed: Mutex<Vec<String>>,
}

impl SlowSink {
    /// Sink taking `delay` per delivery
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            completed: Mutex::new(Vec::new()),
        }
    }

    /// Most deliveries ever running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Ids of finished deliveries, in completion order
    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sink for SlowSink {
    async fn send(&self, envelope: &EventEnvelope) -> Result<(), SinkError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.lock().unwrap().push(envelope.id.clone());
        Ok(())
    }
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes
pub async fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Marker that records every marked position
#[derive(Default)]
pub struct RecordingMarker {
    marked: Mutex<Vec<(String, i32, i64)>>,
    fail: bool,
}

impl RecordingMarker {
    /// Marker accepting every offset
    pub fn new() -> Self {
        Self::default()
    }

    /// Marker rejecting every offset
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Positions marked so far
    pub fn marked(&self) -> Vec<(String, i32, i64)> {
        self.marked.lock().unwrap().clone()
    }
}

impl OffsetMarker for RecordingMarker {
    fn mark(&self, topic: &str, partition: i32, offset: i64) -> Result<(), KafkaError> {
        if self.fail {
            return Err(KafkaError::StoreOffset(RDKafkaErrorCode::UnknownPartition));
        }
        self.marked
            .lock()
            .unwrap()
            .push((topic.to_string(), partition, offset));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_leaf_chains_to_ca() {
        let ca = generate_ca("bridge-test-ca");
        let leaf = generate_leaf(&ca, "broker", &["broker.internal", "10.0.0.7"]);

        assert!(leaf.cert.verify(&ca.key).unwrap());
        assert!(leaf.cert_pem.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(leaf.key_pem.contains("PRIVATE KEY"));
    }

    #[test]
    fn test_self_signed_is_not_from_ca() {
        let ca = generate_ca("bridge-test-ca");
        let rogue = generate_self_signed("broker", &[]);
        assert!(!rogue.cert.verify(&ca.key).unwrap());
    }

    #[test]
    fn test_test_config_is_valid() {
        assert!(test_config("http://localhost:8080/").validate().is_ok());
    }
}
