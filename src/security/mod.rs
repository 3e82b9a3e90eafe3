//! TLS material for the broker connection
//!
//! [`SecurityContext`] turns the PEM text from the configuration into a parsed
//! client identity and CA pool, then hands it to librdkafka. Live connections
//! are verified by librdkafka from those properties. The same material backs a
//! [`CertificateVerifier`] that applies the configured [`VerificationStrategy`]
//! to a broker chain in process, which is how the policy is checked outside a
//! handshake.
//!
//! # Example
//!
//! ```no_run
//! use kafka_bridge::security::{SecurityContext, VerificationStrategy};
//! use rdkafka::ClientConfig;
//!
//! # fn pems() -> (String, String, String) { unimplemented!() }
//! let (cert, key, ca) = pems();
//! let context = SecurityContext::build(&cert, &key, &ca, VerificationStrategy::ChainOnly)?;
//!
//! let mut client = ClientConfig::new();
//! context.apply(&mut client)?;
//! # Ok::<(), kafka_bridge::security::CertificateError>(())
//! ```

mod verify;

pub use verify::{CertificateVerifier, VerificationError, VerificationStrategy};

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::BasicConstraints;
use openssl::x509::{X509Builder, X509NameBuilder, X509};
use rdkafka::ClientConfig;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised while loading the client identity
#[derive(Error, Debug)]
pub enum CertificateError {
    /// The certificate PEM contained no certificate block
    #[error("no certificate found in client certificate PEM")]
    NoCertificate,

    /// The certificate PEM could not be parsed
    #[error("invalid client certificate: {0}")]
    InvalidCertificate(#[source] ErrorStack),

    /// The private key PEM could not be parsed
    #[error("invalid client private key: {0}")]
    InvalidKey(#[source] ErrorStack),

    /// The private key does not belong to the leaf certificate
    #[error("client private key does not match client certificate")]
    KeyMismatch,

    /// Parsed material could not be re-encoded for the Kafka client
    #[error("failed to encode TLS material: {0}")]
    Encode(#[source] ErrorStack),

    /// The placeholder trust anchor for an empty CA pool could not be created
    #[error("failed to create placeholder trust anchor: {0}")]
    TrustAnchor(#[source] ErrorStack),
}

/// Parsed TLS material, built once at startup and never mutated
pub struct SecurityContext {
    client_chain: Vec<X509>,
    private_key: PKey<Private>,
    ca_pool: Vec<X509>,
    strategy: VerificationStrategy,
}

impl std::fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityContext")
            .field("client_chain_len", &self.client_chain.len())
            .field("ca_pool_len", &self.ca_pool.len())
            .field("strategy", &self.strategy)
            .finish()
    }
}

impl SecurityContext {
    /// Build the security context from PEM text
    ///
    /// # Arguments
    ///
    /// * `cert_pem` - Client certificate, optionally followed by intermediates
    /// * `key_pem` - Private key of the leaf certificate
    /// * `ca_pem` - CA certificates trusted for the broker chain
    /// * `strategy` - How broker certificates are verified
    ///
    /// # Errors
    ///
    /// Returns `CertificateError` if the certificate or key does not parse or
    /// if the key does not belong to the leaf. A CA text that does not parse
    /// is not an error: the pool is left empty and every broker chain will
    /// then fail verification.
    pub fn build(
        cert_pem: &str,
        key_pem: &str,
        ca_pem: &str,
        strategy: VerificationStrategy,
    ) -> Result<Self, CertificateError> {
        let client_chain = X509::stack_from_pem(cert_pem.as_bytes())
            .map_err(CertificateError::InvalidCertificate)?;
        let leaf = client_chain.first().ok_or(CertificateError::NoCertificate)?;

        let private_key = PKey::private_key_from_pem(key_pem.as_bytes())
            .map_err(CertificateError::InvalidKey)?;

        let leaf_key = leaf
            .public_key()
            .map_err(CertificateError::InvalidCertificate)?;
        if !leaf_key.public_eq(&*private_key) {
            return Err(CertificateError::KeyMismatch);
        }

        let ca_pool = parse_ca_pool(ca_pem);

        debug!(
            chain_len = client_chain.len(),
            ca_certs = ca_pool.len(),
            strategy = ?strategy,
            "Loaded client TLS material"
        );

        Ok(Self {
            client_chain,
            private_key,
            ca_pool,
            strategy,
        })
    }

    /// Verification strategy selected at build time
    pub fn strategy(&self) -> VerificationStrategy {
        self.strategy
    }

    /// Number of certificates in the CA pool
    pub fn ca_pool_len(&self) -> usize {
        self.ca_pool.len()
    }

    /// Verifier enforcing this context's CA pool and strategy
    ///
    /// # Errors
    ///
    /// Returns `VerificationError::Internal` if the certificate store cannot
    /// be allocated
    pub fn verifier(&self) -> Result<CertificateVerifier, VerificationError> {
        CertificateVerifier::new(&self.ca_pool, self.strategy)
    }

    /// Hand the TLS material to a Kafka client configuration
    ///
    /// Sets the client certificate, key and trusted CAs. Certificate
    /// verification and endpoint identification are part of the base client
    /// settings.
    ///
    /// librdkafka falls back to its default trust store when no CA is given,
    /// so an empty pool is replaced by a freshly generated CA whose key is
    /// discarded. No broker chain can lead to it.
    ///
    /// # Errors
    ///
    /// Returns `CertificateError::Encode` if re-encoding the parsed material
    /// fails, or `CertificateError::TrustAnchor` if the placeholder CA cannot
    /// be generated
    pub fn apply(&self, client: &mut ClientConfig) -> Result<(), CertificateError> {
        let chain_pem = encode_chain(&self.client_chain)?;
        let key_pem = self
            .private_key
            .private_key_to_pem_pkcs8()
            .map_err(CertificateError::Encode)?;

        let ca_pem = if self.ca_pool.is_empty() {
            warn!("CA pool is empty; broker certificates will be rejected");
            let anchor = unusable_trust_anchor().map_err(CertificateError::TrustAnchor)?;
            encode_chain(&[anchor])?
        } else {
            encode_chain(&self.ca_pool)?
        };

        client
            .set("ssl.certificate.pem", String::from_utf8_lossy(&chain_pem))
            .set("ssl.key.pem", String::from_utf8_lossy(&key_pem))
            .set("ssl.ca.pem", String::from_utf8_lossy(&ca_pem));

        Ok(())
    }
}

/// Self-signed CA whose private key is dropped on return
fn unusable_trust_anchor() -> Result<X509, ErrorStack> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
    let key = PKey::from_ec_key(EcKey::generate(&group)?)?;

    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_nid(Nid::COMMONNAME, "kafka-bridge empty trust set")?;
    let name = name.build();

    let mut serial = BigNum::new()?;
    serial.rand(64, MsbOption::MAYBE_ZERO, false)?;

    let mut builder = X509Builder::new()?;
    builder.set_version(2)?;
    builder.set_serial_number(&*serial.to_asn1_integer()?)?;
    builder.set_subject_name(&name)?;
    builder.set_issuer_name(&name)?;
    builder.set_pubkey(&key)?;
    builder.set_not_before(&*Asn1Time::days_from_now(0)?)?;
    builder.set_not_after(&*Asn1Time::days_from_now(1)?)?;
    builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
    builder.sign(&key, MessageDigest::sha256())?;
    Ok(builder.build())
}

fn parse_ca_pool(ca_pem: &str) -> Vec<X509> {
    if ca_pem.trim().is_empty() {
        warn!("No CA certificate configured; broker chains cannot be verified");
        return Vec::new();
    }

    match X509::stack_from_pem(ca_pem.as_bytes()) {
        Ok(certs) if certs.is_empty() => {
            warn!("CA certificate PEM contained no certificates");
            certs
        }
        Ok(certs) => certs,
        Err(e) => {
            warn!(error = %e, "Failed to parse CA certificate PEM");
            Vec::new()
        }
    }
}

fn encode_chain(certs: &[X509]) -> Result<Vec<u8>, CertificateError> {
    let mut pem = Vec::new();
    for cert in certs {
        pem.extend(cert.to_pem().map_err(CertificateError::Encode)?);
    }
    Ok(pem)
}
