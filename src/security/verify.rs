//! Broker certificate verification

use std::net::IpAddr;

use openssl::error::ErrorStack;
use openssl::nid::Nid;
use openssl::stack::Stack;
use openssl::x509::store::{X509Store, X509StoreBuilder};
use openssl::x509::{X509Ref, X509StoreContext, X509};
use thiserror::Error;

/// How a broker certificate chain is checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerificationStrategy {
    /// Chain must lead to a trusted CA; the leaf identity is not compared
    /// with the broker hostname
    #[default]
    ChainOnly,
    /// Chain must be trusted and the leaf must name the broker host
    ChainAndHostname,
}

impl VerificationStrategy {
    /// Strategy matching the `verify_hostname` configuration flag
    pub fn from_verify_hostname(verify_hostname: bool) -> Self {
        if verify_hostname {
            Self::ChainAndHostname
        } else {
            Self::ChainOnly
        }
    }

    /// Value of librdkafka's `ssl.endpoint.identification.algorithm`
    pub fn endpoint_identification_algorithm(&self) -> &'static str {
        match self {
            Self::ChainOnly => "none",
            Self::ChainAndHostname => "https",
        }
    }
}

/// Reasons a presented chain is rejected
#[derive(Error, Debug)]
pub enum VerificationError {
    /// The peer presented no certificates
    #[error("peer presented no certificates")]
    EmptyChain,

    /// A presented certificate is not valid DER
    #[error("failed to parse peer certificate: {0}")]
    Parse(#[source] ErrorStack),

    /// The chain does not lead to a trusted CA
    #[error("certificate chain not trusted: {0}")]
    Untrusted(String),

    /// The leaf certificate does not name the expected host
    #[error("certificate is not valid for host {0}")]
    HostnameMismatch(String),

    /// OpenSSL failed while setting up verification
    #[error("verification setup failed: {0}")]
    Internal(#[source] ErrorStack),
}

/// Applies a [`VerificationStrategy`] against a fixed CA pool
pub struct CertificateVerifier {
    store: X509Store,
    strategy: VerificationStrategy,
}

impl CertificateVerifier {
    /// Create a verifier trusting exactly `ca_pool`
    ///
    /// # Errors
    ///
    /// Returns `VerificationError::Internal` if the store cannot be built
    pub fn new(ca_pool: &[X509], strategy: VerificationStrategy) -> Result<Self, VerificationError> {
        let mut builder = X509StoreBuilder::new().map_err(VerificationError::Internal)?;
        for cert in ca_pool {
            builder
                .add_cert(cert.clone())
                .map_err(VerificationError::Internal)?;
        }

        Ok(Self {
            store: builder.build(),
            strategy,
        })
    }

    /// Strategy enforced by this verifier
    pub fn strategy(&self) -> VerificationStrategy {
        self.strategy
    }

    /// Verify a broker chain presented during the handshake
    ///
    /// # Arguments
    ///
    /// * `chain_der` - Leaf certificate first, then any intermediates, DER encoded
    /// * `server_name` - Host the client connected to
    ///
    /// # Errors
    ///
    /// Returns `VerificationError` if any certificate fails to parse, the chain
    /// is not trusted at the current time, or the strategy requires a hostname
    /// match and the leaf does not name `server_name`
    pub fn verify_peer(
        &self,
        chain_der: &[Vec<u8>],
        server_name: &str,
    ) -> Result<(), VerificationError> {
        let (leaf_der, rest) = chain_der.split_first().ok_or(VerificationError::EmptyChain)?;
        let leaf = X509::from_der(leaf_der).map_err(VerificationError::Parse)?;

        let mut intermediates = Stack::new().map_err(VerificationError::Internal)?;
        for der in rest {
            let cert = X509::from_der(der).map_err(VerificationError::Parse)?;
            intermediates
                .push(cert)
                .map_err(VerificationError::Internal)?;
        }

        let mut context = X509StoreContext::new().map_err(VerificationError::Internal)?;
        let (trusted, result) = context
            .init(&self.store, &leaf, &intermediates, |ctx| {
                Ok((ctx.verify_cert()?, ctx.error()))
            })
            .map_err(VerificationError::Internal)?;

        if !trusted {
            return Err(VerificationError::Untrusted(result.error_string().to_string()));
        }

        match self.strategy {
            VerificationStrategy::ChainOnly => Ok(()),
            VerificationStrategy::ChainAndHostname => {
                if matches_host(&leaf, server_name) {
                    Ok(())
                } else {
                    Err(VerificationError::HostnameMismatch(server_name.to_string()))
                }
            }
        }
    }
}

fn matches_host(cert: &X509Ref, host: &str) -> bool {
    let ip = host.parse::<IpAddr>().ok();

    if let Some(names) = cert.subject_alt_names() {
        let mut saw_dns = false;
        for name in &names {
            if let Some(dns) = name.dnsname() {
                saw_dns = true;
                if ip.is_none() && dns_matches(dns, host) {
                    return true;
                }
            }
            if let (Some(ip), Some(raw)) = (ip, name.ipaddress()) {
                let matched = match ip {
                    IpAddr::V4(v4) => raw == v4.octets().as_slice(),
                    IpAddr::V6(v6) => raw == v6.octets().as_slice(),
                };
                if matched {
                    return true;
                }
            }
        }
        if saw_dns || ip.is_some() {
            return false;
        }
    }

    cert.subject_name()
        .entries_by_nid(Nid::COMMONNAME)
        .filter_map(|entry| entry.data().to_string().ok())
        .any(|cn| dns_matches(&cn, host))
}

fn dns_matches(pattern: &str, host: &str) -> bool {
    let pattern = pattern.trim_end_matches('.').to_ascii_lowercase();
    let host = host.trim_end_matches('.').to_ascii_lowercase();

    match pattern.strip_prefix("*.") {
        Some(suffix) => match host.split_once('.') {
            Some((label, rest)) => !label.is_empty() && rest == suffix,
            None => false,
        },
        None => pattern == host,
    }
}
