//! Certificate lease: the chain/key pair written by the CA client
//!
//! The lease is never cached. Every consumer calls [`CertificateLease::load`]
//! and gets whatever is on disk at that moment.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rustls::{Certificate, PrivateKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Fixed, well-known locations of the lease material
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeasePaths {
    pub fullchain: PathBuf,
    pub privkey: PathBuf,
}

impl LeasePaths {
    pub fn new(fullchain: impl Into<PathBuf>, privkey: impl Into<PathBuf>) -> Self {
        Self {
            fullchain: fullchain.into(),
            privkey: privkey.into(),
        }
    }

    /// Directory holding the chain file
    pub fn directory(&self) -> Option<&Path> {
        self.fullchain.parent()
    }
}

/// A certificate lease as currently present on disk
#[derive(Debug, Clone)]
pub struct CertificateLease {
    /// Full chain, leaf first
    pub chain: Vec<Certificate>,
    pub key: PrivateKey,
    /// notBefore of the leaf
    pub issued_at: DateTime<Utc>,
    /// notAfter of the leaf
    pub expires_at: DateTime<Utc>,
    /// DNS names of the leaf (CN and SANs)
    pub domains: Vec<String>,
    /// SHA-256 of the leaf DER, hex encoded
    pub fingerprint: String,
    pub paths: LeasePaths,
}

impl CertificateLease {
    /// Read and parse the lease from its canonical paths
    pub async fn load(paths: &LeasePaths) -> Result<Self> {
        let chain_pem = tokio::fs::read_to_string(&paths.fullchain)
            .await
            .with_context(|| format!("Failed to read certificate chain: {}", paths.fullchain.display()))?;

        let key_pem = tokio::fs::read_to_string(&paths.privkey)
            .await
            .with_context(|| format!("Failed to read private key: {}", paths.privkey.display()))?;

        let chain = Self::parse_chain(&chain_pem).context("Failed to parse certificate chain")?;
        let key = Self::parse_private_key(&key_pem).context("Failed to parse private key")?;

        let leaf = &chain[0];
        let (issued_at, expires_at, domains) =
            Self::extract_cert_info(leaf).context("Failed to extract certificate info")?;

        Ok(Self {
            fingerprint: fingerprint(leaf),
            chain,
            key,
            issued_at,
            expires_at,
            domains,
            paths: paths.clone(),
        })
    }

    /// Fingerprint of the leaf on disk, `None` when no lease has been issued yet
    pub async fn current_fingerprint(paths: &LeasePaths) -> Option<String> {
        match Self::load(paths).await {
            Ok(lease) => Some(lease.fingerprint),
            Err(e) => {
                tracing::debug!("No readable lease at {}: {:#}", paths.fullchain.display(), e);
                None
            }
        }
    }

    /// Parse every certificate of a PEM chain
    pub fn parse_chain(pem: &str) -> Result<Vec<Certificate>> {
        let mut reader = BufReader::new(pem.as_bytes());
        let items = rustls_pemfile::certs(&mut reader)
            .map_err(|e| anyhow::anyhow!("Failed to parse PEM certificate: {}", e))?;

        if items.is_empty() {
            anyhow::bail!("No certificates found in PEM data");
        }

        Ok(items.into_iter().map(Certificate).collect())
    }

    /// Parse a PEM-encoded private key (RSA, PKCS8 or SEC1 EC)
    pub fn parse_private_key(pem: &str) -> Result<PrivateKey> {
        use rustls_pemfile::{ec_private_keys, pkcs8_private_keys, rsa_private_keys};

        let mut reader = BufReader::new(pem.as_bytes());
        let rsa_keys = rsa_private_keys(&mut reader)
            .map_err(|e| anyhow::anyhow!("Failed to parse RSA key: {}", e))?;
        if let Some(key) = rsa_keys.into_iter().next() {
            return Ok(PrivateKey(key));
        }

        let mut reader = BufReader::new(pem.as_bytes());
        let pkcs8_keys = pkcs8_private_keys(&mut reader)
            .map_err(|e| anyhow::anyhow!("Failed to parse PKCS8 key: {}", e))?;
        if let Some(key) = pkcs8_keys.into_iter().next() {
            return Ok(PrivateKey(key));
        }

        let mut reader = BufReader::new(pem.as_bytes());
        let ec_keys = ec_private_keys(&mut reader)
            .map_err(|e| anyhow::anyhow!("Failed to parse ECDSA key: {}", e))?;
        if let Some(key) = ec_keys.into_iter().next() {
            return Ok(PrivateKey(key));
        }

        anyhow::bail!("Failed to parse private key (tried RSA, PKCS8, ECDSA)");
    }

    /// Extract validity window and DNS names from a certificate
    pub fn extract_cert_info(
        cert: &Certificate,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>, Vec<String>)> {
        use x509_parser::extensions::{GeneralName, ParsedExtension};
        use x509_parser::parse_x509_certificate;

        let (_, x509) = parse_x509_certificate(&cert.0)
            .map_err(|e| anyhow::anyhow!("Failed to parse X.509 certificate: {}", e))?;

        let issued_at = asn1_to_utc(&x509.validity().not_before)?;
        let expires_at = asn1_to_utc(&x509.validity().not_after)?;

        let mut domains = Vec::new();

        if let Some(cn) = x509.subject().iter_common_name().next() {
            if let Ok(cn_str) = cn.as_str() {
                domains.push(cn_str.to_string());
            }
        }

        for ext in x509.extensions() {
            if let ParsedExtension::SubjectAlternativeName(san) = ext.parsed_extension() {
                for name in &san.general_names {
                    if let GeneralName::DNSName(dns) = name {
                        domains.push(dns.to_string());
                    }
                }
            }
        }

        domains.sort();
        domains.dedup();

        Ok((issued_at, expires_at, domains))
    }

    pub fn days_until_expiry(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_days()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// True once `now` is inside the renewal window before expiry
    pub fn needs_renewal(&self, now: DateTime<Utc>, days_before_expiry: i64) -> bool {
        self.expires_at < now + Duration::days(days_before_expiry)
    }

    pub fn covers(&self, domain: &str) -> bool {
        self.domains.iter().any(|d| d.eq_ignore_ascii_case(domain))
    }

    /// Length of the validity window, rounded to the nearest day
    ///
    /// CAs commonly end the window one second early (notAfter is inclusive),
    /// so a 90-day lease spans 90d - 1s.
    pub fn validity_days(&self) -> i64 {
        const DAY: i64 = 24 * 60 * 60;
        ((self.expires_at - self.issued_at).num_seconds() + DAY / 2).div_euclid(DAY)
    }

    pub fn status(&self, now: DateTime<Utc>, renewal_days_before_expiry: i64) -> LeaseStatus {
        LeaseStatus {
            domains: self.domains.clone(),
            issued_at: self.issued_at,
            expires_at: self.expires_at,
            days_until_expiration: self.days_until_expiry(now),
            needs_renewal: self.needs_renewal(now, renewal_days_before_expiry),
            fingerprint: self.fingerprint.clone(),
            chain_length: self.chain.len(),
            fullchain_path: self.paths.fullchain.display().to_string(),
            privkey_path: self.paths.privkey.display().to_string(),
        }
    }
}

/// Lease summary for the API and the `status` command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseStatus {
    pub domains: Vec<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub days_until_expiration: i64,
    pub needs_renewal: bool,
    pub fingerprint: String,
    pub chain_length: usize,
    pub fullchain_path: String,
    pub privkey_path: String,
}

/// Hex SHA-256 of a DER certificate
pub fn fingerprint(cert: &Certificate) -> String {
    format!("{:x}", Sha256::digest(&cert.0))
}

fn asn1_to_utc(time: &x509_parser::time::ASN1Time) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(time.timestamp(), 0)
        .single()
        .ok_or_else(|| anyhow::anyhow!("Failed to convert ASN.1 time to DateTime"))
}
