//! Serving certificate material - PEM loading and expiry parsing.
//!
//! Both files are expected in **PEM format**. The leaf is the first
//! certificate in the chain file; its `notAfter` drives the reload schedule.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rustls::crypto::aws_lc_rs;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::{Error, Result};

/// Load all certificates from a PEM file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or contains no certificate.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let pem_data = read_file(path)?;
    let certs = CertificateDer::pem_slice_iter(&pem_data)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("Failed to parse certs from '{}': {e}", path.display())))?;

    if certs.is_empty() {
        return Err(Error::Tls(format!("No certificates found in '{}'", path.display())));
    }

    Ok(certs)
}

/// Load the first private key (PKCS#8, PKCS#1 or SEC1) from a PEM file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or holds no private key.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let pem_data = read_file(path)?;
    PrivateKeyDer::from_pem_slice(&pem_data)
        .map_err(|e| Error::Tls(format!("Failed to parse private key from '{}': {e}", path.display())))
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::Tls(format!("Cannot read '{}': {e}", path.display())))
}

/// A loaded key pair with the paths it came from and its leaf expiry
pub struct CertificateMaterial {
    certified_key: Arc<CertifiedKey>,
    cert_path: PathBuf,
    key_path: PathBuf,
    not_after: i64,
    subject: String,
}

impl CertificateMaterial {
    /// Read and parse the pair at `cert_path` / `key_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if either file is unreadable, the key does not match
    /// the leaf, or the leaf cannot be parsed as X.509.
    pub fn load(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Result<Self> {
        let cert_path = cert_path.into();
        let key_path = key_path.into();

        let chain = load_certs(&cert_path)?;
        let key = load_private_key(&key_path)?;

        let (not_after, subject) = {
            let (_, leaf) = X509Certificate::from_der(chain[0].as_ref()).map_err(|e| {
                Error::Tls(format!("Failed to parse leaf certificate '{}': {e}", cert_path.display()))
            })?;
            (leaf.validity().not_after.timestamp(), leaf.subject().to_string())
        };

        let signing_key = aws_lc_rs::default_provider()
            .key_provider
            .load_private_key(key)
            .map_err(|e| Error::Tls(format!("Unsupported private key in '{}': {e}", key_path.display())))?;

        let certified_key = CertifiedKey::new(chain, signing_key);
        match certified_key.keys_match() {
            Ok(()) | Err(rustls::Error::InconsistentKeys(rustls::InconsistentKeys::Unknown)) => {}
            Err(e) => {
                return Err(Error::Tls(format!(
                    "Private key '{}' does not match certificate '{}': {e}",
                    key_path.display(),
                    cert_path.display()
                )));
            }
        }

        Ok(Self {
            certified_key: Arc::new(certified_key),
            cert_path,
            key_path,
            not_after,
            subject,
        })
    }

    /// Key handed to the TLS stack
    #[must_use]
    pub fn certified_key(&self) -> Arc<CertifiedKey> {
        Arc::clone(&self.certified_key)
    }

    /// Leaf certificate DER
    #[must_use]
    pub fn leaf(&self) -> &[u8] {
        self.certified_key.cert[0].as_ref()
    }

    /// Whether `other` carries the same leaf certificate
    #[must_use]
    pub fn same_leaf(&self, other: &Self) -> bool {
        self.leaf() == other.leaf()
    }

    /// Leaf `notAfter` in unix seconds
    #[must_use]
    pub fn not_after(&self) -> i64 {
        self.not_after
    }

    /// Leaf `notAfter` as a timestamp, for logs
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.not_after, 0)
    }

    /// Seconds from `now` (unix seconds) until expiry; negative once expired
    #[must_use]
    pub fn expires_in(&self, now: i64) -> i64 {
        self.not_after.saturating_sub(now)
    }

    /// Leaf subject DN
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Certificate chain path
    #[must_use]
    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }

    /// Private key path
    #[must_use]
    pub fn key_path(&self) -> &Path {
        &self.key_path
    }
}

// Key material stays out of logs.
impl fmt::Debug for CertificateMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateMaterial")
            .field("cert_path", &self.cert_path)
            .field("key_path", &self.key_path)
            .field("subject", &self.subject)
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}
