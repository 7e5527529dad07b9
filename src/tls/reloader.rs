//! Certificate hot-reload.
//!
//! [`KeypairReloader`] holds the active [`CertificateMaterial`] and hands it
//! to rustls on every handshake. A background loop ([`KeypairReloader::run`])
//! watches the leaf's expiry and re-reads the same two files once fewer than
//! [`ReloadSchedule::RELOAD_THRESHOLD`] remain. Rotation is done by
//! overwriting the files in place.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use rustls::ServerConfig;
use rustls::crypto::aws_lc_rs;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::keypair::CertificateMaterial;
use crate::metrics;
use crate::{Error, Result};

/// Expiry-driven reload timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadSchedule;

impl ReloadSchedule {
    /// Reload once the leaf expires in less than this
    pub const RELOAD_THRESHOLD: Duration = Duration::from_secs(600);

    /// Poll interval while close to expiry
    pub const NEAR_EXPIRY_INTERVAL: Duration = Duration::from_secs(10);

    /// Whether a reload is due with `expires_in_secs` left
    #[must_use]
    pub fn needs_reload(expires_in_secs: i64) -> bool {
        expires_in_secs < Self::threshold_secs()
    }

    /// Wait before the next check: half the remaining time, or
    /// [`Self::NEAR_EXPIRY_INTERVAL`] inside the threshold.
    #[must_use]
    pub fn next_wait(expires_in_secs: i64) -> Duration {
        if expires_in_secs > Self::threshold_secs() {
            Duration::from_secs(expires_in_secs.unsigned_abs() / 2)
        } else {
            Self::NEAR_EXPIRY_INTERVAL
        }
    }

    #[allow(clippy::cast_possible_wrap)]
    fn threshold_secs() -> i64 {
        Self::RELOAD_THRESHOLD.as_secs() as i64
    }
}

/// Time source for the reload loop
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current unix time in seconds
    fn now_unix(&self) -> i64;

    /// Sleep for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Wall clock + tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Result of one reload attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// New material is active
    Reloaded,
    /// Files still hold the active leaf; nothing swapped
    Unchanged,
    /// Files could not be loaded; previous material kept
    Failed(String),
}

impl ReloadOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Reloaded => "reloaded",
            Self::Unchanged => "unchanged",
            Self::Failed(_) => "failed",
        }
    }
}

/// Owns the active serving certificate
pub struct KeypairReloader {
    cert_path: PathBuf,
    key_path: PathBuf,
    active: RwLock<Arc<CertificateMaterial>>,
}

impl KeypairReloader {
    /// Load the initial pair. Failure here is fatal to startup.
    pub fn load(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Result<Self> {
        let cert_path = cert_path.into();
        let key_path = key_path.into();
        let material = CertificateMaterial::load(&cert_path, &key_path)?;

        info!(
            cert = %cert_path.display(),
            key = %key_path.display(),
            subject = material.subject(),
            expires_at = ?material.expires_at(),
            "Loaded serving certificate"
        );
        metrics::set_certificate_expiry(material.expires_in(chrono::Utc::now().timestamp()));

        Ok(Self {
            cert_path,
            key_path,
            active: RwLock::new(Arc::new(material)),
        })
    }

    /// Active material. The read lock is held only for the `Arc` clone.
    #[must_use]
    pub fn current(&self) -> Arc<CertificateMaterial> {
        Arc::clone(&self.active.read())
    }

    /// Re-read both files and swap in the result if it carries a new leaf.
    pub fn reload(&self) -> ReloadOutcome {
        let outcome = match CertificateMaterial::load(&self.cert_path, &self.key_path) {
            Ok(fresh) => {
                let mut active = self.active.write();
                if active.same_leaf(&fresh) {
                    ReloadOutcome::Unchanged
                } else {
                    *active = Arc::new(fresh);
                    ReloadOutcome::Reloaded
                }
            }
            Err(e) => ReloadOutcome::Failed(e.to_string()),
        };

        let current = self.current();
        match &outcome {
            ReloadOutcome::Reloaded => info!(
                cert = %self.cert_path.display(),
                subject = current.subject(),
                expires_at = ?current.expires_at(),
                "Reloaded serving certificate"
            ),
            ReloadOutcome::Unchanged => warn!(
                cert = %self.cert_path.display(),
                expires_at = ?current.expires_at(),
                "Certificate files not rotated, keeping current certificate"
            ),
            ReloadOutcome::Failed(reason) => error!(
                cert = %self.cert_path.display(),
                key = %self.key_path.display(),
                error = %reason,
                "Certificate reload failed, keeping current certificate"
            ),
        }
        metrics::record_certificate_reload(outcome.as_str());
        outcome
    }

    /// One check step at `now` (unix seconds). Returns the reload outcome,
    /// if one was attempted, and the wait before the next check.
    pub fn check_once(&self, now: i64) -> (Option<ReloadOutcome>, Duration) {
        let expires_in = self.current().expires_in(now);
        metrics::set_certificate_expiry(expires_in);

        let outcome = if ReloadSchedule::needs_reload(expires_in) {
            info!(expires_in_secs = expires_in, "Serving certificate near expiry, reloading");
            Some(self.reload())
        } else {
            None
        };

        let wait = ReloadSchedule::next_wait(expires_in);
        debug!(expires_in_secs = expires_in, wait = ?wait, "Next certificate check scheduled");
        (outcome, wait)
    }

    /// Check loop; returns when `shutdown` fires.
    pub async fn run(self: Arc<Self>, clock: Arc<dyn Clock>, mut shutdown: broadcast::Receiver<()>) {
        info!(cert = %self.cert_path.display(), "Certificate reloader started");
        loop {
            let (_, wait) = self.check_once(clock.now_unix());
            tokio::select! {
                () = clock.sleep(wait) => {}
                _ = shutdown.recv() => {
                    info!("Certificate reloader stopped");
                    return;
                }
            }
        }
    }

    /// TLS 1.3 server config resolving the certificate per handshake, so a
    /// reload applies to new connections without a restart.
    pub fn server_config(self: &Arc<Self>) -> Result<ServerConfig> {
        let mut config = ServerConfig::builder_with_provider(Arc::new(aws_lc_rs::default_provider()))
            .with_protocol_versions(&[&rustls::version::TLS13])
            .map_err(|e| Error::Tls(format!("TLS config error: {e}")))?
            .with_no_client_auth()
            .with_cert_resolver(Arc::clone(self) as Arc<dyn ResolvesServerCert>);

        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
        Ok(config)
    }
}

impl ResolvesServerCert for KeypairReloader {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(self.current().certified_key())
    }
}

impl fmt::Debug for KeypairReloader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeypairReloader")
            .field("cert_path", &self.cert_path)
            .field("key_path", &self.key_path)
            .finish_non_exhaustive()
    }
}
