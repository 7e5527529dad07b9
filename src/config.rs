//! Configuration management

use std::{path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Namespace annotation keys used for routing
    pub routing: RoutingConfig,
    /// Outbound calls (namespace reads, decision services)
    pub forward: ForwardConfig,
    /// Serving certificate
    pub tls: TlsConfig,
}

impl Config {
    /// Load configuration from defaults, an optional YAML file and the
    /// environment (`ADMISSION_GATEWAY_` prefix, `__` for nesting).
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("ADMISSION_GATEWAY_").split("__"));

        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        let routing = &self.routing;
        if routing.mutation_annotation.trim().is_empty() || routing.validation_annotation.trim().is_empty() {
            return Err(Error::Config("routing annotation keys must not be empty".to_string()));
        }
        if routing.mutation_annotation == routing.validation_annotation {
            return Err(Error::Config(format!(
                "mutation and validation annotation keys must differ (both '{}')",
                routing.mutation_annotation
            )));
        }

        if self.server.read_timeout.is_zero() {
            return Err(Error::Config("server.read_timeout must be non-zero".to_string()));
        }

        let fwd = &self.forward;
        if fwd.timeout.is_zero() || fwd.namespace_timeout.is_zero() {
            return Err(Error::Config("outbound timeouts must be non-zero".to_string()));
        }
        if fwd.review_timeout <= fwd.timeout {
            return Err(Error::Config(format!(
                "forward.review_timeout ({:?}) must exceed forward.timeout ({:?})",
                fwd.review_timeout, fwd.timeout
            )));
        }
        if fwd.review_timeout >= self.server.request_timeout {
            return Err(Error::Config(format!(
                "forward.review_timeout ({:?}) must be below server.request_timeout ({:?})",
                fwd.review_timeout, self.server.request_timeout
            )));
        }

        if self.tls.enabled && self.tls.key_pair_paths().is_none() {
            return Err(Error::Config(
                "tls.enabled requires tls.cert_dir or both tls.cert_path and tls.key_path".to_string(),
            ));
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Reported on `GET /` (`debug` or `release`)
    pub mode: String,
    /// Time allowed to receive a request body
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    /// Per-request timeout on the inbound side, response included
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
    /// Prometheus listener port (feature `metrics`)
    pub metrics_port: Option<u16>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8070,
            mode: "release".to_string(),
            read_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(10),
            max_body_size: 4 * 1024 * 1024, // 4MB
            metrics_port: Some(2112),
        }
    }
}

/// Annotation keys looked up on the admitted object's namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Annotation holding the mutation endpoint URL
    pub mutation_annotation: String,
    /// Annotation holding the validation endpoint URL
    pub validation_annotation: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            mutation_annotation: "mutation.amp.txn2.com/ep".to_string(),
            validation_annotation: "validation.amp.txn2.com/ep".to_string(),
        }
    }
}

/// Outbound call settings.
///
/// `review_timeout` bounds a whole review and has to stay under the API
/// server's webhook timeout (10s by default).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardConfig {
    /// Total timeout for one decision service call
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// TCP connect timeout for decision services
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Timeout for the namespace read
    #[serde(with = "humantime_serde")]
    pub namespace_timeout: Duration,
    /// Deadline for resolve + forward
    #[serde(with = "humantime_serde")]
    pub review_timeout: Duration,
    /// Idle connections kept per decision service
    pub max_idle_per_host: usize,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
            namespace_timeout: Duration::from_secs(2),
            review_timeout: Duration::from_secs(8),
            max_idle_per_host: 10,
        }
    }
}

/// Serving certificate configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Serve HTTPS
    pub enabled: bool,
    /// Directory holding `cert.pem` and `key.pem`
    pub cert_dir: Option<String>,
    /// Certificate chain (PEM); overrides `cert_dir`
    pub cert_path: Option<String>,
    /// Private key (PEM); overrides `cert_dir`
    pub key_path: Option<String>,
}

impl TlsConfig {
    /// Resolved `(cert, key)` paths, if enough is configured
    #[must_use]
    pub fn key_pair_paths(&self) -> Option<(String, String)> {
        let from_dir = |file: &str| {
            self.cert_dir
                .as_deref()
                .map(|dir| Path::new(dir).join(file).to_string_lossy().into_owned())
        };
        let cert = self.cert_path.clone().or_else(|| from_dir("cert.pem"))?;
        let key = self.key_path.clone().or_else(|| from_dir("key.pem"))?;
        Some((cert, key))
    }
}

/// Human-readable serde for `Duration` ("30s", "5m", "250ms")
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to a human-readable string
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize a duration string ("30s", "5m", "100ms", bare seconds)
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse(s: &str) -> Result<Duration, std::num::ParseIntError> {
        let s = s.trim();
        // "ms" first: "100ms" also ends in 's'
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>().map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>().map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>().map(|m| Duration::from_secs(m * 60))
        } else {
            s.parse::<u64>().map(Duration::from_secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.server.port, 8070);
        assert_eq!(config.routing.mutation_annotation, "mutation.amp.txn2.com/ep");
        assert_eq!(config.routing.validation_annotation, "validation.amp.txn2.com/ep");
    }

    #[test]
    fn yaml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.yaml");
        std::fs::write(
            &path,
            r#"
server:
  port: 9443
routing:
  mutation_annotation: "mutation.x/ep"
forward:
  timeout: "1500ms"
  review_timeout: "3s"
tls:
  enabled: true
  cert_dir: "/etc/certs"
"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.server.port, 9443);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.routing.mutation_annotation, "mutation.x/ep");
        assert_eq!(config.routing.validation_annotation, "validation.amp.txn2.com/ep");
        assert_eq!(config.forward.timeout, Duration::from_millis(1500));
        assert_eq!(config.forward.review_timeout, Duration::from_secs(3));
        config.validate().unwrap();
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/gateway.yaml"))).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn cert_dir_expands_to_cert_and_key_pem() {
        let tls = TlsConfig {
            enabled: true,
            cert_dir: Some("/etc/certs".to_string()),
            ..TlsConfig::default()
        };
        assert_eq!(
            tls.key_pair_paths(),
            Some(("/etc/certs/cert.pem".to_string(), "/etc/certs/key.pem".to_string()))
        );

        let explicit = TlsConfig {
            cert_path: Some("/a/tls.crt".to_string()),
            ..tls
        };
        assert_eq!(explicit.key_pair_paths().unwrap().0, "/a/tls.crt");
    }

    #[test]
    fn validate_rejects_bad_combinations() {
        let mut config = Config::default();
        config.routing.validation_annotation = config.routing.mutation_annotation.clone();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.forward.review_timeout = config.forward.timeout;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.forward.review_timeout = Duration::from_secs(30);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.tls.enabled = true;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.read_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn duration_parsing() {
        assert_eq!(humantime_serde::parse("100ms").unwrap(), Duration::from_millis(100));
        assert_eq!(humantime_serde::parse("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(humantime_serde::parse("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(humantime_serde::parse("7").unwrap(), Duration::from_secs(7));
        assert!(humantime_serde::parse("soon").is_err());
    }
}
