//! Command-line interface

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::config::Config;

/// Kubernetes admission gateway - routes reviews to per-namespace decision services
#[derive(Parser, Debug)]
#[command(name = "admission-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "ADMISSION_GATEWAY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Server IP address to bind to
    #[arg(long, env = "IP")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Prometheus listener port
    #[arg(long, env = "METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Directory holding cert.pem and key.pem; serves TLS when set
    #[arg(long, env = "CERT_PATH")]
    pub cert_path: Option<PathBuf>,

    /// Seconds allowed to receive a request body
    #[arg(long, env = "HTTP_READ_TIMEOUT")]
    pub read_timeout: Option<u64>,

    /// Seconds allowed for a whole request, response included
    #[arg(long, env = "HTTP_WRITE_TIMEOUT")]
    pub write_timeout: Option<u64>,

    /// debug or release
    #[arg(long, env = "MODE")]
    pub mode: Option<String>,

    /// Namespace annotation naming the mutation endpoint
    #[arg(long, env = "MUTATION_EP_ANNOTATION")]
    pub mutation_annotation: Option<String>,

    /// Namespace annotation naming the validation endpoint
    #[arg(long, env = "VALIDATION_ANNOTATION_EP")]
    pub validation_annotation: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gateway server (default)
    Serve,

    /// Load and validate the configuration, then print it as YAML
    CheckConfig,
}

impl Cli {
    /// Apply flag/env overrides on top of the loaded configuration.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(ref host) = self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(port) = self.metrics_port {
            config.server.metrics_port = Some(port);
        }
        if let Some(secs) = self.read_timeout {
            config.server.read_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.write_timeout {
            config.server.request_timeout = Duration::from_secs(secs);
        }
        if let Some(ref mode) = self.mode {
            config.server.mode = mode.clone();
        }
        if let Some(ref dir) = self.cert_path {
            config.tls.enabled = true;
            config.tls.cert_dir = Some(dir.to_string_lossy().into_owned());
        }
        if let Some(ref key) = self.mutation_annotation {
            config.routing.mutation_annotation = key.clone();
        }
        if let Some(ref key) = self.validation_annotation {
            config.routing.validation_annotation = key.clone();
        }
    }
}
