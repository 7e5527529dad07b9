//! Gateway server

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use super::router::{AppState, create_router};
use crate::admission::{
    DecisionForwarder, EndpointResolver, KubeNamespaceLookup, NamespaceLookup, ReviewDispatcher,
    RoutingAnnotations,
};
use crate::config::Config;
use crate::tls::{KeypairReloader, SystemClock};
use crate::{Error, Result};

/// Admission gateway server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Shared handler state
    state: Arc<AppState>,
    /// Serving certificate, when TLS is on
    reloader: Option<Arc<KeypairReloader>>,
}

impl Gateway {
    /// Create a gateway reading namespaces from the cluster in the ambient
    /// kubeconfig or in-cluster service account.
    pub async fn new(config: Config) -> Result<Self> {
        let client = kube::Client::try_default().await?;
        let lookup = Arc::new(KubeNamespaceLookup::new(client, config.forward.namespace_timeout));
        Self::with_lookup(config, lookup)
    }

    /// Create a gateway around an existing namespace lookup.
    ///
    /// Loads the serving certificate when TLS is enabled; a load failure
    /// is returned and the gateway does not start.
    pub fn with_lookup(config: Config, lookup: Arc<dyn NamespaceLookup>) -> Result<Self> {
        let resolver = EndpointResolver::new(lookup, RoutingAnnotations::from(&config.routing));
        let forwarder = DecisionForwarder::new(&config.forward)?;
        let dispatcher = ReviewDispatcher::new(resolver, forwarder, config.forward.review_timeout);

        let reloader = if config.tls.enabled {
            let (cert, key) = config.tls.key_pair_paths().ok_or_else(|| {
                Error::Config("tls.enabled requires a certificate and key path".to_string())
            })?;
            Some(Arc::new(KeypairReloader::load(cert, key)?))
        } else {
            None
        };

        let state = Arc::new(AppState {
            dispatcher: Arc::new(dispatcher),
            mode: config.server.mode.clone(),
            certificates: reloader.clone(),
        });

        Ok(Self {
            config,
            state,
            reloader,
        })
    }

    /// Run until Ctrl-C / SIGTERM
    pub async fn run(self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `shutdown` resolves, then drain in-flight requests.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let host: IpAddr = self
            .config
            .server
            .host
            .parse()
            .map_err(|e| Error::Config(format!("Invalid host: {e}")))?;
        let addr = SocketAddr::new(host, self.config.server.port);

        let (shutdown_tx, _) = broadcast::channel(1);
        let notify = {
            let shutdown_tx = shutdown_tx.clone();
            async move {
                shutdown.await;
                info!("Shutdown signal received");
                let _ = shutdown_tx.send(());
            }
        };

        #[cfg(feature = "metrics")]
        if let Some(port) = self.config.server.metrics_port {
            match crate::metrics::install_prometheus(SocketAddr::new(host, port)) {
                Ok(()) => info!(port, "Metrics listener started"),
                Err(e) => warn!(port, error = %e, "Metrics listener unavailable"),
            }
        }

        crate::metrics::record_service_info(crate::VERSION, &self.config.server.mode);

        let app = create_router(Arc::clone(&self.state), &self.config.server);

        info!("============================================================");
        info!("ADMISSION GATEWAY v{}", crate::VERSION);
        info!("============================================================");
        info!(
            host = %self.config.server.host,
            port = self.config.server.port,
            mode = %self.config.server.mode,
            tls = self.reloader.is_some(),
            "Listening"
        );
        info!(
            mutation = %self.config.routing.mutation_annotation,
            validation = %self.config.routing.validation_annotation,
            "Routing on namespace annotations"
        );
        info!("  POST /mutate    (mutating admission)");
        info!("  POST /validate  (validating admission)");
        info!("============================================================");

        match &self.reloader {
            Some(reloader) => {
                if self.config.server.mode != "release" {
                    warn!(mode = %self.config.server.mode, "Serving TLS in non-release mode");
                }

                tokio::spawn(Arc::clone(reloader).run(Arc::new(SystemClock), shutdown_tx.subscribe()));

                let tls = RustlsConfig::from_config(Arc::new(reloader.server_config()?));
                let handle = Handle::<SocketAddr>::new();
                let grace = self.config.server.shutdown_timeout;

                let shutdown_handle = handle.clone();
                tokio::spawn(async move {
                    notify.await;
                    shutdown_handle.graceful_shutdown(Some(grace));
                });

                axum_server::bind_rustls(addr, tls)
                    .handle(handle)
                    .serve(app.into_make_service())
                    .await?;
            }
            None => {
                warn!("TLS disabled - the API server only calls HTTPS webhooks");
                let listener = TcpListener::bind(addr).await?;
                axum::serve(listener, app)
                    .with_graceful_shutdown(notify)
                    .await
                    .map_err(|e| Error::Internal(e.to_string()))?;
            }
        }

        info!("Gateway stopped");
        Ok(())
    }
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

}
