//! Namespace endpoint resolver.
//!
//! Routing lives on the namespace object itself: an annotation per vertical
//! names the decision service URL. The namespace is read fresh on every
//! review, nothing is cached.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::{Api, Client};
use tracing::debug;

use crate::config::RoutingConfig;
use crate::{Error, Result};

/// Admission vertical
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vertical {
    /// May patch, never denies
    Mutate,
    /// May deny, never patches
    Validate,
}

impl Vertical {
    /// Label used in logs, metrics and routes
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mutate => "mutate",
            Self::Validate => "validate",
        }
    }
}

impl fmt::Display for Vertical {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-side access to namespace annotations
#[async_trait]
pub trait NamespaceLookup: Send + Sync {
    /// Annotation mapping of the named namespace
    async fn annotations(&self, namespace: &str) -> Result<BTreeMap<String, String>>;
}

/// [`NamespaceLookup`] backed by the Kubernetes API
pub struct KubeNamespaceLookup {
    api: Api<Namespace>,
    timeout: Duration,
}

impl KubeNamespaceLookup {
    /// Create a lookup using `client`, bounding each read by `timeout`
    #[must_use]
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self {
            api: Api::all(client),
            timeout,
        }
    }
}

#[async_trait]
impl NamespaceLookup for KubeNamespaceLookup {
    async fn annotations(&self, namespace: &str) -> Result<BTreeMap<String, String>> {
        let ns = tokio::time::timeout(self.timeout, self.api.get(namespace))
            .await
            .map_err(|_| Error::Resolution {
                namespace: namespace.to_string(),
                message: format!("timed out after {:?}", self.timeout),
            })?
            .map_err(|e| Error::Resolution {
                namespace: namespace.to_string(),
                message: e.to_string(),
            })?;

        Ok(ns.metadata.annotations.unwrap_or_default())
    }
}

/// Annotation keys consulted per vertical
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingAnnotations {
    /// Key naming the mutation endpoint
    pub mutation: String,
    /// Key naming the validation endpoint
    pub validation: String,
}

impl RoutingAnnotations {
    /// Key for `vertical`
    #[must_use]
    pub fn key(&self, vertical: Vertical) -> &str {
        match vertical {
            Vertical::Mutate => &self.mutation,
            Vertical::Validate => &self.validation,
        }
    }
}

impl From<&RoutingConfig> for RoutingAnnotations {
    fn from(config: &RoutingConfig) -> Self {
        Self {
            mutation: config.mutation_annotation.clone(),
            validation: config.validation_annotation.clone(),
        }
    }
}

/// Outcome of endpoint resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Namespace names a decision endpoint
    Endpoint(String),
    /// Namespace carries no annotation for this vertical
    NotConfigured,
}

/// Resolves the decision endpoint for a namespace and vertical
pub struct EndpointResolver {
    lookup: Arc<dyn NamespaceLookup>,
    annotations: RoutingAnnotations,
}

impl EndpointResolver {
    /// Create a resolver
    #[must_use]
    pub fn new(lookup: Arc<dyn NamespaceLookup>, annotations: RoutingAnnotations) -> Self {
        Self { lookup, annotations }
    }

    /// Annotation keys in use
    #[must_use]
    pub fn annotations(&self) -> &RoutingAnnotations {
        &self.annotations
    }

    /// Resolve the endpoint for `namespace`.
    ///
    /// A missing annotation is [`Resolution::NotConfigured`], not an error.
    /// A failed namespace read is [`Error::Resolution`].
    pub async fn resolve(&self, namespace: &str, vertical: Vertical) -> Result<Resolution> {
        let key = self.annotations.key(vertical);
        let annotations = self.lookup.annotations(namespace).await?;

        match annotations.get(key) {
            Some(endpoint) => {
                debug!(namespace, annotation = key, endpoint = %endpoint, "Got endpoint from namespace");
                Ok(Resolution::Endpoint(endpoint.clone()))
            }
            None => {
                debug!(namespace, annotation = key, "No endpoint configured for namespace");
                Ok(Resolution::NotConfigured)
            }
        }
    }
}
