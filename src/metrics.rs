//! Metrics emission.
//!
//! Calls go through the `metrics` facade and cost nothing until a recorder
//! is installed. With the `metrics` feature, [`install_prometheus`] exposes
//! them on a separate listener.

use std::time::Duration;

use telemetry_metrics::{counter, gauge, histogram};

use crate::admission::Vertical;

/// Outcome label for a finished review
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewOutcome {
    /// Admitted without a patch
    Allowed,
    /// Admitted with a patch
    Patched,
    /// Denied
    Denied,
    /// Envelope could not be decoded
    DecodeError,
    /// Wiring error, no verdict produced
    NoVerdict,
}

impl ReviewOutcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Patched => "patched",
            Self::Denied => "denied",
            Self::DecodeError => "decode_error",
            Self::NoVerdict => "no_verdict",
        }
    }
}

/// Count one review
pub fn record_review(vertical: Vertical, outcome: ReviewOutcome) {
    counter!(
        "admission_reviews_total",
        "vertical" => vertical.as_str(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Where a review failed before falling back to the default verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackKind {
    /// Namespace read or annotation lookup
    Resolve,
    /// Decision service call
    Forward,
}

impl FallbackKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Resolve => "resolve",
            Self::Forward => "forward",
        }
    }
}

/// Count a failure that fell back to the vertical's default verdict
pub fn record_fallback(vertical: Vertical, kind: FallbackKind) {
    counter!(
        "admission_fallbacks_total",
        "vertical" => vertical.as_str(),
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Constant `1` gauge labelled with the build version and serving mode
pub fn record_service_info(version: &'static str, mode: &str) {
    gauge!(
        "admission_gateway_service_info",
        "version" => version,
        "mode" => mode.to_string()
    )
    .set(1.0);
}

/// Count one HTTP request on a matched route and record its latency
pub fn record_http_request(method: &str, route: &str, status: u16, elapsed: Duration) {
    counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "route" => route.to_string()
    )
    .record(elapsed.as_secs_f64());
}

/// Count a certificate reload attempt
pub fn record_certificate_reload(result: &'static str) {
    counter!("tls_certificate_reloads_total", "result" => result).increment(1);
}

/// Seconds until the active serving certificate expires
#[allow(clippy::cast_precision_loss)]
pub fn set_certificate_expiry(expires_in_secs: i64) {
    gauge!("tls_certificate_expires_in_seconds").set(expires_in_secs as f64);
}

/// Install the Prometheus exporter listening on `addr`.
#[cfg(feature = "metrics")]
pub fn install_prometheus(addr: std::net::SocketAddr) -> crate::Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| crate::Error::Config(format!("Failed to start metrics exporter: {e}")))
}

/// In-process recorder capturing registered metric keys
#[cfg(test)]
pub(crate) mod testing {
    use parking_lot::Mutex;
    use telemetry_metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};

    #[derive(Default)]
    pub(crate) struct Capture {
        keys: Mutex<Vec<(String, Vec<(String, String)>)>>,
    }

    impl Capture {
        /// Labels of every registration under `name`
        pub(crate) fn labels(&self, name: &str) -> Vec<Vec<(String, String)>> {
            self.keys
                .lock()
                .iter()
                .filter(|(n, _)| n == name)
                .map(|(_, labels)| labels.clone())
                .collect()
        }

        fn push(&self, key: &Key) {
            let labels = key
                .labels()
                .map(|l| (l.key().to_string(), l.value().to_string()))
                .collect();
            self.keys.lock().push((key.name().to_string(), labels));
        }
    }

    impl Recorder for Capture {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
            self.push(key);
            Counter::noop()
        }

        fn register_gauge(&self, key: &Key, _: &Metadata<'_>) -> Gauge {
            self.push(key);
            Gauge::noop()
        }

        fn register_histogram(&self, key: &Key, _: &Metadata<'_>) -> Histogram {
            self.push(key);
            Histogram::noop()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::Capture;
    use super::*;
    use pretty_assertions::assert_eq;

    fn pairs(labels: &[(&str, &str)]) -> Vec<(String, String)> {
        labels.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
    }

    #[test]
    fn service_info_carries_version_and_mode() {
        let capture = Capture::default();
        telemetry_metrics::with_local_recorder(&capture, || record_service_info("1.2.3", "debug"));

        assert_eq!(
            capture.labels("admission_gateway_service_info"),
            vec![pairs(&[("version", "1.2.3"), ("mode", "debug")])]
        );
    }

    #[test]
    fn http_requests_are_labelled_by_route() {
        let capture = Capture::default();
        telemetry_metrics::with_local_recorder(&capture, || {
            record_http_request("POST", "/validate", 200, Duration::from_millis(3));
        });

        assert_eq!(
            capture.labels("http_requests_total"),
            vec![pairs(&[("method", "POST"), ("route", "/validate"), ("status", "200")])]
        );
        assert_eq!(
            capture.labels("http_request_duration_seconds"),
            vec![pairs(&[("method", "POST"), ("route", "/validate")])]
        );
    }
}
