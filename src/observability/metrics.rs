//! Prometheus metrics.

use crate::config::MetricsSettings;
use crate::{Error, Result};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Default port for the Prometheus HTTP listener.
pub const DEFAULT_METRICS_PORT: u16 = 9090;

/// Buckets for `revgc_datastore_gc_duration_seconds`.
const GC_DURATION_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0];

/// Metrics configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,
    /// Address to bind the metrics exporter.
    pub listen_addr: SocketAddr,
}

impl MetricsConfig {
    /// Builds metrics configuration from config settings with env overrides.
    #[must_use]
    pub fn from_settings(settings: Option<&MetricsSettings>) -> Self {
        Self::from_settings_with(settings, |key| std::env::var(key).ok())
    }

    /// Same as [`MetricsConfig::from_settings`], reading variables through
    /// `lookup`.
    #[must_use]
    pub fn from_settings_with(
        settings: Option<&MetricsSettings>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let mut enabled = settings.and_then(|s| s.enabled).unwrap_or(false);
        let mut port = settings.and_then(|s| s.port).unwrap_or(DEFAULT_METRICS_PORT);

        if let Some(value) = lookup("REVGC_METRICS_ENABLED") {
            enabled = parse_bool(&value);
        }
        if let Some(value) = lookup("REVGC_METRICS_PORT").and_then(|v| v.trim().parse().ok()) {
            port = value;
        }

        Self {
            enabled,
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
        }
    }
}

/// Installed Prometheus recorder.
#[derive(Debug, Clone)]
pub struct MetricsHandle {
    prometheus: PrometheusHandle,
}

impl MetricsHandle {
    /// Renders the current metrics in the Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.prometheus.render()
    }
}

/// Installs the Prometheus recorder, plus an HTTP listener if `expose` is set.
///
/// Returns `None` when metrics are disabled.
///
/// # Errors
///
/// Returns an error if a global recorder is already installed, or if the
/// listener is requested outside a tokio runtime.
pub fn install_prometheus(config: &MetricsConfig, expose: bool) -> Result<Option<MetricsHandle>> {
    if !config.enabled {
        return Ok(None);
    }

    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("revgc_datastore_gc_duration_seconds".to_string()),
            GC_DURATION_BUCKETS,
        )
        .map_err(|e| exporter_error("metrics_exporter_build", &e))?;

    let prometheus = if expose {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| exporter_error("metrics_listener_runtime", &e))?;
        let (recorder, exporter) = {
            let _guard = runtime.enter();
            builder
                .with_http_listener(config.listen_addr)
                .build()
                .map_err(|e| exporter_error("metrics_exporter_build", &e))?
        };
        let handle = recorder.handle();
        metrics::set_global_recorder(recorder)
            .map_err(|e| exporter_error("metrics_recorder_install", &e))?;
        runtime.spawn(exporter);
        tracing::info!(listen_addr = %config.listen_addr, "prometheus metrics listener started");
        handle
    } else {
        builder
            .install_recorder()
            .map_err(|e| exporter_error("metrics_recorder_install", &e))?
    };

    Ok(Some(MetricsHandle { prometheus }))
}

fn exporter_error(operation: &str, cause: &impl ToString) -> Error {
    Error::OperationFailed {
        operation: operation.to_string(),
        cause: cause.to_string(),
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::{DeletionCounts, GcMetrics};
    use std::time::Duration;

    #[test]
    fn test_config_from_settings_and_env() {
        let settings = MetricsSettings {
            enabled: Some(true),
            port: Some(9464),
        };
        let config = MetricsConfig::from_settings_with(Some(&settings), |_| None);
        assert!(config.enabled);
        assert_eq!(config.listen_addr.port(), 9464);

        let overridden = MetricsConfig::from_settings_with(Some(&settings), |key| match key {
            "REVGC_METRICS_ENABLED" => Some("no".to_string()),
            "REVGC_METRICS_PORT" => Some("9100".to_string()),
            _ => None,
        });
        assert!(!overridden.enabled);
        assert_eq!(overridden.listen_addr.port(), 9100);
    }

    #[test]
    fn test_disabled_installs_nothing() {
        let config = MetricsConfig::from_settings_with(None, |_| None);
        assert!(matches!(install_prometheus(&config, false), Ok(None)));
    }

    #[test]
    fn test_gc_metrics_render() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            let gc = GcMetrics::new();
            gc.record_failure();
            gc.record_success(
                &DeletionCounts {
                    relationships: 3,
                    ..DeletionCounts::default()
                },
                Duration::from_millis(5),
            );
        });

        let rendered = handle.render();
        assert!(rendered.contains("revgc_datastore_gc_failure_total 1"));
        assert!(rendered.contains("revgc_datastore_gc_relationships_total 3"));
    }
}
