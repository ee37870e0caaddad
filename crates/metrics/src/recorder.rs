//! Metrics recorder initialization and configuration.

use std::net::SocketAddr;

use tracing::{info, warn};

use crate::error::Result;

/// Handle to the metrics system, providing access to exported metrics.
#[derive(Clone, Default)]
pub struct MetricsHandle {
    #[cfg(feature = "prometheus")]
    prometheus_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl MetricsHandle {
    /// Render metrics in Prometheus text format.
    ///
    /// Empty when metrics are disabled or the exporter is not compiled in.
    #[must_use]
    pub fn render(&self) -> String {
        #[cfg(feature = "prometheus")]
        {
            self.prometheus_handle
                .as_ref()
                .map(|h| h.render())
                .unwrap_or_default()
        }
        #[cfg(not(feature = "prometheus"))]
        {
            String::new()
        }
    }

    /// Whether a recorder was installed.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        #[cfg(feature = "prometheus")]
        {
            self.prometheus_handle.is_some()
        }
        #[cfg(not(feature = "prometheus"))]
        {
            false
        }
    }
}

/// Configuration for the metrics system.
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorderConfig {
    /// Whether metrics collection is enabled
    pub enabled: bool,
    /// Serve `/metrics` on this address when set
    pub listen: Option<SocketAddr>,
    /// Global labels to add to all metrics
    pub global_labels: Vec<(String, String)>,
}

/// Initialize the metrics system.
///
/// Call once at startup, from inside a Tokio runtime when `listen` is set.
/// When disabled nothing is installed and every facade call is a no-op.
///
/// # Errors
///
/// Returns an error if the exporter cannot be built or a global recorder is
/// already installed.
pub fn init_metrics(config: MetricsRecorderConfig) -> Result<MetricsHandle> {
    if !config.enabled {
        info!("metrics collection is disabled");
        return Ok(MetricsHandle::default());
    }

    #[cfg(feature = "prometheus")]
    {
        let handle = init_prometheus(config)?;
        info!("prometheus metrics exporter initialized");
        Ok(MetricsHandle {
            prometheus_handle: Some(handle),
        })
    }

    #[cfg(not(feature = "prometheus"))]
    {
        warn!(
            listen = ?config.listen,
            "metrics enabled in config but the prometheus feature is not compiled in"
        );
        Ok(MetricsHandle::default())
    }
}

#[cfg(feature = "prometheus")]
fn builder(
    config: &MetricsRecorderConfig,
) -> Result<metrics_exporter_prometheus::PrometheusBuilder> {
    use {
        crate::{buckets, reconcile},
        metrics_exporter_prometheus::{Matcher, PrometheusBuilder},
    };

    let mut builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("_duration_seconds".to_string()),
            &buckets::JOB_DURATION,
        )?
        .set_buckets_for_metric(
            Matcher::Full(reconcile::DURATION_SECONDS.to_string()),
            &buckets::RECONCILE_DURATION,
        )?;

    for (key, value) in &config.global_labels {
        builder = builder.add_global_label(key, value);
    }
    Ok(builder)
}

#[cfg(feature = "prometheus")]
fn init_prometheus(
    config: MetricsRecorderConfig,
) -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    let builder = builder(&config)?;

    let Some(addr) = config.listen else {
        return Ok(builder.install_recorder()?);
    };

    let (recorder, exporter) = builder.with_http_listener(addr).build()?;
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder).map_err(|_| crate::Error::AlreadyInstalled)?;
    tokio::spawn(async move {
        if let Err(e) = exporter.await {
            warn!(error = ?e, "metrics http listener stopped");
        }
    });
    info!(%addr, "serving prometheus metrics");
    Ok(handle)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_installs_nothing() {
        let handle = init_metrics(MetricsRecorderConfig::default()).unwrap();
        assert!(!handle.is_enabled());
        assert!(handle.render().is_empty());
    }

    #[cfg(feature = "prometheus")]
    #[test]
    fn renders_names_and_labels() {
        let config = MetricsRecorderConfig {
            enabled: true,
            global_labels: vec![("service".into(), "reportd".into())],
            ..Default::default()
        };
        let recorder = builder(&config).unwrap().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            metrics::counter!(crate::jobs::EXECUTIONS_TOTAL, crate::labels::KIND => "template")
                .increment(2);
            metrics::histogram!(crate::reconcile::DURATION_SECONDS).record(0.02);
        });

        let out = handle.render();
        assert!(out.contains("reportd_job_executions_total"));
        assert!(out.contains(r#"kind="template""#));
        assert!(out.contains(r#"service="reportd""#));
        assert!(out.contains("reportd_reconcile_duration_seconds_bucket"));
    }
}
