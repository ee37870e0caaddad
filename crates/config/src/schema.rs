//! Config schema types (scheduler cadence, database, report generator, metrics).

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReportdConfig {
    pub scheduler: SchedulerConfig,
    pub database: DatabaseConfig,
    pub generator: GeneratorConfig,
    pub metrics: MetricsConfig,
}

/// Cadence of the engine's own periodic entries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 5-field cron for the template reconciliation pass.
    pub reconcile_schedule: String,
    /// 5-field cron for the due-job sweep.
    pub pending_jobs_schedule: String,
    /// Run one reconciliation pass while starting.
    pub reconcile_on_start: bool,
    /// Due jobs executed in parallel by one sweep.
    pub max_concurrent_jobs: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reconcile_schedule: "0 * * * *".into(),
            pending_jobs_schedule: "* * * * *".into(),
            reconcile_on_start: true,
            max_concurrent_jobs: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx connection URL.
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:reportd.db?mode=rwc".into(),
            max_connections: 5,
        }
    }
}

/// HTTP endpoint that renders reports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Base URL, e.g. `http://127.0.0.1:8080/api/reports`. Without one every
    /// execution fails with a descriptive error.
    pub endpoint: Option<String>,
    /// Per-request timeout.
    pub timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Address for a standalone Prometheus scrape listener, e.g. `127.0.0.1:9464`.
    pub listen: Option<String>,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg: ReportdConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, ReportdConfig::default());
        assert_eq!(cfg.scheduler.reconcile_schedule, "0 * * * *");
        assert!(cfg.scheduler.reconcile_on_start);
        assert_eq!(cfg.generator.timeout_secs, 300);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let cfg: ReportdConfig = toml::from_str(
            r#"
[scheduler]
max_concurrent_jobs = 8

[generator]
endpoint = "http://reports.internal/api"
"#,
        )
        .unwrap();
        assert_eq!(cfg.scheduler.max_concurrent_jobs, 8);
        assert_eq!(cfg.scheduler.pending_jobs_schedule, "* * * * *");
        assert_eq!(
            cfg.generator.endpoint.as_deref(),
            Some("http://reports.internal/api")
        );
        assert_eq!(cfg.database.max_connections, 5);
    }
}
