//! HTTP client for the report-generation service.

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    reportd_config::GeneratorConfig,
    reportd_scheduler::{
        Error, Result,
        store::ReportGenerator,
        types::{Report, ReportRequest},
    },
    serde_json::json,
    tracing::{debug, warn},
};

/// Posts generation requests to `endpoint` and reads back a [`Report`].
///
/// `POST {endpoint}` with a [`ReportRequest`] body creates a report;
/// `POST {endpoint}/{report_id}/generate` regenerates an existing one.
pub struct HttpReportGenerator {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpReportGenerator {
    pub fn new(endpoint: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("reportd/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    async fn post(&self, url: &str, body: serde_json::Value) -> Result<Report> {
        debug!(url, "requesting report generation");
        let resp = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::external(format!("request to {url} failed"), e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::execution(format!(
                "generator returned {status}: {}",
                body.trim()
            )));
        }

        resp.json::<Report>()
            .await
            .map_err(|e| Error::external("invalid generator response", e))
    }
}

#[async_trait]
impl ReportGenerator for HttpReportGenerator {
    async fn generate_report(&self, request: &ReportRequest) -> Result<Report> {
        self.post(&self.endpoint, serde_json::to_value(request)?)
            .await
    }

    async fn generate_for_report(&self, tenant_id: &str, report_id: &str) -> Result<Report> {
        let url = format!("{}/{report_id}/generate", self.endpoint);
        self.post(&url, json!({ "tenant_id": tenant_id })).await
    }
}

/// Stand-in used when no endpoint is configured: every call fails, so jobs
/// and tasks end up `failed` with a clear message instead of hanging.
struct Unconfigured;

#[async_trait]
impl ReportGenerator for Unconfigured {
    async fn generate_report(&self, _request: &ReportRequest) -> Result<Report> {
        Err(Error::execution("no report generator endpoint configured"))
    }

    async fn generate_for_report(&self, _tenant_id: &str, _report_id: &str) -> Result<Report> {
        Err(Error::execution("no report generator endpoint configured"))
    }
}

pub fn from_config(config: &GeneratorConfig) -> anyhow::Result<Arc<dyn ReportGenerator>> {
    match config.endpoint.as_deref() {
        Some(endpoint) => Ok(Arc::new(HttpReportGenerator::new(
            endpoint,
            Duration::from_secs(config.timeout_secs),
        )?)),
        None => {
            warn!("generator.endpoint is not set; report executions will fail");
            Ok(Arc::new(Unconfigured))
        },
    }
}
