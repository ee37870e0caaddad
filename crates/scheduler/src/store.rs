//! Collaborator traits: persistence for jobs, templates and tasks, and the
//! report generator the executor drives.

use async_trait::async_trait;

use crate::{
    Result,
    types::{JobStatus, Report, ReportJob, ReportRequest, ReportTemplate, ScheduledTask},
};

/// Durable state of report jobs.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn list_pending_jobs(&self) -> Result<Vec<ReportJob>>;
    async fn get_report_job(&self, id: &str) -> Result<Option<ReportJob>>;
    async fn create_report_job(&self, job: &ReportJob) -> Result<()>;
    async fn update_report_job(&self, job: &ReportJob) -> Result<()>;
}

/// Read access to report templates, owned by template management.
#[async_trait]
pub trait TemplateProvider: Send + Sync {
    /// Enabled templates that carry a non-empty schedule, across tenants.
    async fn get_scheduled_templates(&self) -> Result<Vec<ReportTemplate>>;
    async fn get_template(&self, tenant_id: &str, id: &str) -> Result<Option<ReportTemplate>>;
}

/// Persistence for ad-hoc scheduled tasks.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, task: &ScheduledTask) -> Result<()>;
    async fn update_task(&self, task: &ScheduledTask) -> Result<()>;
    async fn delete_task(&self, tenant_id: &str, id: &str) -> Result<()>;
    async fn get_task(&self, tenant_id: &str, id: &str) -> Result<Option<ScheduledTask>>;
    /// All tasks of one tenant, or of every tenant when `tenant_id` is `None`.
    async fn list_tasks(&self, tenant_id: Option<&str>) -> Result<Vec<ScheduledTask>>;
    async fn list_enabled_tasks(&self) -> Result<Vec<ScheduledTask>>;
    async fn update_last_execution(
        &self,
        task_id: &str,
        status: JobStatus,
        message: &str,
    ) -> Result<()>;
}

/// Produces report content. Timeouts are the generator's business.
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    async fn generate_report(&self, request: &ReportRequest) -> Result<Report>;

    /// Generate content for a report row created by a report-request flow.
    async fn generate_for_report(&self, tenant_id: &str, report_id: &str) -> Result<Report>;
}
