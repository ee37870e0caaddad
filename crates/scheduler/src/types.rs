//! Core data types for report scheduling: jobs, templates, ad-hoc tasks.

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

use crate::{Error, Result};

/// Lifecycle state of a report job or of a task's last run.
///
/// Persisted as `pending|running|completed|failed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Only `pending -> running -> {completed, failed}` is allowed.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(Error::validation(format!("unknown job status: {other}"))),
        }
    }
}

/// How often a template-driven report recurs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Frequency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(Error::invalid_frequency(other)),
        }
    }
}

/// Recurring schedule attached to a report template.
///
/// Kept as raw strings because this is exactly what is persisted in
/// `report_templates.schedule_config`; [`crate::validate::validate_schedule_config`]
/// decides whether the values are usable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ScheduleConfig {
    /// `daily`, `weekly` or `monthly`.
    pub frequency: String,
    /// `HH:MM`, 24-hour clock, local to `timezone`.
    pub time: String,
    /// IANA zone name, e.g. `Europe/Berlin`.
    pub timezone: String,
}

impl ScheduleConfig {
    pub fn new(
        frequency: impl Into<String>,
        time: impl Into<String>,
        timezone: impl Into<String>,
    ) -> Self {
        Self {
            frequency: frequency.into(),
            time: time.into(),
            timezone: timezone.into(),
        }
    }
}

/// One scheduled execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportJob {
    pub id: String,
    pub tenant_id: String,
    pub template_id: Option<String>,
    pub report_id: Option<String>,
    pub status: JobStatus,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
}

impl ReportJob {
    /// A pending job produced by template reconciliation.
    pub fn for_template(
        tenant_id: impl Into<String>,
        template_id: impl Into<String>,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        Self::pending(tenant_id.into(), Some(template_id.into()), None, scheduled_at)
    }

    /// A pending job produced by a report-request flow for an existing report row.
    pub fn for_report(
        tenant_id: impl Into<String>,
        report_id: impl Into<String>,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        Self::pending(tenant_id.into(), None, Some(report_id.into()), scheduled_at)
    }

    fn pending(
        tenant_id: String,
        template_id: Option<String>,
        report_id: Option<String>,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id,
            template_id,
            report_id,
            status: JobStatus::Pending,
            scheduled_at,
            started_at: None,
            completed_at: None,
            error_message: None,
            retry_count: 0,
        }
    }

    fn transition(&mut self, to: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                job_id: self.id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(JobStatus::Running)?;
        self.started_at = Some(now);
        Ok(())
    }

    /// `report_id` is only overwritten when the generator returned one.
    pub fn mark_completed(&mut self, report_id: Option<String>, now: DateTime<Utc>) -> Result<()> {
        self.transition(JobStatus::Completed)?;
        if report_id.is_some() {
            self.report_id = report_id;
        }
        self.completed_at = Some(now);
        self.error_message = None;
        Ok(())
    }

    pub fn mark_failed(&mut self, message: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        self.transition(JobStatus::Failed)?;
        self.completed_at = Some(now);
        self.error_message = Some(message.into());
        self.retry_count += 1;
        Ok(())
    }

    #[must_use]
    pub fn is_future_pending_for(&self, template_id: &str, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending
            && self.template_id.as_deref() == Some(template_id)
            && self.scheduled_at > now
    }
}

/// The schedule-relevant slice of a report template. Read-only for the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportTemplate {
    pub id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub name: String,
    pub enabled: bool,
    /// Serialized [`ScheduleConfig`]; `None` or blank means "not scheduled".
    pub schedule_config: Option<String>,
    pub report_type: String,
    pub file_format: String,
    /// Serialized JSON object handed to the generator as the request config.
    #[serde(default)]
    pub config: Option<String>,
}

impl ReportTemplate {
    /// Deserialize the attached schedule, if any.
    pub fn schedule(&self) -> Result<Option<ScheduleConfig>> {
        match self.schedule_config.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
        }
    }

    /// Deserialize the generation config; a missing config is an empty object.
    pub fn generation_config(&self) -> Result<Map<String, Value>> {
        match self.config.as_deref().map(str::trim) {
            None | Some("") => Ok(Map::new()),
            Some(raw) => Ok(serde_json::from_str(raw)?),
        }
    }
}

/// A user-managed report job triggered by its own cron expression.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduledTask {
    pub id: String,
    pub tenant_id: String,
    pub task_name: String,
    /// Standard 5-field cron (`minute hour day month weekday`).
    pub cron_expression: String,
    /// Opaque to the engine except for [`TaskReportConfig`] deserialization.
    pub report_config: Value,
    #[serde(default)]
    pub recipients: Vec<String>,
    pub is_enabled: bool,
    pub last_run_status: Option<JobStatus>,
    pub last_run_message: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a scheduled task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCreate {
    pub tenant_id: String,
    pub task_name: String,
    pub cron_expression: String,
    pub report_config: Value,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Patch for updating an existing task.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron_expression: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_config: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipients: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_enabled: Option<bool>,
}

/// What a scheduled task's `report_config` must contain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskReportConfig {
    pub report_type: String,
    #[serde(default = "default_file_format")]
    pub file_format: String,
    /// Relative window used when no explicit dates are given. Defaults to daily.
    #[serde(default)]
    pub period: Option<Frequency>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub config: Map<String, Value>,
}

fn default_file_format() -> String {
    "pdf".into()
}

/// Half-open `[start, end)` time range a report covers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Request handed to the report generator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportRequest {
    pub tenant_id: String,
    pub report_type: String,
    pub file_format: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub config: Map<String, Value>,
}

/// Report reference returned by the generator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Report {
    pub id: String,
    pub uuid: String,
    pub status: String,
}

/// Result of running one scheduled task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskOutcome {
    pub task_id: String,
    pub status: JobStatus,
    pub message: String,
    pub report: Option<Report>,
}
