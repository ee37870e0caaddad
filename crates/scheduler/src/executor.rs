//! Drives report jobs and scheduled tasks through generation.

use std::sync::Arc;

use {
    chrono::{DateTime, Utc},
    chrono_tz::Tz,
    futures::{StreamExt, stream},
    serde::Serialize,
    serde_json::Value,
    tokio::sync::Mutex,
    tracing::{debug, error, info, warn},
};

#[cfg(feature = "metrics")]
use reportd_metrics::{
    counter, gauge, histogram, jobs as job_metrics, labels, tasks as task_metrics,
};

use crate::{
    Error, Result,
    reconciler::TemplateReconciler,
    schedule::{report_window, resolve_timezone},
    store::{JobStore, ReportGenerator, TaskStore, TemplateProvider},
    types::{
        Frequency, JobStatus, Report, ReportJob, ReportRequest, ReportTemplate, ReportWindow,
        ScheduledTask, TaskOutcome, TaskReportConfig,
    },
};

/// Default number of due jobs executed in parallel by one sweep.
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 4;

/// Outcome of one pending-job sweep.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SweepSummary {
    pub due: usize,
    pub completed: usize,
    pub failed: usize,
    /// Jobs that could not be driven at all (e.g. the store rejected a write).
    pub errors: usize,
    /// Another sweep was still running, so this one did nothing.
    pub skipped: bool,
}

pub struct JobExecutor {
    jobs: Arc<dyn JobStore>,
    templates: Arc<dyn TemplateProvider>,
    tasks: Arc<dyn TaskStore>,
    generator: Arc<dyn ReportGenerator>,
    reconciler: Arc<TemplateReconciler>,
    max_concurrent_jobs: usize,
    sweep: Mutex<()>,
}

impl JobExecutor {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        templates: Arc<dyn TemplateProvider>,
        tasks: Arc<dyn TaskStore>,
        generator: Arc<dyn ReportGenerator>,
        reconciler: Arc<TemplateReconciler>,
    ) -> Self {
        Self {
            jobs,
            templates,
            tasks,
            generator,
            reconciler,
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            sweep: Mutex::new(()),
        }
    }

    /// Values below 1 are treated as 1.
    #[must_use]
    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    /// Run `job` to a terminal state and return it as persisted.
    ///
    /// A failed generation is not an error here: it is recorded on the job
    /// and the job is returned with `status == Failed`. Errors are reserved
    /// for a job that is not pending or a store that rejects a write.
    pub async fn execute(&self, mut job: ReportJob) -> Result<ReportJob> {
        let started = Utc::now();
        job.mark_running(started)?;
        self.jobs.update_report_job(&job).await?;
        info!(
            job_id = %job.id,
            tenant_id = %job.tenant_id,
            template_id = ?job.template_id,
            report_id = ?job.report_id,
            "executing report job"
        );

        #[cfg(feature = "metrics")]
        let kind = if job.template_id.is_some() {
            "template"
        } else {
            "report"
        };
        #[cfg(feature = "metrics")]
        counter!(job_metrics::EXECUTIONS_TOTAL, labels::KIND => kind).increment(1);

        let (result, template) = self.generate_for_job(&job).await;
        let finished = Utc::now();

        match result {
            Ok(report) => {
                job.mark_completed(Some(report.id.clone()), finished)?;
                self.jobs.update_report_job(&job).await?;
                info!(
                    job_id = %job.id,
                    report_id = %report.id,
                    duration_ms = (finished - started).num_milliseconds(),
                    "report job completed"
                );
                if let Some(template) = template {
                    self.schedule_following(&template).await;
                }
            },
            Err(e) => {
                job.mark_failed(e.to_string(), finished)?;
                self.jobs.update_report_job(&job).await?;
                error!(
                    job_id = %job.id,
                    tenant_id = %job.tenant_id,
                    retry_count = job.retry_count,
                    error = %e,
                    "report job failed"
                );
                #[cfg(feature = "metrics")]
                counter!(job_metrics::FAILURES_TOTAL, labels::KIND => kind).increment(1);
            },
        }

        #[cfg(feature = "metrics")]
        histogram!(job_metrics::EXECUTION_DURATION_SECONDS, labels::KIND => kind)
            .record((finished - started).num_milliseconds() as f64 / 1000.0);

        Ok(job)
    }

    /// Load and execute a pending job by id.
    pub async fn execute_by_id(&self, job_id: &str) -> Result<ReportJob> {
        let job = self
            .jobs
            .get_report_job(job_id)
            .await?
            .ok_or_else(|| Error::job_not_found(job_id))?;
        self.execute(job).await
    }

    /// Execute every pending job scheduled at or before `now`.
    ///
    /// Jobs run concurrently up to the configured limit. One job failing,
    /// or even erroring, does not stop the others.
    pub async fn run_due_jobs(&self, now: DateTime<Utc>) -> Result<SweepSummary> {
        let Ok(_sweep) = self.sweep.try_lock() else {
            debug!("pending-job sweep already in progress, skipping");
            return Ok(SweepSummary {
                skipped: true,
                ..Default::default()
            });
        };

        let due: Vec<ReportJob> = self
            .jobs
            .list_pending_jobs()
            .await?
            .into_iter()
            .filter(|job| job.scheduled_at <= now)
            .collect();

        #[cfg(feature = "metrics")]
        gauge!(job_metrics::DUE).set(due.len() as f64);

        let mut summary = SweepSummary {
            due: due.len(),
            ..Default::default()
        };
        if due.is_empty() {
            return Ok(summary);
        }

        let results: Vec<(String, Result<ReportJob>)> = stream::iter(due)
            .map(|job| async move {
                let id = job.id.clone();
                (id, self.execute(job).await)
            })
            .buffer_unordered(self.max_concurrent_jobs)
            .collect()
            .await;

        for (job_id, result) in results {
            match result {
                Ok(job) if job.status == JobStatus::Completed => summary.completed += 1,
                Ok(_) => summary.failed += 1,
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "could not execute pending job");
                    summary.errors += 1;
                },
            }
        }

        info!(
            due = summary.due,
            completed = summary.completed,
            failed = summary.failed,
            errors = summary.errors,
            "pending-job sweep finished"
        );
        Ok(summary)
    }

    /// Run one scheduled task and record the result on it.
    ///
    /// Like [`Self::execute`], a failed generation is reported through the
    /// returned outcome. Errors mean the task's status could not be written.
    pub async fn execute_task(&self, task: &ScheduledTask) -> Result<TaskOutcome> {
        self.tasks
            .update_last_execution(&task.id, JobStatus::Running, "execution started")
            .await?;
        info!(
            task_id = %task.id,
            tenant_id = %task.tenant_id,
            task_name = %task.task_name,
            "executing scheduled task"
        );

        let result = match task_request(task, Utc::now()) {
            Ok(request) => self.generator.generate_report(&request).await,
            Err(e) => Err(e),
        };

        let outcome = match result {
            Ok(report) => TaskOutcome {
                task_id: task.id.clone(),
                status: JobStatus::Completed,
                message: format!("report {} generated", report.id),
                report: Some(report),
            },
            Err(e) => {
                error!(task_id = %task.id, error = %e, "scheduled task failed");
                #[cfg(feature = "metrics")]
                counter!(task_metrics::FAILURES_TOTAL, labels::TENANT => task.tenant_id.clone())
                    .increment(1);
                TaskOutcome {
                    task_id: task.id.clone(),
                    status: JobStatus::Failed,
                    message: e.to_string(),
                    report: None,
                }
            },
        };

        #[cfg(feature = "metrics")]
        counter!(task_metrics::EXECUTIONS_TOTAL, labels::STATUS => outcome.status.to_string())
            .increment(1);

        self.tasks
            .update_last_execution(&task.id, outcome.status, &outcome.message)
            .await?;
        info!(task_id = %task.id, status = %outcome.status, "scheduled task finished");
        Ok(outcome)
    }

    /// Resolve and run the generation a job stands for. The template is
    /// returned alongside so the caller can chain the next occurrence.
    async fn generate_for_job(&self, job: &ReportJob) -> (Result<Report>, Option<ReportTemplate>) {
        match (&job.template_id, &job.report_id) {
            (Some(template_id), _) => {
                let template = match self.templates.get_template(&job.tenant_id, template_id).await
                {
                    Ok(Some(template)) => template,
                    Ok(None) => return (Err(Error::template_not_found(template_id)), None),
                    Err(e) => return (Err(e), None),
                };
                let result = match template_request(&template, job.scheduled_at) {
                    Ok(request) => self.generator.generate_report(&request).await,
                    Err(e) => Err(e),
                };
                (result, Some(template))
            },
            (None, Some(report_id)) => (
                self.generator
                    .generate_for_report(&job.tenant_id, report_id)
                    .await,
                None,
            ),
            (None, None) => (
                Err(Error::validation(
                    "report job references neither a template nor a report",
                )),
                None,
            ),
        }
    }

    async fn schedule_following(&self, template: &ReportTemplate) {
        match self.reconciler.schedule_next(template, Utc::now()).await {
            Ok(Some(next)) => {
                debug!(template_id = %template.id, next_job_id = %next.id, "chained next occurrence");
            },
            Ok(None) => {},
            Err(e) => {
                // The periodic reconciliation pass will pick the template up again.
                warn!(template_id = %template.id, error = %e, "failed to schedule next occurrence");
            },
        }
    }
}

/// Build the generation request for a template job.
///
/// The window is anchored on the job's scheduled time, so an overdue job
/// still covers the period it was scheduled for.
fn template_request(template: &ReportTemplate, anchor: DateTime<Utc>) -> Result<ReportRequest> {
    let config = template.generation_config()?;
    let (frequency, tz) = match template.schedule()? {
        Some(schedule) => (
            schedule.frequency.parse::<Frequency>()?,
            resolve_timezone(&schedule.timezone),
        ),
        None => (Frequency::Daily, Tz::UTC),
    };
    let ReportWindow { start, end } = report_window(frequency, anchor, tz)?;
    Ok(ReportRequest {
        tenant_id: template.tenant_id.clone(),
        report_type: template.report_type.clone(),
        file_format: template.file_format.clone(),
        start_date: start,
        end_date: end,
        config,
    })
}

/// Build the generation request for a scheduled task.
///
/// Explicit dates win. Otherwise the window follows `period` (daily when
/// absent) in the task's timezone.
fn task_request(task: &ScheduledTask, now: DateTime<Utc>) -> Result<ReportRequest> {
    let report: TaskReportConfig = serde_json::from_value(task.report_config.clone())?;
    if report.report_type.trim().is_empty() {
        return Err(Error::validation("report_config.report_type is required"));
    }

    let window = match (report.start_date, report.end_date) {
        (Some(start), Some(end)) => {
            if start >= end {
                return Err(Error::validation("report_config.start_date must be before end_date"));
            }
            ReportWindow { start, end }
        },
        (None, None) => {
            let tz = report
                .timezone
                .as_deref()
                .map_or(Tz::UTC, resolve_timezone);
            report_window(report.period.unwrap_or(Frequency::Daily), now, tz)?
        },
        _ => {
            return Err(Error::validation(
                "report_config needs both start_date and end_date, or neither",
            ));
        },
    };

    let mut config = report.config;
    if !task.recipients.is_empty() {
        config.insert(
            "recipients".into(),
            Value::Array(task.recipients.iter().cloned().map(Value::String).collect()),
        );
    }

    Ok(ReportRequest {
        tenant_id: task.tenant_id.clone(),
        report_type: report.report_type,
        file_format: report.file_format,
        start_date: window.start,
        end_date: window.end,
        config,
    })
}


#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::{testing::RecordingGenerator, *},
        crate::store_memory::InMemoryStore,
        chrono::TimeZone,
        serde_json::json,
    };

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn template(id: &str, frequency: &str) -> ReportTemplate {
        ReportTemplate {
            id: id.into(),
            tenant_id: "acme".into(),
            name: id.into(),
            enabled: true,
            schedule_config: Some(format!(
                r#"{{"frequency":"{frequency}","time":"00:00","timezone":"UTC"}}"#
            )),
            report_type: "sales".into(),
            file_format: "xlsx".into(),
            config: Some(r#"{"region":"emea"}"#.into()),
        }
    }

    fn task(config: Value) -> ScheduledTask {
        let now = Utc::now();
        ScheduledTask {
            id: "task-1".into(),
            tenant_id: "acme".into(),
            task_name: "nightly usage".into(),
            cron_expression: "0 2 * * *".into(),
            report_config: config,
            recipients: vec!["ops@acme.test".into()],
            is_enabled: true,
            last_run_status: None,
            last_run_message: None,
            last_run_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn executor(store: &Arc<InMemoryStore>, generator: Arc<RecordingGenerator>) -> JobExecutor {
        let reconciler = Arc::new(TemplateReconciler::new(store.clone(), store.clone()));
        JobExecutor::new(
            store.clone(),
            store.clone(),
            store.clone(),
            generator,
            reconciler,
        )
    }

    #[tokio::test]
    async fn template_job_completes_and_chains_next() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_template(template("tpl-1", "daily"));
        let generator = Arc::new(RecordingGenerator::default());
        let exec = executor(&store, generator.clone());

        let job = ReportJob::for_template("acme", "tpl-1", utc(2025, 3, 12, 0));
        store.create_report_job(&job).await.unwrap();

        let done = exec.execute(job.clone()).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.report_id.as_deref(), Some("rep-1"));
        assert!(done.started_at.is_some());
        assert!(done.completed_at.is_some());
        assert_eq!(
            store.status_history(&job.id),
            vec![JobStatus::Pending, JobStatus::Running, JobStatus::Completed]
        );

        let requests = generator.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].report_type, "sales");
        assert_eq!(requests[0].file_format, "xlsx");
        assert_eq!(requests[0].start_date, utc(2025, 3, 11, 0));
        assert_eq!(requests[0].end_date, utc(2025, 3, 12, 0));
        assert_eq!(requests[0].config["region"], "emea");

        let pending = store.list_pending_jobs().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].template_id.as_deref(), Some("tpl-1"));
        assert!(pending[0].scheduled_at > Utc::now());
    }

    #[tokio::test]
    async fn generator_failure_marks_job_failed() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_template(template("tpl-1", "weekly"));
        let exec = executor(
            &store,
            Arc::new(RecordingGenerator::failing("renderer unavailable")),
        );

        let job = ReportJob::for_template("acme", "tpl-1", utc(2025, 3, 10, 0));
        store.create_report_job(&job).await.unwrap();

        let failed = exec.execute(job.clone()).await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.retry_count, 1);
        assert!(failed.report_id.is_none());
        assert!(
            failed
                .error_message
                .as_deref()
                .is_some_and(|m| m.contains("renderer unavailable"))
        );

        let stored = store.get_report_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored, failed);
        // No chained job after a failure.
        assert!(store.list_pending_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_template_fails_the_job() {
        let store = Arc::new(InMemoryStore::new());
        let exec = executor(&store, Arc::new(RecordingGenerator::default()));
        let job = ReportJob::for_template("acme", "gone", utc(2025, 3, 10, 0));
        store.create_report_job(&job).await.unwrap();

        let failed = exec.execute(job).await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.error_message.unwrap().contains("gone"));
    }

    #[tokio::test]
    async fn report_job_uses_existing_report_row() {
        let store = Arc::new(InMemoryStore::new());
        let generator = Arc::new(RecordingGenerator::default());
        let exec = executor(&store, generator.clone());
        let job = ReportJob::for_report("acme", "rep-42", utc(2025, 3, 10, 0));
        store.create_report_job(&job).await.unwrap();

        let done = exec.execute(job).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.report_id.as_deref(), Some("rep-42"));
        assert_eq!(generator.report_ids(), vec!["rep-42".to_string()]);
        assert!(generator.requests().is_empty());
    }

    #[tokio::test]
    async fn executing_a_finished_job_is_rejected() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_template(template("tpl-1", "daily"));
        let exec = executor(&store, Arc::new(RecordingGenerator::default()));
        let job = ReportJob::for_template("acme", "tpl-1", utc(2025, 3, 10, 0));
        store.create_report_job(&job).await.unwrap();

        let done = exec.execute(job).await.unwrap();
        let err = exec.execute(done.clone()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(
            store.get_report_job(&done.id).await.unwrap().unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn sweep_runs_only_due_jobs() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_template(template("tpl-1", "daily"));
        let exec = executor(&store, Arc::new(RecordingGenerator::default()))
            .with_max_concurrent_jobs(2);

        let now = utc(2025, 3, 12, 12);
        let due_a = ReportJob::for_report("acme", "r-a", utc(2025, 3, 12, 0));
        let due_b = ReportJob::for_report("acme", "r-b", now);
        let later = ReportJob::for_report("acme", "r-c", utc(2025, 3, 13, 0));
        for job in [&due_a, &due_b, &later] {
            store.create_report_job(job).await.unwrap();
        }

        let summary = exec.run_due_jobs(now).await.unwrap();
        assert_eq!(summary.due, 2);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.failed, 0);

        let pending = store.list_pending_jobs().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, later.id);
    }

    #[tokio::test]
    async fn sweep_counts_failures_without_stopping() {
        let store = Arc::new(InMemoryStore::new());
        let exec = executor(&store, Arc::new(RecordingGenerator::failing("down")));
        let now = utc(2025, 3, 12, 12);
        for id in ["r-1", "r-2", "r-3"] {
            store
                .create_report_job(&ReportJob::for_report("acme", id, utc(2025, 3, 12, 0)))
                .await
                .unwrap();
        }

        let summary = exec.run_due_jobs(now).await.unwrap();
        assert_eq!(summary.due, 3);
        assert_eq!(summary.failed, 3);
        assert!(
            store
                .jobs()
                .iter()
                .all(|j| j.status == JobStatus::Failed && j.retry_count == 1)
        );
    }

    #[tokio::test]
    async fn task_execution_records_success() {
        let store = Arc::new(InMemoryStore::new());
        let generator = Arc::new(RecordingGenerator::default());
        let exec = executor(&store, generator.clone());
        let task = task(json!({
            "report_type": "usage",
            "file_format": "csv",
            "period": "monthly",
            "timezone": "Europe/Berlin",
            "config": { "detail": "full" }
        }));
        store.create_task(&task).await.unwrap();

        let outcome = exec.execute_task(&task).await.unwrap();
        assert_eq!(outcome.status, JobStatus::Completed);
        assert!(outcome.report.is_some());

        let request = &generator.requests()[0];
        assert_eq!(request.report_type, "usage");
        assert_eq!(request.file_format, "csv");
        assert_eq!(request.config["detail"], "full");
        assert_eq!(request.config["recipients"], json!(["ops@acme.test"]));
        assert!(request.start_date < request.end_date);

        let stored = store.get_task("acme", "task-1").await.unwrap().unwrap();
        assert_eq!(stored.last_run_status, Some(JobStatus::Completed));
    }

    #[tokio::test]
    async fn task_with_explicit_dates_uses_them() {
        let store = Arc::new(InMemoryStore::new());
        let generator = Arc::new(RecordingGenerator::default());
        let exec = executor(&store, generator.clone());
        let task = task(json!({
            "report_type": "audit",
            "start_date": "2025-01-01T00:00:00Z",
            "end_date": "2025-02-01T00:00:00Z"
        }));
        store.create_task(&task).await.unwrap();

        exec.execute_task(&task).await.unwrap();
        let request = &generator.requests()[0];
        assert_eq!(request.start_date, utc(2025, 1, 1, 0));
        assert_eq!(request.end_date, utc(2025, 2, 1, 0));
        assert_eq!(request.file_format, "pdf");
    }

    #[tokio::test]
    async fn malformed_task_config_is_recorded_as_failure() {
        let store = Arc::new(InMemoryStore::new());
        let generator = Arc::new(RecordingGenerator::default());
        let exec = executor(&store, generator.clone());
        let task = task(json!({ "file_format": "pdf" }));
        store.create_task(&task).await.unwrap();

        let outcome = exec.execute_task(&task).await.unwrap();
        assert_eq!(outcome.status, JobStatus::Failed);
        assert!(generator.requests().is_empty());
        let stored = store.get_task("acme", "task-1").await.unwrap().unwrap();
        assert_eq!(stored.last_run_status, Some(JobStatus::Failed));
        assert!(stored.last_run_message.is_some());
    }

    #[test]
    fn half_specified_window_is_rejected() {
        let task = task(json!({
            "report_type": "audit",
            "start_date": "2025-01-01T00:00:00Z"
        }));
        assert!(task_request(&task, Utc::now()).unwrap_err().is_validation());
    }
}
