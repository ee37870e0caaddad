//! Keeps exactly one future pending job per scheduled template.

use std::sync::Arc;

use {
    chrono::{DateTime, Utc},
    serde::Serialize,
    tokio::sync::Mutex,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use reportd_metrics::{counter, histogram, labels, reconcile as reconcile_metrics};

use crate::{
    Result,
    schedule::next_run,
    store::{JobStore, TemplateProvider},
    types::{ReportJob, ReportTemplate},
    validate::validate_schedule_shape,
};

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub templates: usize,
    pub created: usize,
    pub already_scheduled: usize,
    /// `(template_id, error)` for every template that could not be handled.
    pub failed: Vec<(String, String)>,
    /// Another pass was still running, so this one did nothing.
    pub skipped: bool,
}

pub struct TemplateReconciler {
    templates: Arc<dyn TemplateProvider>,
    jobs: Arc<dyn JobStore>,
    // Serialises passes within this process. Separate engine instances can
    // still race on the check-then-insert; nothing at the storage layer stops it.
    pass: Mutex<()>,
}

impl TemplateReconciler {
    pub fn new(templates: Arc<dyn TemplateProvider>, jobs: Arc<dyn JobStore>) -> Self {
        Self {
            templates,
            jobs,
            pass: Mutex::new(()),
        }
    }

    pub async fn reconcile(&self) -> Result<ReconcileSummary> {
        self.reconcile_at(Utc::now()).await
    }

    /// Run one pass as of `now`.
    ///
    /// Fetching templates or pending jobs fails the pass; anything that goes
    /// wrong for a single template is logged and collected in the summary.
    pub async fn reconcile_at(&self, now: DateTime<Utc>) -> Result<ReconcileSummary> {
        let Ok(_pass) = self.pass.try_lock() else {
            debug!("reconciliation already in progress, skipping");
            #[cfg(feature = "metrics")]
            counter!(reconcile_metrics::SKIPPED_TOTAL).increment(1);
            return Ok(ReconcileSummary {
                skipped: true,
                ..Default::default()
            });
        };

        #[cfg(feature = "metrics")]
        let started = std::time::Instant::now();

        let templates = self.templates.get_scheduled_templates().await?;
        // One snapshot per pass, not per template.
        let mut pending = self.jobs.list_pending_jobs().await?;

        let mut summary = ReconcileSummary {
            templates: templates.len(),
            ..Default::default()
        };

        for template in &templates {
            match self.ensure_scheduled(template, &pending, now).await {
                Ok(Some(job)) => {
                    summary.created += 1;
                    pending.push(job);
                },
                Ok(None) => summary.already_scheduled += 1,
                Err(e) => {
                    warn!(
                        template_id = %template.id,
                        tenant_id = %template.tenant_id,
                        error = %e,
                        "failed to schedule template"
                    );
                    summary.failed.push((template.id.clone(), e.to_string()));
                },
            }
        }

        #[cfg(feature = "metrics")]
        {
            counter!(reconcile_metrics::PASSES_TOTAL).increment(1);
            counter!(reconcile_metrics::ERRORS_TOTAL).increment(summary.failed.len() as u64);
            histogram!(reconcile_metrics::DURATION_SECONDS)
                .record(started.elapsed().as_secs_f64());
        }

        info!(
            templates = summary.templates,
            created = summary.created,
            already_scheduled = summary.already_scheduled,
            failed = summary.failed.len(),
            "template reconciliation finished"
        );
        Ok(summary)
    }

    /// Make sure `template` has its next occurrence queued.
    ///
    /// Used after a template job completes. Waits for a running pass instead
    /// of racing it.
    pub async fn schedule_next(
        &self,
        template: &ReportTemplate,
        now: DateTime<Utc>,
    ) -> Result<Option<ReportJob>> {
        let _pass = self.pass.lock().await;
        let pending = self.jobs.list_pending_jobs().await?;
        self.ensure_scheduled(template, &pending, now).await
    }

    async fn ensure_scheduled(
        &self,
        template: &ReportTemplate,
        pending: &[ReportJob],
        now: DateTime<Utc>,
    ) -> Result<Option<ReportJob>> {
        if !template.enabled {
            return Ok(None);
        }
        let Some(schedule) = template.schedule()? else {
            return Ok(None);
        };
        if pending
            .iter()
            .any(|job| job.is_future_pending_for(&template.id, now))
        {
            debug!(template_id = %template.id, "template already has a future job");
            return Ok(None);
        }

        validate_schedule_shape(&schedule)?;
        let scheduled_at = next_run(&schedule, now)?;
        let job = ReportJob::for_template(&template.tenant_id, &template.id, scheduled_at);
        self.jobs.create_report_job(&job).await?;

        #[cfg(feature = "metrics")]
        counter!(
            reconcile_metrics::JOBS_CREATED_TOTAL,
            labels::FREQUENCY => schedule.frequency.clone()
        )
        .increment(1);

        info!(
            job_id = %job.id,
            template_id = %template.id,
            tenant_id = %template.tenant_id,
            frequency = %schedule.frequency,
            scheduled_at = %scheduled_at,
            "scheduled report job"
        );
        Ok(Some(job))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{store_memory::InMemoryStore, types::JobStatus},
        chrono::TimeZone,
    };

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn template(id: &str, schedule: &str) -> ReportTemplate {
        ReportTemplate {
            id: id.into(),
            tenant_id: "acme".into(),
            name: id.into(),
            enabled: true,
            schedule_config: Some(schedule.into()),
            report_type: "sales".into(),
            file_format: "pdf".into(),
            config: None,
        }
    }

    const DAILY_MIDNIGHT: &str = r#"{"frequency":"daily","time":"00:00","timezone":"UTC"}"#;

    fn setup() -> (Arc<InMemoryStore>, TemplateReconciler) {
        let store = Arc::new(InMemoryStore::new());
        let reconciler = TemplateReconciler::new(store.clone(), store.clone());
        (store, reconciler)
    }

    #[tokio::test]
    async fn creates_job_for_unscheduled_template() {
        let (store, reconciler) = setup();
        store.insert_template(template("tpl-1", DAILY_MIDNIGHT));

        let now = utc(2025, 3, 12, 15);
        let summary = reconciler.reconcile_at(now).await.unwrap();
        assert_eq!(summary.created, 1);

        let jobs = store.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Pending);
        assert_eq!(jobs[0].template_id.as_deref(), Some("tpl-1"));
        assert_eq!(jobs[0].tenant_id, "acme");
        assert_eq!(jobs[0].scheduled_at, utc(2025, 3, 13, 0));
    }

    #[tokio::test]
    async fn second_pass_is_a_no_op() {
        let (store, reconciler) = setup();
        store.insert_template(template("tpl-1", DAILY_MIDNIGHT));
        store.insert_template(template(
            "tpl-2",
            r#"{"frequency":"weekly","time":"08:00","timezone":"Europe/Berlin"}"#,
        ));

        let now = utc(2025, 3, 12, 15);
        let first = reconciler.reconcile_at(now).await.unwrap();
        let second = reconciler.reconcile_at(now).await.unwrap();

        assert_eq!(first.created, 2);
        assert_eq!(second.created, 0);
        assert_eq!(second.already_scheduled, 2);
        assert_eq!(store.jobs().len(), 2);
    }

    #[tokio::test]
    async fn overdue_pending_job_does_not_count_as_scheduled() {
        let (store, reconciler) = setup();
        store.insert_template(template("tpl-1", DAILY_MIDNIGHT));
        let stale = ReportJob::for_template("acme", "tpl-1", utc(2025, 3, 10, 0));
        store.create_report_job(&stale).await.unwrap();

        let summary = reconciler.reconcile_at(utc(2025, 3, 12, 15)).await.unwrap();
        assert_eq!(summary.created, 1);
        assert_eq!(store.jobs().len(), 2);
    }

    #[tokio::test]
    async fn one_bad_template_does_not_block_others() {
        let (store, reconciler) = setup();
        store.insert_template(template("broken-json", "{not json"));
        store.insert_template(template(
            "bad-frequency",
            r#"{"frequency":"hourly","time":"00:00","timezone":"UTC"}"#,
        ));
        store.insert_template(template("good", DAILY_MIDNIGHT));

        let summary = reconciler.reconcile_at(utc(2025, 3, 12, 15)).await.unwrap();
        assert_eq!(summary.created, 1);
        assert_eq!(summary.failed.len(), 2);
        let failed: Vec<&str> = summary.failed.iter().map(|(id, _)| id.as_str()).collect();
        assert!(failed.contains(&"broken-json"));
        assert!(failed.contains(&"bad-frequency"));
        assert_eq!(store.jobs()[0].template_id.as_deref(), Some("good"));
    }

    #[tokio::test]
    async fn schedule_next_respects_existing_future_job() {
        let (store, reconciler) = setup();
        let tpl = template("tpl-1", DAILY_MIDNIGHT);
        let now = utc(2025, 3, 12, 15);

        let created = reconciler.schedule_next(&tpl, now).await.unwrap();
        assert!(created.is_some());
        let again = reconciler.schedule_next(&tpl, now).await.unwrap();
        assert!(again.is_none());
        assert_eq!(store.jobs().len(), 1);
    }

    #[tokio::test]
    async fn disabled_template_is_skipped_by_schedule_next() {
        let (store, reconciler) = setup();
        let mut tpl = template("tpl-1", DAILY_MIDNIGHT);
        tpl.enabled = false;
        assert!(
            reconciler
                .schedule_next(&tpl, utc(2025, 3, 12, 15))
                .await
                .unwrap()
                .is_none()
        );
        assert!(store.jobs().is_empty());
    }
}
