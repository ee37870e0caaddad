//! In-memory stores for tests and dry runs.

use std::{collections::HashMap, sync::Mutex};

use {async_trait::async_trait, chrono::Utc};

use crate::{
    Error, Result,
    store::{JobStore, TaskStore, TemplateProvider},
    types::{JobStatus, ReportJob, ReportTemplate, ScheduledTask},
};

/// `HashMap`-backed implementation of every store trait. No persistence.
///
/// Every status written for a job is also appended to a per-job history so
/// tests can assert on the exact sequence of persisted states.
#[derive(Default)]
pub struct InMemoryStore {
    jobs: Mutex<HashMap<String, ReportJob>>,
    job_history: Mutex<HashMap<String, Vec<JobStatus>>>,
    templates: Mutex<HashMap<String, ReportTemplate>>,
    tasks: Mutex<HashMap<String, ScheduledTask>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_template(&self, template: ReportTemplate) {
        let mut templates = self.templates.lock().unwrap_or_else(|e| e.into_inner());
        templates.insert(template.id.clone(), template);
    }

    pub fn remove_template(&self, id: &str) {
        let mut templates = self.templates.lock().unwrap_or_else(|e| e.into_inner());
        templates.remove(id);
    }

    /// Snapshot of every job, in no particular order.
    pub fn jobs(&self) -> Vec<ReportJob> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.values().cloned().collect()
    }

    /// Statuses persisted for `job_id`, oldest first.
    pub fn status_history(&self, job_id: &str) -> Vec<JobStatus> {
        let history = self.job_history.lock().unwrap_or_else(|e| e.into_inner());
        history.get(job_id).cloned().unwrap_or_default()
    }

    fn record_status(&self, job: &ReportJob) {
        let mut history = self.job_history.lock().unwrap_or_else(|e| e.into_inner());
        history.entry(job.id.clone()).or_default().push(job.status);
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn list_pending_jobs(&self) -> Result<Vec<ReportJob>> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let mut pending: Vec<ReportJob> = jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|j| j.scheduled_at);
        Ok(pending)
    }

    async fn get_report_job(&self, id: &str) -> Result<Option<ReportJob>> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(jobs.get(id).cloned())
    }

    async fn create_report_job(&self, job: &ReportJob) -> Result<()> {
        {
            let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
            if jobs.contains_key(&job.id) {
                return Err(Error::validation(format!("duplicate job id: {}", job.id)));
            }
            jobs.insert(job.id.clone(), job.clone());
        }
        self.record_status(job);
        Ok(())
    }

    async fn update_report_job(&self, job: &ReportJob) -> Result<()> {
        {
            let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
            if !jobs.contains_key(&job.id) {
                return Err(Error::job_not_found(&job.id));
            }
            jobs.insert(job.id.clone(), job.clone());
        }
        self.record_status(job);
        Ok(())
    }
}

#[async_trait]
impl TemplateProvider for InMemoryStore {
    async fn get_scheduled_templates(&self) -> Result<Vec<ReportTemplate>> {
        let templates = self.templates.lock().unwrap_or_else(|e| e.into_inner());
        Ok(templates
            .values()
            .filter(|t| {
                t.enabled
                    && t
                        .schedule_config
                        .as_deref()
                        .is_some_and(|s| !s.trim().is_empty())
            })
            .cloned()
            .collect())
    }

    async fn get_template(&self, tenant_id: &str, id: &str) -> Result<Option<ReportTemplate>> {
        let templates = self.templates.lock().unwrap_or_else(|e| e.into_inner());
        Ok(templates
            .get(id)
            .filter(|t| t.tenant_id == tenant_id)
            .cloned())
    }
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn create_task(&self, task: &ScheduledTask) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn update_task(&self, task: &ScheduledTask) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if !tasks.contains_key(&task.id) {
            return Err(Error::task_not_found(&task.id));
        }
        tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn delete_task(&self, tenant_id: &str, id: &str) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        match tasks.get(id) {
            Some(t) if t.tenant_id == tenant_id => {
                tasks.remove(id);
                Ok(())
            },
            _ => Err(Error::task_not_found(id)),
        }
    }

    async fn get_task(&self, tenant_id: &str, id: &str) -> Result<Option<ScheduledTask>> {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        Ok(tasks.get(id).filter(|t| t.tenant_id == tenant_id).cloned())
    }

    async fn list_tasks(&self, tenant_id: Option<&str>) -> Result<Vec<ScheduledTask>> {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<ScheduledTask> = tasks
            .values()
            .filter(|t| tenant_id.is_none_or(|tenant| t.tenant_id == tenant))
            .cloned()
            .collect();
        list.sort_by_key(|t| t.created_at);
        Ok(list)
    }

    async fn list_enabled_tasks(&self) -> Result<Vec<ScheduledTask>> {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        Ok(tasks.values().filter(|t| t.is_enabled).cloned().collect())
    }

    async fn update_last_execution(
        &self,
        task_id: &str,
        status: JobStatus,
        message: &str,
    ) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| Error::task_not_found(task_id))?;
        let now = Utc::now();
        task.last_run_status = Some(status);
        task.last_run_message = Some(message.to_string());
        task.last_run_at = Some(now);
        task.updated_at = now;
        Ok(())
    }
}
