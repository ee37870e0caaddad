//! Facade that wires the runtime, reconciler, registry and executor together.

use std::sync::{Arc, Mutex};

use {
    chrono::Utc,
    reportd_config::SchedulerConfig,
    serde::Serialize,
    tracing::{debug, error, info, warn},
};

use crate::{
    Error, Result,
    executor::{JobExecutor, SweepSummary},
    reconciler::{ReconcileSummary, TemplateReconciler},
    registry::{SyncSummary, TaskRegistry},
    runtime::{CronHandler, CronRuntime, EntryId},
    store::{JobStore, ReportGenerator, TaskStore, TemplateProvider},
    types::{ScheduledTask, TaskCreate, TaskOutcome, TaskPatch, TaskReportConfig},
    validate::validate_cron_expression,
};

/// Lifecycle of a [`SchedulingEngine`].
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        })
    }
}

/// Point-in-time view of the engine.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EngineStatus {
    pub state: EngineState,
    pub runtime_running: bool,
    pub registered_tasks: usize,
    pub runtime_entries: usize,
}

pub struct SchedulingEngine {
    config: SchedulerConfig,
    runtime: Arc<dyn CronRuntime>,
    tasks: Arc<dyn TaskStore>,
    reconciler: Arc<TemplateReconciler>,
    executor: Arc<JobExecutor>,
    registry: TaskRegistry,
    state: Mutex<EngineState>,
    system_entries: Mutex<Vec<EntryId>>,
}

impl SchedulingEngine {
    pub fn new(
        config: SchedulerConfig,
        runtime: Arc<dyn CronRuntime>,
        jobs: Arc<dyn JobStore>,
        templates: Arc<dyn TemplateProvider>,
        tasks: Arc<dyn TaskStore>,
        generator: Arc<dyn ReportGenerator>,
    ) -> Self {
        let reconciler = Arc::new(TemplateReconciler::new(
            Arc::clone(&templates),
            Arc::clone(&jobs),
        ));
        let executor = Arc::new(
            JobExecutor::new(
                jobs,
                templates,
                Arc::clone(&tasks),
                generator,
                Arc::clone(&reconciler),
            )
            .with_max_concurrent_jobs(config.max_concurrent_jobs),
        );
        let registry = TaskRegistry::new(
            Arc::clone(&runtime),
            Arc::clone(&executor),
            Arc::clone(&tasks),
        );
        Self {
            config,
            runtime,
            tasks,
            reconciler,
            executor,
            registry,
            state: Mutex::new(EngineState::Stopped),
            system_entries: Mutex::new(Vec::new()),
        }
    }

    /// Build an engine whose job, template and task stores are one value.
    pub fn with_store<S>(
        config: SchedulerConfig,
        runtime: Arc<dyn CronRuntime>,
        store: Arc<S>,
        generator: Arc<dyn ReportGenerator>,
    ) -> Self
    where
        S: JobStore + TemplateProvider + TaskStore + 'static,
    {
        Self::new(
            config,
            runtime,
            store.clone(),
            store.clone(),
            store,
            generator,
        )
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: EngineState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Register every enabled task plus the reconcile and pending-job entries,
    /// then start the runtime. Only valid from `Stopped`.
    ///
    /// If anything fails the engine is rolled back to `Stopped`.
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state != EngineState::Stopped {
                return Err(Error::InvalidEngineState {
                    operation: "start",
                    state: state.to_string(),
                });
            }
            *state = EngineState::Starting;
        }

        match self.start_inner().await {
            Ok(()) => {
                self.set_state(EngineState::Running);
                info!(
                    tasks = self.registry.handle_count(),
                    reconcile = %self.config.reconcile_schedule,
                    pending_jobs = %self.config.pending_jobs_schedule,
                    "scheduling engine started"
                );
                Ok(())
            },
            Err(e) => {
                error!(error = %e, "scheduling engine failed to start");
                self.teardown();
                self.set_state(EngineState::Stopped);
                Err(e)
            },
        }
    }

    async fn start_inner(&self) -> Result<()> {
        self.registry.sync().await?;

        let reconciler = Arc::clone(&self.reconciler);
        let reconcile: CronHandler = Arc::new(move || {
            let reconciler = Arc::clone(&reconciler);
            Box::pin(async move {
                if let Err(e) = reconciler.reconcile().await {
                    error!(error = %e, "template reconciliation failed");
                }
            })
        });

        let executor = Arc::clone(&self.executor);
        let sweep: CronHandler = Arc::new(move || {
            let executor = Arc::clone(&executor);
            Box::pin(async move {
                if let Err(e) = executor.run_due_jobs(Utc::now()).await {
                    error!(error = %e, "pending-job sweep failed");
                }
            })
        });

        for (spec, handler) in [
            (&self.config.reconcile_schedule, reconcile),
            (&self.config.pending_jobs_schedule, sweep),
        ] {
            let id = self.runtime.register(spec, handler)?;
            self.system_entries
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(id);
        }

        if self.config.reconcile_on_start {
            // A broken template store should not keep ad-hoc tasks from running.
            if let Err(e) = self.reconciler.reconcile().await {
                warn!(error = %e, "initial template reconciliation failed");
            }
        }

        self.runtime.start();
        Ok(())
    }

    /// Stop firing new triggers and drop every registration.
    ///
    /// Handlers already running finish on their own. Stopping a stopped
    /// engine is a no-op.
    pub fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match *state {
                EngineState::Stopped => return Ok(()),
                EngineState::Running => *state = EngineState::Stopping,
                other => {
                    return Err(Error::InvalidEngineState {
                        operation: "stop",
                        state: other.to_string(),
                    });
                },
            }
        }
        self.teardown();
        self.set_state(EngineState::Stopped);
        info!("scheduling engine stopped");
        Ok(())
    }

    /// [`stop`](Self::stop), then wait for handlers that were already running
    /// to write their final job and task state.
    pub async fn shutdown(&self) -> Result<()> {
        self.stop()?;
        self.runtime.wait_idle().await;
        debug!("in-flight executions drained");
        Ok(())
    }

    fn teardown(&self) {
        self.runtime.stop();
        let entries: Vec<EntryId> = self
            .system_entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for id in entries {
            self.runtime.unregister(id);
        }
        self.registry.clear();
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            state: self.state(),
            runtime_running: self.runtime.is_running(),
            registered_tasks: self.registry.handle_count(),
            runtime_entries: self.runtime.entry_count(),
        }
    }

    /// Validate, persist and register a new task.
    pub async fn create_task(&self, create: TaskCreate) -> Result<ScheduledTask> {
        if create.tenant_id.trim().is_empty() {
            return Err(Error::validation("tenant_id is required"));
        }
        if create.task_name.trim().is_empty() {
            return Err(Error::validation("task_name is required"));
        }
        validate_cron_expression(&create.cron_expression)?;
        validate_report_config(&create.report_config)?;

        let now = Utc::now();
        let task = ScheduledTask {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: create.tenant_id,
            task_name: create.task_name,
            cron_expression: create.cron_expression,
            report_config: create.report_config,
            recipients: create.recipients,
            is_enabled: create.is_enabled,
            last_run_status: None,
            last_run_message: None,
            last_run_at: None,
            created_at: now,
            updated_at: now,
        };
        self.tasks.create_task(&task).await?;
        self.registry.add(&task)?;
        info!(task_id = %task.id, tenant_id = %task.tenant_id, "scheduled task created");
        Ok(task)
    }

    /// Apply `patch` and re-register if the trigger changed.
    pub async fn update_task(
        &self,
        tenant_id: &str,
        task_id: &str,
        patch: TaskPatch,
    ) -> Result<ScheduledTask> {
        let mut task = self.get_task(tenant_id, task_id).await?;
        let before = (task.cron_expression.clone(), task.is_enabled);

        if let Some(cron) = patch.cron_expression {
            validate_cron_expression(&cron)?;
            task.cron_expression = cron;
        }
        if let Some(report_config) = patch.report_config {
            validate_report_config(&report_config)?;
            task.report_config = report_config;
        }
        if let Some(name) = patch.task_name {
            if name.trim().is_empty() {
                return Err(Error::validation("task_name must not be empty"));
            }
            task.task_name = name;
        }
        if let Some(recipients) = patch.recipients {
            task.recipients = recipients;
        }
        if let Some(enabled) = patch.is_enabled {
            task.is_enabled = enabled;
        }
        task.updated_at = Utc::now();

        self.tasks.update_task(&task).await?;
        if before != (task.cron_expression.clone(), task.is_enabled) {
            self.registry.reload(&task)?;
        }
        info!(task_id, "scheduled task updated");
        Ok(task)
    }

    /// Flip `is_enabled` and register or unregister accordingly.
    pub async fn toggle_task(&self, tenant_id: &str, task_id: &str) -> Result<ScheduledTask> {
        let mut task = self.get_task(tenant_id, task_id).await?;
        task.is_enabled = !task.is_enabled;
        task.updated_at = Utc::now();
        self.tasks.update_task(&task).await?;
        self.registry.reload(&task)?;
        info!(task_id, enabled = task.is_enabled, "scheduled task toggled");
        Ok(task)
    }

    pub async fn delete_task(&self, tenant_id: &str, task_id: &str) -> Result<()> {
        self.tasks.delete_task(tenant_id, task_id).await?;
        self.registry.remove(task_id);
        info!(task_id, "scheduled task deleted");
        Ok(())
    }

    /// Run a task right away, whether or not it is enabled.
    pub async fn execute_task_now(&self, tenant_id: &str, task_id: &str) -> Result<TaskOutcome> {
        let task = self.get_task(tenant_id, task_id).await?;
        debug!(task_id, "manual task execution requested");
        self.executor.execute_task(&task).await
    }

    pub async fn get_task(&self, tenant_id: &str, task_id: &str) -> Result<ScheduledTask> {
        self.tasks
            .get_task(tenant_id, task_id)
            .await?
            .ok_or_else(|| Error::task_not_found(task_id))
    }

    pub async fn list_tasks(&self, tenant_id: Option<&str>) -> Result<Vec<ScheduledTask>> {
        self.tasks.list_tasks(tenant_id).await
    }

    /// Re-read enabled tasks from the store and bring registrations in line.
    ///
    /// Picks up tasks created or changed by another process.
    pub async fn sync_tasks(&self) -> Result<SyncSummary> {
        self.registry.sync().await
    }

    /// Run a reconciliation pass outside the regular schedule.
    pub async fn reconcile_now(&self) -> Result<ReconcileSummary> {
        self.reconciler.reconcile().await
    }

    /// Execute every pending job that is due, outside the regular schedule.
    pub async fn run_due_jobs_now(&self) -> Result<SweepSummary> {
        self.executor.run_due_jobs(Utc::now()).await
    }
}

fn validate_report_config(config: &serde_json::Value) -> Result<()> {
    let parsed: TaskReportConfig = serde_json::from_value(config.clone())
        .map_err(|e| Error::validation(format!("invalid report_config: {e}")))?;
    if parsed.report_type.trim().is_empty() {
        return Err(Error::validation("report_config.report_type is required"));
    }
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            executor::testing::RecordingGenerator,
            runtime::{TokioCronRuntime, testing::ManualCronRuntime},
            store_memory::InMemoryStore, types::{JobStatus, ReportTemplate},
        },
        serde_json::json,
        std::time::Duration,
    };

    struct Fixture {
        store: Arc<InMemoryStore>,
        runtime: Arc<ManualCronRuntime>,
        generator: Arc<RecordingGenerator>,
        engine: SchedulingEngine,
    }

    fn fixture(config: SchedulerConfig) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let runtime = Arc::new(ManualCronRuntime::default());
        let generator = Arc::new(RecordingGenerator::default());
        let engine =
            SchedulingEngine::with_store(config, runtime.clone(), store.clone(), generator.clone());
        Fixture {
            store,
            runtime,
            generator,
            engine,
        }
    }

    fn quiet() -> SchedulerConfig {
        SchedulerConfig {
            reconcile_on_start: false,
            ..Default::default()
        }
    }

    fn create(cron: &str) -> TaskCreate {
        TaskCreate {
            tenant_id: "acme".into(),
            task_name: "nightly usage".into(),
            cron_expression: cron.into(),
            report_config: json!({ "report_type": "usage" }),
            recipients: vec![],
            is_enabled: true,
        }
    }

    #[tokio::test]
    async fn start_registers_system_entries() {
        let f = fixture(quiet());
        f.engine.start().await.unwrap();

        assert_eq!(f.engine.state(), EngineState::Running);
        assert!(f.runtime.is_running());
        assert_eq!(
            f.runtime.specs(),
            vec!["* * * * *".to_string(), "0 * * * *".to_string()]
        );
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let f = fixture(quiet());
        f.engine.start().await.unwrap();
        let err = f.engine.start().await.unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidEngineState {
                operation: "start",
                ..
            }
        ));
        assert_eq!(f.runtime.entry_count(), 2);
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_clears_everything() {
        let f = fixture(quiet());
        f.engine.create_task(create("0 2 * * *")).await.unwrap();
        f.engine.start().await.unwrap();
        assert_eq!(f.runtime.entry_count(), 3);

        f.engine.stop().unwrap();
        f.engine.stop().unwrap();
        assert_eq!(f.engine.state(), EngineState::Stopped);
        assert!(!f.runtime.is_running());
        assert_eq!(f.runtime.entry_count(), 0);
        assert_eq!(f.engine.status().registered_tasks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_lets_running_task_record_its_outcome() {
        let store = Arc::new(InMemoryStore::new());
        // Slower than the task's firing interval, so an execution is mid-flight.
        let generator = Arc::new(RecordingGenerator::slow(Duration::from_secs(90)));
        let engine = SchedulingEngine::with_store(
            quiet(),
            Arc::new(TokioCronRuntime::new()),
            store,
            generator.clone(),
        );
        let task = engine.create_task(create("* * * * *")).await.unwrap();
        engine.start().await.unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!generator.requests().is_empty());
        let mid_flight = engine.get_task("acme", &task.id).await.unwrap();
        assert_eq!(mid_flight.last_run_status, Some(JobStatus::Running));

        engine.shutdown().await.unwrap();
        assert_eq!(engine.state(), EngineState::Stopped);
        let finished = engine.get_task("acme", &task.id).await.unwrap();
        assert_eq!(finished.last_run_status, Some(JobStatus::Completed));
    }

    #[tokio::test]
    async fn restart_after_stop_resyncs_tasks() {
        let f = fixture(quiet());
        f.engine.create_task(create("0 2 * * *")).await.unwrap();
        f.engine.start().await.unwrap();
        f.engine.stop().unwrap();
        f.engine.start().await.unwrap();

        let status = f.engine.status();
        assert_eq!(status.state, EngineState::Running);
        assert_eq!(status.registered_tasks, 1);
        assert_eq!(status.runtime_entries, 3);
    }

    #[tokio::test]
    async fn invalid_system_schedule_rolls_back() {
        let f = fixture(SchedulerConfig {
            reconcile_schedule: "hourly".into(),
            ..quiet()
        });
        f.engine.create_task(create("0 2 * * *")).await.unwrap();

        assert!(f.engine.start().await.unwrap_err().is_validation());
        assert_eq!(f.engine.state(), EngineState::Stopped);
        assert_eq!(f.runtime.entry_count(), 0);
        assert!(!f.runtime.is_running());
    }

    #[tokio::test]
    async fn create_task_rejects_bad_input() {
        let f = fixture(quiet());
        assert!(
            f.engine
                .create_task(create("0 2 * *"))
                .await
                .unwrap_err()
                .is_validation()
        );

        let mut missing_type = create("0 2 * * *");
        missing_type.report_config = json!({ "file_format": "pdf" });
        assert!(
            f.engine
                .create_task(missing_type)
                .await
                .unwrap_err()
                .is_validation()
        );
        assert!(f.engine.list_tasks(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn toggle_scenario_leaves_single_registration() {
        let f = fixture(quiet());
        f.engine.start().await.unwrap();
        let task = f.engine.create_task(create("0 2 * * *")).await.unwrap();

        let off = f.engine.toggle_task("acme", &task.id).await.unwrap();
        assert!(!off.is_enabled);
        assert_eq!(f.engine.status().registered_tasks, 0);

        let on = f.engine.toggle_task("acme", &task.id).await.unwrap();
        assert!(on.is_enabled);
        assert_eq!(f.engine.status().registered_tasks, 1);
        assert_eq!(
            f.runtime
                .specs()
                .iter()
                .filter(|s| s.as_str() == "0 2 * * *")
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn update_reregisters_on_cron_change() {
        let f = fixture(quiet());
        let task = f.engine.create_task(create("0 2 * * *")).await.unwrap();

        let updated = f
            .engine
            .update_task("acme", &task.id, TaskPatch {
                cron_expression: Some("30 6 * * Mon".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(updated.cron_expression, "30 6 * * Mon");
        assert_eq!(f.runtime.specs(), vec!["30 6 * * Mon".to_string()]);

        let rejected = f
            .engine
            .update_task("acme", &task.id, TaskPatch {
                cron_expression: Some("every day".into()),
                ..Default::default()
            })
            .await;
        assert!(rejected.unwrap_err().is_validation());
        assert_eq!(
            f.engine.get_task("acme", &task.id).await.unwrap().cron_expression,
            "30 6 * * Mon"
        );
    }

    #[tokio::test]
    async fn delete_removes_task_and_registration() {
        let f = fixture(quiet());
        let task = f.engine.create_task(create("0 2 * * *")).await.unwrap();
        f.engine.delete_task("acme", &task.id).await.unwrap();

        assert_eq!(f.runtime.entry_count(), 0);
        assert!(f.engine.get_task("acme", &task.id).await.unwrap_err().is_not_found());
        assert!(
            f.engine
                .delete_task("acme", &task.id)
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn execute_now_runs_disabled_task() {
        let f = fixture(quiet());
        let mut input = create("0 2 * * *");
        input.is_enabled = false;
        let task = f.engine.create_task(input).await.unwrap();

        let outcome = f.engine.execute_task_now("acme", &task.id).await.unwrap();
        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(f.generator.requests().len(), 1);
        assert!(
            f.engine
                .execute_task_now("globex", &task.id)
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn start_reconciles_templates_when_configured() {
        let f = fixture(SchedulerConfig::default());
        f.store.insert_template(ReportTemplate {
            id: "tpl-1".into(),
            tenant_id: "acme".into(),
            name: "daily sales".into(),
            enabled: true,
            schedule_config: Some(
                r#"{"frequency":"daily","time":"00:00","timezone":"UTC"}"#.into(),
            ),
            report_type: "sales".into(),
            file_format: "pdf".into(),
            config: None,
        });

        f.engine.start().await.unwrap();
        assert_eq!(f.store.list_pending_jobs().await.unwrap().len(), 1);

        // Firing every entry reconciles again (no-op) and sweeps (nothing due).
        f.runtime.fire_all().await;
        assert_eq!(f.store.list_pending_jobs().await.unwrap().len(), 1);
        assert!(f.generator.requests().is_empty());
    }

    #[tokio::test]
    async fn sync_picks_up_tasks_written_elsewhere() {
        let f = fixture(quiet());
        f.engine.start().await.unwrap();

        let now = Utc::now();
        f.store
            .create_task(&ScheduledTask {
                id: "task-ext".into(),
                tenant_id: "acme".into(),
                task_name: "written by cli".into(),
                cron_expression: "15 4 * * *".into(),
                report_config: json!({ "report_type": "usage" }),
                recipients: vec![],
                is_enabled: true,
                last_run_status: None,
                last_run_message: None,
                last_run_at: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        assert_eq!(f.engine.status().registered_tasks, 0);

        let summary = f.engine.sync_tasks().await.unwrap();
        assert_eq!(summary.registered, 1);
        assert!(f.runtime.specs().contains(&"15 4 * * *".to_string()));
    }

    #[tokio::test]
    async fn due_jobs_run_on_demand() {
        let f = fixture(quiet());
        let job = crate::types::ReportJob::for_report("acme", "rep-1", Utc::now());
        f.store.create_report_job(&job).await.unwrap();

        let summary = f.engine.run_due_jobs_now().await.unwrap();
        assert_eq!(summary.completed, 1);
        assert_eq!(
            f.store.get_report_job(&job.id).await.unwrap().unwrap().status,
            JobStatus::Completed
        );
    }
}
