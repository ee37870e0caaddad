//! Maps scheduled tasks to their live cron registrations.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use {
    serde::Serialize,
    tracing::{debug, error, info, warn},
};

#[cfg(feature = "metrics")]
use reportd_metrics::{gauge, tasks as task_metrics};

use crate::{
    Result,
    executor::JobExecutor,
    runtime::{CronHandler, CronRuntime, EntryId},
    store::TaskStore,
    types::ScheduledTask,
    validate::validate_cron_expression,
};

/// Outcome of [`TaskRegistry::sync`].
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SyncSummary {
    pub registered: usize,
    /// `(task_id, error)` for every task whose registration failed.
    pub failed: Vec<(String, String)>,
}

/// Holds at most one cron registration per task id.
pub struct TaskRegistry {
    runtime: Arc<dyn CronRuntime>,
    executor: Arc<JobExecutor>,
    tasks: Arc<dyn TaskStore>,
    handles: Mutex<HashMap<String, EntryId>>,
}

impl TaskRegistry {
    pub fn new(
        runtime: Arc<dyn CronRuntime>,
        executor: Arc<JobExecutor>,
        tasks: Arc<dyn TaskStore>,
    ) -> Self {
        Self {
            runtime,
            executor,
            tasks,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Register `task`, replacing any registration it already has.
    ///
    /// A disabled task ends up unregistered. An invalid cron expression is
    /// rejected before the existing registration is touched.
    pub fn add(&self, task: &ScheduledTask) -> Result<()> {
        validate_cron_expression(&task.cron_expression)?;
        if !task.is_enabled {
            if self.remove(&task.id) {
                debug!(task_id = %task.id, "task disabled, registration removed");
            }
            return Ok(());
        }

        let id = self
            .runtime
            .register(&task.cron_expression, self.handler_for(task))?;
        let previous = {
            let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
            handles.insert(task.id.clone(), id)
        };
        if let Some(old) = previous {
            self.runtime.unregister(old);
        }
        self.record_count();

        info!(
            task_id = %task.id,
            tenant_id = %task.tenant_id,
            cron = %task.cron_expression,
            entry = %id,
            "task registered"
        );
        Ok(())
    }

    /// Drop the registration for `task_id`. Returns `false` if there was none.
    pub fn remove(&self, task_id: &str) -> bool {
        let previous = {
            let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
            handles.remove(task_id)
        };
        let Some(id) = previous else {
            return false;
        };
        self.runtime.unregister(id);
        self.record_count();
        debug!(task_id, entry = %id, "task unregistered");
        true
    }

    /// Re-register after the task's cron expression or enabled flag changed.
    pub fn reload(&self, task: &ScheduledTask) -> Result<()> {
        self.remove(&task.id);
        self.add(task)
    }

    /// Register every enabled task in the store and drop registrations for
    /// tasks that are no longer enabled. Per-task failures are collected.
    pub async fn sync(&self) -> Result<SyncSummary> {
        let enabled = self.tasks.list_enabled_tasks().await?;
        let live: HashSet<&str> = enabled.iter().map(|t| t.id.as_str()).collect();

        let stale: Vec<String> = {
            let handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
            handles
                .keys()
                .filter(|id| !live.contains(id.as_str()))
                .cloned()
                .collect()
        };
        for task_id in &stale {
            self.remove(task_id);
        }

        let mut summary = SyncSummary::default();
        for task in &enabled {
            match self.add(task) {
                Ok(()) => summary.registered += 1,
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "failed to register task");
                    summary.failed.push((task.id.clone(), e.to_string()));
                },
            }
        }

        info!(
            registered = summary.registered,
            failed = summary.failed.len(),
            removed = stale.len(),
            "scheduled tasks synced"
        );
        Ok(summary)
    }

    /// Unregister everything.
    pub fn clear(&self) {
        let drained: Vec<EntryId> = {
            let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
            handles.drain().map(|(_, id)| id).collect()
        };
        for id in &drained {
            self.runtime.unregister(*id);
        }
        self.record_count();
        debug!(count = drained.len(), "task registrations cleared");
    }

    pub fn handle_count(&self) -> usize {
        self.handles.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_registered(&self, task_id: &str) -> bool {
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(task_id)
    }

    /// The handler re-reads the task on every fire so edits that have not
    /// been reloaded yet (a new report config, a disable) still apply.
    fn handler_for(&self, task: &ScheduledTask) -> CronHandler {
        let executor = Arc::clone(&self.executor);
        let tasks = Arc::clone(&self.tasks);
        let task_id = task.id.clone();
        let tenant_id = task.tenant_id.clone();

        Arc::new(move || {
            let executor = Arc::clone(&executor);
            let tasks = Arc::clone(&tasks);
            let task_id = task_id.clone();
            let tenant_id = tenant_id.clone();
            Box::pin(async move {
                let task = match tasks.get_task(&tenant_id, &task_id).await {
                    Ok(Some(task)) => task,
                    Ok(None) => {
                        warn!(task_id = %task_id, "scheduled task vanished, skipping run");
                        return;
                    },
                    Err(e) => {
                        error!(task_id = %task_id, error = %e, "failed to load scheduled task");
                        return;
                    },
                };
                if !task.is_enabled {
                    debug!(task_id = %task_id, "scheduled task disabled, skipping run");
                    return;
                }
                if let Err(e) = executor.execute_task(&task).await {
                    error!(task_id = %task_id, error = %e, "failed to record task execution");
                }
            })
        })
    }

    fn record_count(&self) {
        #[cfg(feature = "metrics")]
        gauge!(task_metrics::REGISTERED).set(self.handle_count() as f64);
    }
}
