//! Report scheduling and execution.
//!
//! Templates with a recurring schedule get one future pending job at a time,
//! ad-hoc tasks fire on their own cron expression, and every execution goes
//! through the same `pending -> running -> completed|failed` state machine.

pub mod engine;
pub mod error;
pub mod executor;
pub mod reconciler;
pub mod registry;
pub mod runtime;
pub mod schedule;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;
pub mod types;
pub mod validate;

pub use {
    engine::{EngineState, EngineStatus, SchedulingEngine},
    error::{Error, Result},
    executor::{JobExecutor, SweepSummary},
    reconciler::{ReconcileSummary, TemplateReconciler},
    registry::{SyncSummary, TaskRegistry},
    runtime::{CronRuntime, TokioCronRuntime},
};

/// Run database migrations for the scheduler crate.
///
/// Creates the `report_templates`, `report_jobs` and `scheduled_tasks`
/// tables. Call at startup when using [`store_sqlite::SqliteStore`] with a
/// shared pool.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
