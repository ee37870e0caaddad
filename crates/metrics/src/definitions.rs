//! Metric names and histogram buckets.
//!
//! Names follow the Prometheus conventions: `_total` for counters,
//! `_seconds` for durations, plain nouns for gauges.

/// Template reconciliation passes
pub mod reconcile {
    /// Completed reconciliation passes
    pub const PASSES_TOTAL: &str = "reportd_reconcile_passes_total";
    /// Passes skipped because another pass was still running
    pub const SKIPPED_TOTAL: &str = "reportd_reconcile_skipped_total";
    /// Report jobs created by reconciliation
    pub const JOBS_CREATED_TOTAL: &str = "reportd_reconcile_jobs_created_total";
    /// Templates that could not be scheduled during a pass
    pub const ERRORS_TOTAL: &str = "reportd_reconcile_errors_total";
    /// Wall time of one pass
    pub const DURATION_SECONDS: &str = "reportd_reconcile_duration_seconds";
}

/// Report job execution
pub mod jobs {
    /// Jobs picked up for execution
    pub const EXECUTIONS_TOTAL: &str = "reportd_job_executions_total";
    /// Jobs that ended in `failed`
    pub const FAILURES_TOTAL: &str = "reportd_job_failures_total";
    /// Time from pickup to terminal status
    pub const EXECUTION_DURATION_SECONDS: &str = "reportd_job_execution_duration_seconds";
    /// Jobs due at the last sweep
    pub const DUE: &str = "reportd_jobs_due";
}

/// Scheduled (cron) tasks
pub mod tasks {
    /// Tasks with a live cron registration
    pub const REGISTERED: &str = "reportd_tasks_registered";
    /// Task firings, cron or manual
    pub const EXECUTIONS_TOTAL: &str = "reportd_task_executions_total";
    pub const FAILURES_TOTAL: &str = "reportd_task_failures_total";
}

pub mod buckets {
    use once_cell::sync::Lazy;

    /// Report generation duration buckets (in seconds)
    /// Covers 50ms to 10 minutes
    pub static JOB_DURATION: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0,
        ]
    });

    /// Reconciliation pass buckets (in seconds)
    /// Covers 1ms to 60s
    pub static RECONCILE_DURATION: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
        ]
    });
}

pub mod labels {
    /// `template` or `report`, by what a job generates from
    pub const KIND: &str = "kind";
    pub const STATUS: &str = "status";
    pub const FREQUENCY: &str = "frequency";
    pub const TENANT: &str = "tenant";
}
