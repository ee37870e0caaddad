use thiserror::Error;

use crate::types::JobStatus;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("invalid schedule: {message}")]
    Validation { message: String },

    #[error("invalid frequency: {frequency:?} (expected daily, weekly or monthly)")]
    InvalidFrequency { frequency: String },

    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("template not found: {template_id}")]
    TemplateNotFound { template_id: String },

    #[error("scheduled task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("report job not found: {job_id}")]
    JobNotFound { job_id: String },

    #[error("report job {job_id}: cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("cannot {operation} scheduling engine while {state}")]
    InvalidEngineState {
        operation: &'static str,
        state: String,
    },

    #[error("report generation failed: {message}")]
    Execution { message: String },

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_frequency(frequency: impl Into<String>) -> Self {
        Self::InvalidFrequency {
            frequency: frequency.into(),
        }
    }

    #[must_use]
    pub fn invalid_cron(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidCron {
            expression: expression.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn template_not_found(template_id: impl Into<String>) -> Self {
        Self::TemplateNotFound {
            template_id: template_id.into(),
        }
    }

    #[must_use]
    pub fn task_not_found(task_id: impl Into<String>) -> Self {
        Self::TaskNotFound {
            task_id: task_id.into(),
        }
    }

    #[must_use]
    pub fn job_not_found(job_id: impl Into<String>) -> Self {
        Self::JobNotFound {
            job_id: job_id.into(),
        }
    }

    #[must_use]
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Malformed input that the caller should fix (cron expression, schedule config).
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. } | Self::InvalidFrequency { .. } | Self::InvalidCron { .. }
        )
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::TemplateNotFound { .. } | Self::TaskNotFound { .. } | Self::JobNotFound { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_validation_errors() {
        assert!(Error::invalid_cron("* *", "expected 5 fields").is_validation());
        assert!(Error::invalid_frequency("hourly").is_validation());
        assert!(!Error::task_not_found("t1").is_validation());
    }

    #[test]
    fn classifies_not_found_errors() {
        assert!(Error::template_not_found("tpl").is_not_found());
        assert!(Error::job_not_found("j").is_not_found());
        assert!(!Error::execution("boom").is_not_found());
    }

    #[test]
    fn transition_message_names_both_states() {
        let err = Error::InvalidTransition {
            job_id: "j1".into(),
            from: JobStatus::Completed,
            to: JobStatus::Running,
        };
        assert_eq!(
            err.to_string(),
            "report job j1: cannot move from completed to running"
        );
    }
}
