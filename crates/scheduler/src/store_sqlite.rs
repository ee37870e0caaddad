//! SQLite-backed job, template and task store using sqlx.

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions, sqlite::SqliteRow},
};

use crate::{
    Error, Result,
    store::{JobStore, TaskStore, TemplateProvider},
    types::{JobStatus, ReportJob, ReportTemplate, ScheduledTask},
};

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// SQLite persistence for every store trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect with the default pool size and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::connect(database_url, DEFAULT_MAX_CONNECTIONS).await
    }

    /// Connect with its own pool and run migrations.
    ///
    /// For a pool shared with other tables use [`SqliteStore::with_pool`]
    /// after calling [`crate::run_migrations`].
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        crate::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Use an existing pool. Migrations must already be applied.
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or replace a template row. Templates are normally owned by
    /// template management; this exists for seeding and tooling.
    pub async fn upsert_template(&self, template: &ReportTemplate) -> Result<()> {
        sqlx::query(
            "INSERT INTO report_templates
                (id, tenant_id, name, enabled, schedule_config, report_type, file_format, config)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                tenant_id = excluded.tenant_id,
                name = excluded.name,
                enabled = excluded.enabled,
                schedule_config = excluded.schedule_config,
                report_type = excluded.report_type,
                file_format = excluded.file_format,
                config = excluded.config",
        )
        .bind(&template.id)
        .bind(&template.tenant_id)
        .bind(&template.name)
        .bind(template.enabled)
        .bind(&template.schedule_config)
        .bind(&template.report_type)
        .bind(&template.file_format)
        .bind(&template.config)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| Error::validation(format!("stored timestamp out of range: {ms}")))
}

fn opt_from_millis(ms: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    ms.map(from_millis).transpose()
}

fn job_from_row(row: &SqliteRow) -> Result<ReportJob> {
    let status: String = row.get("status");
    Ok(ReportJob {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        template_id: row.get("template_id"),
        report_id: row.get("report_id"),
        status: status.parse()?,
        scheduled_at: from_millis(row.get("scheduled_at"))?,
        started_at: opt_from_millis(row.get("started_at"))?,
        completed_at: opt_from_millis(row.get("completed_at"))?,
        error_message: row.get("error_message"),
        retry_count: u32::try_from(row.get::<i64, _>("retry_count")).unwrap_or_default(),
    })
}

fn template_from_row(row: &SqliteRow) -> ReportTemplate {
    ReportTemplate {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        name: row.get("name"),
        enabled: row.get("enabled"),
        schedule_config: row.get("schedule_config"),
        report_type: row.get("report_type"),
        file_format: row.get("file_format"),
        config: row.get("config"),
    }
}

fn task_from_row(row: &SqliteRow) -> Result<ScheduledTask> {
    let report_config: String = row.get("report_config");
    let recipients: String = row.get("recipients");
    let last_run_status = row
        .get::<Option<String>, _>("last_run_status")
        .map(|s| s.parse::<JobStatus>())
        .transpose()?;
    Ok(ScheduledTask {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        task_name: row.get("task_name"),
        cron_expression: row.get("cron_expression"),
        report_config: serde_json::from_str(&report_config)?,
        recipients: serde_json::from_str(&recipients)?,
        is_enabled: row.get("is_enabled"),
        last_run_status,
        last_run_message: row.get("last_run_message"),
        last_run_at: opt_from_millis(row.get("last_run_at"))?,
        created_at: from_millis(row.get("created_at"))?,
        updated_at: from_millis(row.get("updated_at"))?,
    })
}

const JOB_COLUMNS: &str = "id, tenant_id, template_id, report_id, status, scheduled_at, \
                           started_at, completed_at, error_message, retry_count";

const TASK_COLUMNS: &str = "id, tenant_id, task_name, cron_expression, report_config, recipients, \
                            is_enabled, last_run_status, last_run_message, last_run_at, \
                            created_at, updated_at";

#[async_trait]
impl JobStore for SqliteStore {
    async fn list_pending_jobs(&self) -> Result<Vec<ReportJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM report_jobs WHERE status = 'pending' ORDER BY scheduled_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn get_report_job(&self, id: &str) -> Result<Option<ReportJob>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM report_jobs WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn create_report_job(&self, job: &ReportJob) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO report_jobs ({JOB_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&job.id)
        .bind(&job.tenant_id)
        .bind(&job.template_id)
        .bind(&job.report_id)
        .bind(job.status.as_str())
        .bind(millis(job.scheduled_at))
        .bind(job.started_at.map(millis))
        .bind(job.completed_at.map(millis))
        .bind(&job.error_message)
        .bind(i64::from(job.retry_count))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_report_job(&self, job: &ReportJob) -> Result<()> {
        let result = sqlx::query(
            "UPDATE report_jobs SET
                report_id = ?, status = ?, scheduled_at = ?, started_at = ?,
                completed_at = ?, error_message = ?, retry_count = ?
             WHERE id = ?",
        )
        .bind(&job.report_id)
        .bind(job.status.as_str())
        .bind(millis(job.scheduled_at))
        .bind(job.started_at.map(millis))
        .bind(job.completed_at.map(millis))
        .bind(&job.error_message)
        .bind(i64::from(job.retry_count))
        .bind(&job.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::job_not_found(&job.id));
        }
        Ok(())
    }
}

#[async_trait]
impl TemplateProvider for SqliteStore {
    async fn get_scheduled_templates(&self) -> Result<Vec<ReportTemplate>> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, name, enabled, schedule_config, report_type, file_format, config
             FROM report_templates
             WHERE enabled = 1 AND schedule_config IS NOT NULL AND TRIM(schedule_config) <> ''",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(template_from_row).collect())
    }

    async fn get_template(&self, tenant_id: &str, id: &str) -> Result<Option<ReportTemplate>> {
        let row = sqlx::query(
            "SELECT id, tenant_id, name, enabled, schedule_config, report_type, file_format, config
             FROM report_templates
             WHERE id = ? AND tenant_id = ?",
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(template_from_row))
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn create_task(&self, task: &ScheduledTask) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO scheduled_tasks ({TASK_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&task.id)
        .bind(&task.tenant_id)
        .bind(&task.task_name)
        .bind(&task.cron_expression)
        .bind(serde_json::to_string(&task.report_config)?)
        .bind(serde_json::to_string(&task.recipients)?)
        .bind(task.is_enabled)
        .bind(task.last_run_status.map(JobStatus::as_str))
        .bind(&task.last_run_message)
        .bind(task.last_run_at.map(millis))
        .bind(millis(task.created_at))
        .bind(millis(task.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_task(&self, task: &ScheduledTask) -> Result<()> {
        let result = sqlx::query(
            "UPDATE scheduled_tasks SET
                task_name = ?, cron_expression = ?, report_config = ?, recipients = ?,
                is_enabled = ?, updated_at = ?
             WHERE id = ? AND tenant_id = ?",
        )
        .bind(&task.task_name)
        .bind(&task.cron_expression)
        .bind(serde_json::to_string(&task.report_config)?)
        .bind(serde_json::to_string(&task.recipients)?)
        .bind(task.is_enabled)
        .bind(millis(task.updated_at))
        .bind(&task.id)
        .bind(&task.tenant_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::task_not_found(&task.id));
        }
        Ok(())
    }

    async fn delete_task(&self, tenant_id: &str, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM scheduled_tasks WHERE id = ? AND tenant_id = ?")
            .bind(id)
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::task_not_found(id));
        }
        Ok(())
    }

    async fn get_task(&self, tenant_id: &str, id: &str) -> Result<Option<ScheduledTask>> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM scheduled_tasks WHERE id = ? AND tenant_id = ?"
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn list_tasks(&self, tenant_id: Option<&str>) -> Result<Vec<ScheduledTask>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM scheduled_tasks
             WHERE ? IS NULL OR tenant_id = ?
             ORDER BY created_at"
        ))
        .bind(tenant_id)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn list_enabled_tasks(&self) -> Result<Vec<ScheduledTask>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM scheduled_tasks WHERE is_enabled = 1 ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn update_last_execution(
        &self,
        task_id: &str,
        status: JobStatus,
        message: &str,
    ) -> Result<()> {
        let now = millis(Utc::now());
        let result = sqlx::query(
            "UPDATE scheduled_tasks SET
                last_run_status = ?, last_run_message = ?, last_run_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(message)
        .bind(now)
        .bind(now)
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::task_not_found(task_id));
        }
        Ok(())
    }
}
