use {anyhow::Result, clap::Subcommand, sqlx::SqlitePool};

use reportd_config::ReportdConfig;

use crate::app;

#[derive(Subcommand)]
pub enum DbAction {
    /// Run all pending database migrations.
    Migrate,
    /// Show row counts per table and job status.
    Stats,
}

pub async fn handle_db(config: &ReportdConfig, action: DbAction) -> Result<()> {
    // Opening the store applies migrations.
    let store = app::open_store(config).await?;
    match action {
        DbAction::Migrate => {
            println!("Migrations applied to {}", config.database.url);
        },
        DbAction::Stats => {
            for (label, count) in stats(store.pool()).await? {
                println!("  {label:<24} {count}");
            }
        },
    }
    store.pool().close().await;
    Ok(())
}

async fn stats(pool: &SqlitePool) -> Result<Vec<(String, i64)>> {
    let mut out = Vec::new();
    for table in ["report_templates", "scheduled_tasks", "report_jobs"] {
        // Use raw query to avoid compile-time checks
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT count(*) FROM {table}"))
            .fetch_one(pool)
            .await?;
        out.push((table.to_string(), count));
    }

    let by_status: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status, count(*) FROM report_jobs GROUP BY status ORDER BY status",
    )
    .fetch_all(pool)
    .await?;
    out.extend(
        by_status
            .into_iter()
            .map(|(status, count)| (format!("report_jobs[{status}]"), count)),
    );
    Ok(out)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        chrono::Utc,
        reportd_scheduler::{store::JobStore, types::ReportJob},
        tempfile::TempDir,
    };

    #[tokio::test]
    async fn migrations_create_tables_and_are_idempotent() {
        let temp = TempDir::new().unwrap();
        let db = temp.path().join("reportd.db");
        let mut config = ReportdConfig::default();
        config.database.url = format!("sqlite:{}?mode=rwc", db.display());

        handle_db(&config, DbAction::Migrate).await.unwrap();
        handle_db(&config, DbAction::Migrate).await.unwrap();
        assert!(db.exists());
    }

    #[tokio::test]
    async fn stats_count_jobs_by_status() {
        let store = reportd_scheduler::store_sqlite::SqliteStore::connect("sqlite::memory:", 1)
            .await
            .unwrap();
        for report in ["rep-1", "rep-2"] {
            store
                .create_report_job(&ReportJob::for_report("acme", report, Utc::now()))
                .await
                .unwrap();
        }

        let stats = stats(store.pool()).await.unwrap();
        assert!(stats.contains(&("report_jobs".to_string(), 2)));
        assert!(stats.contains(&("report_jobs[pending]".to_string(), 2)));
        assert!(stats.contains(&("scheduled_tasks".to_string(), 0)));
    }
}
