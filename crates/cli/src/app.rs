//! Wires config, the SQLite store, the HTTP generator and the engine.

use std::sync::Arc;

use {
    anyhow::Context,
    reportd_config::ReportdConfig,
    reportd_scheduler::{SchedulingEngine, TokioCronRuntime, store_sqlite::SqliteStore},
    tracing::debug,
};

use crate::generator;

pub struct App {
    pub store: Arc<SqliteStore>,
    pub engine: SchedulingEngine,
}

/// Open the database (running migrations) and build a stopped engine.
pub async fn open(config: &ReportdConfig) -> anyhow::Result<App> {
    let store = Arc::new(open_store(config).await?);
    let generator = generator::from_config(&config.generator)?;
    let engine = SchedulingEngine::with_store(
        config.scheduler.clone(),
        Arc::new(TokioCronRuntime::new()),
        Arc::clone(&store),
        generator,
    );
    Ok(App { store, engine })
}

pub async fn open_store(config: &ReportdConfig) -> anyhow::Result<SqliteStore> {
    debug!(url = %config.database.url, "opening database");
    SqliteStore::connect(&config.database.url, config.database.max_connections)
        .await
        .with_context(|| format!("failed to open database {}", config.database.url))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, reportd_scheduler::EngineState, tempfile::TempDir};

    #[tokio::test]
    async fn open_builds_a_stopped_engine() {
        let temp = TempDir::new().unwrap();
        let mut config = ReportdConfig::default();
        config.database.url = format!(
            "sqlite:{}?mode=rwc",
            temp.path().join("reportd.db").display()
        );

        let app = open(&config).await.unwrap();
        assert_eq!(app.engine.state(), EngineState::Stopped);
        assert!(app.engine.list_tasks(None).await.unwrap().is_empty());
        app.store.pool().close().await;
    }
}
