mod app;
mod config_commands;
mod db_commands;
mod generator;
mod schedule_commands;
mod task_commands;
mod template_commands;

use std::path::PathBuf;

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    reportd_config::ReportdConfig,
    reportd_metrics::MetricsRecorderConfig,
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "reportd", version, about = "reportd: scheduled report generation")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (default: ./reportd.toml, then the user config directory).
    #[arg(long, short, global = true, env = "REPORTD_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduling daemon (default when no subcommand is provided).
    Run,
    /// Scheduled task management.
    Tasks {
        #[command(subcommand)]
        action: task_commands::TaskAction,
    },
    /// Report template seeding and inspection.
    Templates {
        #[command(subcommand)]
        action: template_commands::TemplateAction,
    },
    /// Run one reconciliation pass and execute due jobs, then exit.
    Tick,
    /// Preview upcoming occurrences of a schedule or cron expression.
    NextRun(schedule_commands::NextRunArgs),
    /// Database management.
    Db {
        #[command(subcommand)]
        action: db_commands::DbAction,
    },
    /// Configuration validation and inspection.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    let config_path = cli.config.as_deref();
    match cli.command {
        None | Some(Commands::Run) => {
            info!(version = env!("CARGO_PKG_VERSION"), "reportd starting");
            run_daemon(reportd_config::load(config_path)?).await
        },
        Some(Commands::Tasks { action }) => {
            let app = app::open(&reportd_config::load(config_path)?).await?;
            task_commands::handle_tasks(&app.engine, action).await
        },
        Some(Commands::Templates { action }) => {
            let store = app::open_store(&reportd_config::load(config_path)?).await?;
            template_commands::handle_templates(&store, action).await
        },
        Some(Commands::Tick) => tick(reportd_config::load(config_path)?).await,
        Some(Commands::NextRun(args)) => schedule_commands::handle_next_run(args),
        Some(Commands::Db { action }) => {
            db_commands::handle_db(&reportd_config::load(config_path)?, action).await
        },
        Some(Commands::Config { action }) => config_commands::handle_config(action, config_path),
    }
}

/// Start the engine and block until Ctrl-C. SIGHUP re-reads scheduled tasks
/// so edits made with `reportd tasks` in another process take effect.
async fn run_daemon(config: ReportdConfig) -> anyhow::Result<()> {
    let mut diagnostics = reportd_config::validate::validate(&config);
    reportd_scheduler::validate::check_scheduler_config(&config.scheduler, &mut diagnostics);
    for d in &diagnostics.diagnostics {
        warn!(path = %d.path, severity = %d.severity, "{}", d.message);
    }
    anyhow::ensure!(!diagnostics.has_errors(), "invalid configuration");

    let _metrics = reportd_metrics::init_metrics(metrics_config(&config)?)?;

    let app = app::open(&config).await?;
    app.engine.start().await?;

    wait_for_shutdown(&app.engine).await?;

    // Jobs already marked running must reach a terminal state before the
    // pool goes away.
    app.engine.shutdown().await?;
    app.store.pool().close().await;
    info!("reportd stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown(engine: &reportd_scheduler::SchedulingEngine) -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup())?;
    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res?;
                info!("shutdown requested");
                return Ok(());
            }
            _ = hangup.recv() => {
                match engine.sync_tasks().await {
                    Ok(summary) => info!(registered = summary.registered, "tasks re-synced"),
                    Err(e) => warn!(error = %e, "task re-sync failed"),
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_engine: &reportd_scheduler::SchedulingEngine) -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    Ok(())
}

/// One reconciliation pass plus one due-job sweep, for cron-driven deployments.
async fn tick(config: ReportdConfig) -> anyhow::Result<()> {
    let app = app::open(&config).await?;
    let reconciled = app.engine.reconcile_now().await?;
    let swept = app.engine.run_due_jobs_now().await?;
    println!(
        "templates: {} scheduled, {} already scheduled, {} failed",
        reconciled.created,
        reconciled.already_scheduled,
        reconciled.failed.len()
    );
    println!(
        "jobs: {} due, {} completed, {} failed",
        swept.due, swept.completed, swept.failed
    );
    app.store.pool().close().await;
    Ok(())
}

fn metrics_config(config: &ReportdConfig) -> anyhow::Result<MetricsRecorderConfig> {
    let listen = config
        .metrics
        .listen
        .as_deref()
        .map(str::parse::<std::net::SocketAddr>)
        .transpose()
        .context("metrics.listen is not a socket address")?;
    Ok(MetricsRecorderConfig {
        enabled: config.metrics.enabled,
        listen,
        global_labels: vec![("service".into(), "reportd".into())],
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, clap::CommandFactory};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_task_add() {
        let cli = Cli::try_parse_from([
            "reportd",
            "tasks",
            "add",
            "--tenant",
            "acme",
            "--name",
            "nightly",
            "--cron",
            "0 2 * * *",
            "--report-type",
            "usage",
            "--recipient",
            "a@acme.test",
            "--recipient",
            "b@acme.test",
        ])
        .unwrap();
        assert!(matches!(cli.command, Some(Commands::Tasks { .. })));
    }

    #[test]
    fn next_run_needs_a_schedule_source() {
        let cli = Cli::try_parse_from([
            "reportd",
            "next-run",
            "--frequency",
            "daily",
            "--cron",
            "* * * * *",
        ]);
        assert!(cli.is_err());
    }

    #[test]
    fn metrics_listen_is_parsed() {
        let mut config = ReportdConfig::default();
        config.metrics.enabled = true;
        config.metrics.listen = Some("127.0.0.1:9464".into());
        let metrics = metrics_config(&config).unwrap();
        assert!(metrics.enabled);
        assert_eq!(metrics.listen.unwrap().port(), 9464);

        config.metrics.listen = Some("nowhere".into());
        assert!(metrics_config(&config).is_err());
    }
}
