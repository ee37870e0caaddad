//! CLI commands for scheduled task management.

use {
    anyhow::{Context, Result},
    clap::{Args, Subcommand},
    reportd_scheduler::{
        SchedulingEngine,
        types::{ScheduledTask, TaskCreate, TaskPatch},
    },
    serde_json::{Map, Value, json},
};

#[derive(Subcommand)]
pub enum TaskAction {
    /// List scheduled tasks.
    List {
        /// Only tasks of this tenant.
        #[arg(long)]
        tenant: Option<String>,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show one task as JSON.
    Show(TaskRef),
    /// Create a task.
    Add(AddArgs),
    /// Enable a task and register its cron trigger.
    Enable(TaskRef),
    /// Disable a task and drop its cron trigger.
    Disable(TaskRef),
    /// Flip a task between enabled and disabled.
    Toggle(TaskRef),
    /// Change a task's cron expression.
    Reschedule {
        #[command(flatten)]
        task: TaskRef,
        /// New 5-field cron expression.
        cron: String,
    },
    /// Delete a task.
    Delete(TaskRef),
    /// Run a task now, even if it is disabled.
    Run(TaskRef),
}

#[derive(Args)]
pub struct TaskRef {
    /// Tenant that owns the task.
    #[arg(long)]
    tenant: String,
    /// Task id.
    id: String,
}

#[derive(Args)]
pub struct AddArgs {
    #[arg(long)]
    tenant: String,
    /// Human-readable task name.
    #[arg(long)]
    name: String,
    /// 5-field cron expression, evaluated in UTC.
    #[arg(long)]
    cron: String,
    /// Report type passed to the generator.
    #[arg(long)]
    report_type: String,
    #[arg(long, default_value = "pdf")]
    file_format: String,
    /// Relative window: daily, weekly or monthly.
    #[arg(long)]
    period: Option<String>,
    /// IANA timezone the window is computed in.
    #[arg(long)]
    timezone: Option<String>,
    /// Recipient address; repeat for more than one.
    #[arg(long = "recipient")]
    recipients: Vec<String>,
    /// Extra generator config as a JSON object.
    #[arg(long)]
    config: Option<String>,
    /// Create the task disabled.
    #[arg(long)]
    disabled: bool,
}

impl AddArgs {
    fn into_create(self) -> Result<TaskCreate> {
        let mut report_config = Map::new();
        report_config.insert("report_type".into(), json!(self.report_type));
        report_config.insert("file_format".into(), json!(self.file_format));
        if let Some(period) = self.period {
            report_config.insert("period".into(), json!(period));
        }
        if let Some(tz) = self.timezone {
            report_config.insert("timezone".into(), json!(tz));
        }
        if let Some(raw) = self.config {
            let extra: Map<String, Value> =
                serde_json::from_str(&raw).context("--config must be a JSON object")?;
            report_config.insert("config".into(), Value::Object(extra));
        }
        Ok(TaskCreate {
            tenant_id: self.tenant,
            task_name: self.name,
            cron_expression: self.cron,
            report_config: Value::Object(report_config),
            recipients: self.recipients,
            is_enabled: !self.disabled,
        })
    }
}

pub async fn handle_tasks(engine: &SchedulingEngine, action: TaskAction) -> Result<()> {
    match action {
        TaskAction::List { tenant, json } => {
            let tasks = engine.list_tasks(tenant.as_deref()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else if tasks.is_empty() {
                println!("No scheduled tasks.");
            } else {
                for task in &tasks {
                    println!("{}", summary_line(task));
                }
            }
        },
        TaskAction::Show(r) => {
            let task = engine.get_task(&r.tenant, &r.id).await?;
            println!("{}", serde_json::to_string_pretty(&task)?);
        },
        TaskAction::Add(args) => {
            let task = engine.create_task(args.into_create()?).await?;
            println!("Created task {} ({})", task.id, task.cron_expression);
        },
        TaskAction::Enable(r) => set_enabled(engine, r, true).await?,
        TaskAction::Disable(r) => set_enabled(engine, r, false).await?,
        TaskAction::Toggle(r) => {
            let task = engine.toggle_task(&r.tenant, &r.id).await?;
            println!("{}", summary_line(&task));
        },
        TaskAction::Reschedule { task, cron } => {
            let updated = engine
                .update_task(&task.tenant, &task.id, TaskPatch {
                    cron_expression: Some(cron),
                    ..Default::default()
                })
                .await?;
            println!("{}", summary_line(&updated));
        },
        TaskAction::Delete(r) => {
            engine.delete_task(&r.tenant, &r.id).await?;
            println!("Deleted task {}", r.id);
        },
        TaskAction::Run(r) => {
            let outcome = engine.execute_task_now(&r.tenant, &r.id).await?;
            println!("{}: {}", outcome.status, outcome.message);
        },
    }
    Ok(())
}

async fn set_enabled(engine: &SchedulingEngine, r: TaskRef, enabled: bool) -> Result<()> {
    let task = engine
        .update_task(&r.tenant, &r.id, TaskPatch {
            is_enabled: Some(enabled),
            ..Default::default()
        })
        .await?;
    println!("{}", summary_line(&task));
    Ok(())
}

fn summary_line(task: &ScheduledTask) -> String {
    let state = if task.is_enabled {
        "enabled"
    } else {
        "disabled"
    };
    let last = match (&task.last_run_status, task.last_run_at) {
        (Some(status), Some(at)) => format!("last {status} at {}", at.to_rfc3339()),
        _ => "never run".into(),
    };
    format!(
        "  {id}  {tenant}/{name}  [{cron}]  {state}, {last}",
        id = task.id,
        tenant = task.tenant_id,
        name = task.task_name,
        cron = task.cron_expression,
    )
}
