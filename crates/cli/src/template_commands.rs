//! CLI commands for seeding and inspecting report templates.

use std::path::{Path, PathBuf};

use {
    anyhow::{Context, Result},
    clap::Subcommand,
    reportd_scheduler::{
        store::TemplateProvider, store_sqlite::SqliteStore, types::ReportTemplate,
        validate::validate_schedule_config,
    },
};

#[derive(Subcommand)]
pub enum TemplateAction {
    /// List enabled templates that carry a schedule.
    List {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Insert or update templates from a JSON file (one object or an array).
    Import {
        /// Path to the JSON file.
        file: PathBuf,
    },
}

pub async fn handle_templates(store: &SqliteStore, action: TemplateAction) -> Result<()> {
    match action {
        TemplateAction::List { json } => {
            let templates = store.get_scheduled_templates().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&templates)?);
            } else if templates.is_empty() {
                println!("No scheduled templates.");
            } else {
                for t in &templates {
                    println!(
                        "  {}  {}/{}  {}",
                        t.id,
                        t.tenant_id,
                        t.name,
                        t.schedule_config.as_deref().unwrap_or_default()
                    );
                }
            }
        },
        TemplateAction::Import { file } => {
            let templates = read_templates(&file)?;
            for template in &templates {
                store.upsert_template(template).await?;
                println!("Imported template {}", template.id);
            }
        },
    }
    Ok(())
}

/// Parse and validate templates before anything is written.
fn read_templates(path: &Path) -> Result<Vec<ReportTemplate>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    let templates: Vec<ReportTemplate> = if value.is_array() {
        serde_json::from_value(value)?
    } else {
        vec![serde_json::from_value(value)?]
    };

    for template in &templates {
        if let Some(schedule) = template.schedule()? {
            validate_schedule_config(&schedule)
                .with_context(|| format!("template {}", template.id))?;
        }
    }
    Ok(templates)
}
