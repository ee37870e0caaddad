use std::path::Path;

use {anyhow::Result, clap::Subcommand};

use {
    reportd_config::validate::{self, Severity, ValidationResult},
    reportd_scheduler::validate::check_scheduler_config,
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors/warnings.
    Check {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
    /// Print the effective configuration (file, env overrides, defaults) as JSON.
    Show,
}

pub fn handle_config(action: ConfigAction, path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Check { verbose } => check(path, verbose),
        ConfigAction::Show => {
            let config = reportd_config::load(path)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        },
    }
}

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn check(path: Option<&Path>, verbose: bool) -> Result<()> {
    let result = diagnose(path);

    if let Some(ref path) = result.config_path {
        eprintln!("Checking {}\n", path.display());
    } else {
        eprintln!("No config file found; checking defaults.\n");
    }

    for line in render(&result, verbose) {
        eprintln!("{line}");
    }

    if result.has_errors() {
        std::process::exit(1);
    }
    Ok(())
}

/// File-level validation plus the scheduler's own cron parsing, so `check`
/// accepts exactly what `start` accepts.
fn diagnose(path: Option<&Path>) -> ValidationResult {
    let mut result = validate::validate_file(path);
    // Load failures are already reported as syntax diagnostics.
    if let Ok(config) = reportd_config::load(path) {
        check_scheduler_config(&config.scheduler, &mut result);
    }
    result
}

fn render(result: &ValidationResult, verbose: bool) -> Vec<String> {
    let mut lines = Vec::new();
    for d in &result.diagnostics {
        if d.severity == Severity::Info && !verbose {
            continue;
        }

        let (color, label) = match d.severity {
            Severity::Error => (RED, "error"),
            Severity::Warning => (YELLOW, "warning"),
            Severity::Info => (CYAN, "info"),
        };

        if d.path.is_empty() {
            lines.push(format!("  {BOLD}{color}{label}{RESET} {}", d.message));
        } else {
            lines.push(format!(
                "  {BOLD}{color}{label}{RESET} {}: {}",
                d.path, d.message
            ));
        }
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);
    if !lines.is_empty() {
        lines.push(String::new());
    }
    if errors == 0 && warnings == 0 {
        lines.push("No issues found.".into());
    } else {
        lines.push(format!("{errors} error(s), {warnings} warning(s)"));
    }
    lines
}
