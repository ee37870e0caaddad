//! Configuration validation.
//!
//! Checks a config file for syntax, unknown keys and values the daemon would
//! refuse or misbehave with, and reports each finding as a [`Diagnostic`].

use std::path::{Path, PathBuf};

use crate::{loader, schema::ReportdConfig};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// `syntax`, `unknown-field`, `type-error`, `schedule`, `database`,
    /// `generator` or `metrics`.
    pub category: &'static str,
    /// Dotted path, e.g. `scheduler.reconcile_schedule`.
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    pub fn new(
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

/// Known sections and their keys.
const KNOWN_KEYS: &[(&str, &[&str])] = &[
    ("scheduler", &[
        "reconcile_schedule",
        "pending_jobs_schedule",
        "reconcile_on_start",
        "max_concurrent_jobs",
    ]),
    ("database", &["url", "max_connections"]),
    ("generator", &["endpoint", "timeout_secs"]),
    ("metrics", &["enabled", "listen"]),
];

/// Validate the file at `path`, or the discovered config file if `None`.
#[must_use]
pub fn validate_file(path: Option<&Path>) -> ValidationResult {
    let Some(path) = path.map(Path::to_path_buf).or_else(loader::find_config_file) else {
        let mut result = validate(&ReportdConfig::default());
        result.diagnostics.insert(
            0,
            Diagnostic::new(
                Severity::Info,
                "syntax",
                "",
                "no config file found; using defaults",
            ),
        );
        return result;
    };

    let mut result = match std::fs::read_to_string(&path) {
        Ok(raw) => validate_str(&crate::env_subst::substitute_env(&raw), &path),
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("failed to read config file: {e}"),
            )],
            config_path: None,
        },
    };
    result.config_path = Some(path);
    result
}

/// Validate raw config text; the format is taken from `path`'s extension.
#[must_use]
pub fn validate_str(raw: &str, path: &Path) -> ValidationResult {
    let mut diagnostics = Vec::new();

    let is_toml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_none_or(|e| e == "toml");
    if is_toml {
        match toml::from_str::<toml::Value>(raw) {
            Ok(value) => check_unknown_fields(&value, &mut diagnostics),
            Err(e) => {
                diagnostics.push(Diagnostic::new(
                    Severity::Error,
                    "syntax",
                    "",
                    format!("TOML syntax error: {e}"),
                ));
                return ValidationResult {
                    diagnostics,
                    config_path: None,
                };
            },
        }
    }

    match loader::parse_config(raw, path) {
        Ok(config) => diagnostics.extend(validate(&config).diagnostics),
        Err(e) => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "type-error",
            "",
            format!("type error: {e}"),
        )),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

/// Semantic checks on a parsed config.
#[must_use]
pub fn validate(config: &ReportdConfig) -> ValidationResult {
    let mut diagnostics = Vec::new();

    for (path, expr) in [
        (
            "scheduler.reconcile_schedule",
            &config.scheduler.reconcile_schedule,
        ),
        (
            "scheduler.pending_jobs_schedule",
            &config.scheduler.pending_jobs_schedule,
        ),
    ] {
        let fields = expr.split_whitespace().count();
        if fields == 0 {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "schedule",
                path,
                "cron expression must not be empty",
            ));
        } else if fields != 5 {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "schedule",
                path,
                format!("cron expression must have 5 fields, found {fields}"),
            ));
        }
    }

    if config.scheduler.max_concurrent_jobs == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "schedule",
            "scheduler.max_concurrent_jobs",
            "must be at least 1",
        ));
    }

    if config.database.url.trim().is_empty() {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "database",
            "database.url",
            "database url must not be empty",
        ));
    }
    if config.database.max_connections == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "database",
            "database.max_connections",
            "must be at least 1",
        ));
    }

    if config.generator.timeout_secs == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "generator",
            "generator.timeout_secs",
            "timeout must be greater than zero",
        ));
    }
    match config.generator.endpoint.as_deref().map(str::trim) {
        None | Some("") => diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "generator",
            "generator.endpoint",
            "no report generator endpoint; every job execution will fail",
        )),
        Some(endpoint) if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") => {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "generator",
                "generator.endpoint",
                format!("endpoint must be an http(s) URL, got {endpoint:?}"),
            ));
        },
        Some(_) => {},
    }

    if let Some(listen) = config.metrics.listen.as_deref() {
        if !config.metrics.enabled {
            diagnostics.push(Diagnostic::new(
                Severity::Warning,
                "metrics",
                "metrics.listen",
                "listen address is ignored while metrics are disabled",
            ));
        }
        if listen.parse::<std::net::SocketAddr>().is_err() {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "metrics",
                "metrics.listen",
                format!("not a socket address: {listen:?}"),
            ));
        }
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn check_unknown_fields(value: &toml::Value, diagnostics: &mut Vec<Diagnostic>) {
    let Some(root) = value.as_table() else {
        return;
    };
    let sections: Vec<&str> = KNOWN_KEYS.iter().map(|(name, _)| *name).collect();

    for (section, body) in root {
        let Some((_, keys)) = KNOWN_KEYS.iter().find(|(name, _)| *name == section.as_str()) else {
            diagnostics.push(unknown_field(section, section, &sections));
            continue;
        };
        let Some(table) = body.as_table() else {
            continue;
        };
        for key in table.keys() {
            if !keys.contains(&key.as_str()) {
                diagnostics.push(unknown_field(&format!("{section}.{key}"), key, keys));
            }
        }
    }
}

fn unknown_field(path: &str, key: &str, candidates: &[&str]) -> Diagnostic {
    let message = match closest(key, candidates) {
        Some(hint) => format!("unknown field (did you mean \"{hint}\"?)"),
        None => "unknown field".into(),
    };
    Diagnostic::new(Severity::Error, "unknown-field", path, message)
}

/// Closest candidate within edit distance 3, if any.
fn closest<'a>(needle: &str, candidates: &[&'a str]) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (*c, edit_distance(needle, c)))
        .filter(|(_, d)| (1..=3).contains(d))
        .min_by_key(|(_, d)| *d)
        .map(|(c, _)| c)
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = diagonal + usize::from(ca != *cb);
            diagonal = row[j + 1];
            row[j + 1] = substitution.min(row[j] + 1).min(diagonal + 1);
        }
    }
    row[b.len()]
}
