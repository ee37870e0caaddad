use std::path::{Path, PathBuf};

use {
    anyhow::{Context, bail},
    tracing::{debug, info, warn},
};

use crate::{env_subst::substitute_env, schema::ReportdConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["reportd.toml", "reportd.yaml", "reportd.yml", "reportd.json"];

/// Env var overriding `database.url`.
pub const ENV_DATABASE_URL: &str = "REPORTD_DATABASE_URL";
/// Env var overriding `generator.endpoint`.
pub const ENV_GENERATOR_ENDPOINT: &str = "REPORTD_GENERATOR_ENDPOINT";

/// Load config from `path` (format picked by extension), with `${ENV}`
/// substitution applied first.
pub fn load_config(path: &Path) -> anyhow::Result<ReportdConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path).with_context(|| format!("failed to parse {}", path.display()))
}

/// Load from an explicit path, or discover one; then apply env overrides.
///
/// An explicit path that cannot be loaded is an error. A discovered one that
/// cannot be loaded is logged and replaced by defaults.
pub fn load(path: Option<&Path>) -> anyhow::Result<ReportdConfig> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None => discover_and_load(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./reportd.{toml,yaml,yml,json}`
/// 2. `<user config dir>/reportd/reportd.{toml,yaml,yml,json}`
///
/// Returns `ReportdConfig::default()` if nothing is found or loading fails.
pub fn discover_and_load() -> ReportdConfig {
    let Some(path) = find_config_file() else {
        debug!("no config file found, using defaults");
        return ReportdConfig::default();
    };
    match load_config(&path) {
        Ok(config) => {
            info!(path = %path.display(), "loaded config");
            config
        },
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            ReportdConfig::default()
        },
    }
}

/// First existing config file in the standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    let local = CONFIG_FILENAMES.iter().map(PathBuf::from);
    let global = config_dir()
        .into_iter()
        .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name)));
    local.chain(global).find(|p| p.exists())
}

/// The user-global config directory (e.g. `~/.config/reportd/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "reportd").map(|d| d.config_dir().to_path_buf())
}

/// Apply `REPORTD_*` overrides from the process environment.
pub fn apply_env_overrides(config: &mut ReportdConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

pub(crate) fn apply_env_overrides_with(
    config: &mut ReportdConfig,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let set = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
    if let Some(url) = set(ENV_DATABASE_URL) {
        debug!(var = ENV_DATABASE_URL, "database url overridden from environment");
        config.database.url = url;
    }
    if let Some(endpoint) = set(ENV_GENERATOR_ENDPOINT) {
        debug!(var = ENV_GENERATOR_ENDPOINT, "generator endpoint overridden from environment");
        config.generator.endpoint = Some(endpoint);
    }
}

pub(crate) fn parse_config(raw: &str, path: &Path) -> anyhow::Result<ReportdConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => bail!("unsupported config format: .{ext}"),
    }
}
