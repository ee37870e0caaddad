//! Configuration loading, validation and env substitution.
//!
//! Config files: `reportd.toml`, `reportd.yaml`, `reportd.yml` or `reportd.json`,
//! searched in `./` then the user config directory.
//!
//! Supports `${ENV_VAR}` substitution in the raw file text.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{
        ENV_DATABASE_URL, ENV_GENERATOR_ENDPOINT, apply_env_overrides, config_dir,
        discover_and_load, find_config_file, load, load_config,
    },
    schema::{DatabaseConfig, GeneratorConfig, MetricsConfig, ReportdConfig, SchedulerConfig},
    validate::{Diagnostic, Severity, ValidationResult},
};
