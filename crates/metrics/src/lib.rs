//! Metrics collection and export for reportd.
//!
//! Components record through the `metrics` facade using the names in this
//! crate. With no recorder installed every call is a no-op. The `prometheus`
//! feature adds an exporter that renders the Prometheus text format and can
//! optionally serve it over HTTP.
//!
//! ```rust,ignore
//! use reportd_metrics::{counter, jobs, labels};
//!
//! counter!(jobs::EXECUTIONS_TOTAL, labels::KIND => "template").increment(1);
//! ```

mod definitions;
mod error;
mod recorder;

pub use {
    definitions::*,
    error::{Error, Result},
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

pub use metrics::{counter, gauge, histogram};
