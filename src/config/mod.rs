//! Monitor Configuration Module
//!
//! Cameras, capture resilience, posture tuning and alert policy, loaded from TOML.
//!
//! ## Loading Order
//!
//! 1. `--config PATH` on the command line
//! 2. `FALLWATCH_CONFIG` environment variable (path to TOML file)
//! 3. `fallwatch.toml` in the current working directory
//! 4. Built-in defaults (see [`defaults`])
//!
//! The loaded [`MonitorConfig`] is handed to [`crate::pipeline::Monitor`]
//! explicitly; there is no process-wide config instance.

mod monitor_config;
pub mod defaults;

pub use monitor_config::*;
