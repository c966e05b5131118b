//! Infrastructure - configuration, secrets, and metrics
//!
//! This module contains infrastructure concerns:
//! - `config` - Application configuration (TOML loading, defaults)
//! - `secrets` - Credentials from the environment
//! - `metrics` - Lock-free metrics collection

pub mod config;
pub mod metrics;
pub mod secrets;

// Re-export commonly used types
pub use config::Config;
pub use metrics::Metrics;
pub use secrets::{CredentialBundle, Secret};
