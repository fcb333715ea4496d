pub mod calibrate;
pub mod config;
pub mod info;
pub mod masters;
pub mod run;
pub mod solve;

use std::path::Path;

use anyhow::{Context, Result};
use stellacap_core::config::AppConfig;

/// Load `path` if given, else the defaults.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("Invalid config {}", path.display())),
        None => Ok(AppConfig::default()),
    }
}
