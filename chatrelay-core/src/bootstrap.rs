//! Configuration loading

use std::path::Path;

use anyhow::{bail, Result};

use crate::Config;

/// Load configuration from config file or environment variables
///
/// Config file search order:
/// 1. `explicit_path` (the `--config` flag); it must exist
/// 2. CHATRELAY_CONFIG_PATH environment variable
/// 3. ./config.yaml (current working directory)
/// 4. /config/config.yaml (Kubernetes mount path)
/// 5. Fall back to environment variables only
///
/// Logging is not initialized yet when this runs, so progress goes to stderr.
pub fn load_config(explicit_path: Option<&str>) -> Result<Config> {
    let config_path = match explicit_path {
        Some(path) if !Path::new(path).exists() => {
            bail!("Config file {path} does not exist");
        }
        Some(path) => Some(path.to_string()),
        None => std::env::var("CHATRELAY_CONFIG_PATH")
            .ok()
            .filter(|p| Path::new(p).exists())
            .or_else(|| {
                ["config.yaml", "/config/config.yaml"]
                    .into_iter()
                    .find(|p| Path::new(p).exists())
                    .map(str::to_string)
            }),
    };

    let config = if let Some(path) = config_path {
        eprintln!("Loading config from {path}");
        Config::from_file(&path)
            .map_err(|e| anyhow::anyhow!("Failed to load {path}: {e}"))?
    } else {
        eprintln!("No config file found, using environment variables");
        Config::from_env().map_err(|e| anyhow::anyhow!("Failed to load config: {e}"))?
    };

    // Fail fast on misconfigurations
    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Config validation error: {error}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s): {}",
            errors.len(),
            errors.join("; ")
        ));
    }

    eprintln!("Configuration loaded and validated successfully");

    Ok(config)
}
