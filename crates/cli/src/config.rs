use std::path::Path;

use anyhow::{Context, Result};
use orchestrator::{ExecutionMode, SyncConfig};

pub const DEFAULT_CONFIG_FILE: &str = "tasksync.toml";

/// Read `path`, falling back to defaults when the file does not exist.
pub async fn load(path: &Path) -> Result<SyncConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "No configuration file, using defaults");
        return Ok(SyncConfig::default());
    }

    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse(&content).with_context(|| format!("Invalid configuration in {}", path.display()))
}

pub fn parse(content: &str) -> Result<SyncConfig> {
    let config: SyncConfig = toml::from_str(content)?;
    Ok(config)
}

/// Command-line values win over the file.
pub struct Overrides {
    pub tenant: Option<String>,
    pub apply: bool,
}

pub fn apply_overrides(mut config: SyncConfig, overrides: Overrides) -> Result<SyncConfig> {
    if let Some(tenant) = overrides.tenant {
        config.accounting.tenant_id = tenant;
    }
    config.executor.mode = if overrides.apply {
        ExecutionMode::Live
    } else {
        ExecutionMode::DryRun
    };
    config.validate()?;
    Ok(config)
}
