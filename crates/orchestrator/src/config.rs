//! Run configuration.
//!
//! Every field has a default so a partial (or missing) configuration file
//! still yields a usable `SyncConfig`.

use std::path::PathBuf;

use accounting::{FetchConfig, RateBudgetConfig};
use crm::CrmConfig;
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};
use crate::executor::ExecutorConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub accounting: AccountingConfig,
    #[serde(default)]
    pub rate_limit: RateBudgetConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub crm: CrmConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

impl SyncConfig {
    pub fn validate(&self) -> Result<()> {
        self.rate_limit.validate().map_err(OrchestratorError::config)?;
        if self.accounting.page_size == 0 {
            return Err(OrchestratorError::config("accounting.page_size must be > 0"));
        }
        if self.orchestrator.max_parents_per_run == 0 {
            return Err(OrchestratorError::config(
                "orchestrator.max_parents_per_run must be > 0",
            ));
        }
        if self.executor.max_attempts == 0 {
            return Err(OrchestratorError::config("executor.max_attempts must be > 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountingConfig {
    #[serde(default = "default_accounting_url")]
    pub base_url: String,
    #[serde(default)]
    pub tenant_id: String,
    /// Environment variable holding the bearer token
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
}

fn default_accounting_url() -> String {
    "https://api.xero.com/projects.xro/2.0".to_string()
}

fn default_token_env() -> String {
    "TASKSYNC_ACCESS_TOKEN".to_string()
}

fn default_page_size() -> u32 {
    50
}

fn default_max_pages() -> u32 {
    50
}

fn default_fetch_concurrency() -> usize {
    5
}

impl Default for AccountingConfig {
    fn default() -> Self {
        Self {
            base_url: default_accounting_url(),
            tenant_id: String::new(),
            token_env: default_token_env(),
            currency: None,
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            fetch_concurrency: default_fetch_concurrency(),
        }
    }
}

impl AccountingConfig {
    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            page_size: self.page_size,
            max_pages: self.max_pages,
            concurrency: self.fetch_concurrency,
            ..FetchConfig::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Parents processed per run; the rest are deferred to a later run.
    #[serde(default = "default_max_parents")]
    pub max_parents_per_run: usize,
}

fn default_max_parents() -> usize {
    150
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_parents_per_run: default_max_parents(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("reports")
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}
