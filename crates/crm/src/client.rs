use std::sync::Arc;

use accounting::{RateLimitHeaders, RetryPolicy, TenantRateBudget};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{CrmError, Result};
use crate::types::{Deal, DealsResponse};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Portal (account) id; the rate budget is keyed by it.
    #[serde(default)]
    pub portal_id: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

fn default_base_url() -> String {
    "https://api.hubapi.com/crm/v3/objects".to_string()
}

fn default_api_key_env() -> String {
    "TASKSYNC_CRM_API_KEY".to_string()
}

fn default_page_size() -> u32 {
    100
}

fn default_max_pages() -> u32 {
    50
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            portal_id: String::new(),
            api_key_env: default_api_key_env(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
        }
    }
}

/// Read-only CRM client.
pub struct CrmClient {
    config: CrmConfig,
    api_key: String,
    client: Client,
    budget: Arc<TenantRateBudget>,
    policy: RetryPolicy,
}

impl CrmClient {
    pub fn new(config: CrmConfig, api_key: impl Into<String>, budget: Arc<TenantRateBudget>) -> Self {
        Self {
            config,
            api_key: api_key.into(),
            client: Client::new(),
            budget,
            policy: RetryPolicy::reads(),
        }
    }

    /// Build from config, reading the API key from the configured variable.
    pub fn from_env(config: CrmConfig, budget: Arc<TenantRateBudget>) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| CrmError::Config(format!("{} not set", config.api_key_env)))?;
        if api_key.trim().is_empty() {
            return Err(CrmError::Config(format!("{} is empty", config.api_key_env)));
        }
        Ok(Self::new(config, api_key.trim(), budget))
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn portal(&self) -> &str {
        if self.config.portal_id.is_empty() {
            "default"
        } else {
            &self.config.portal_id
        }
    }

    async fn fetch_page(&self, after: Option<&str>) -> Result<DealsResponse> {
        let url = format!("{}/deals", self.config.base_url.trim_end_matches('/'));
        let mut query = vec![
            ("limit", self.config.page_size.to_string()),
            ("associations", "line_items".to_string()),
        ];
        if let Some(after) = after {
            query.push(("after", after.to_string()));
        }

        self.budget.wait_if_needed(self.portal()).await;
        debug!(portal = %self.portal(), after = ?after, "Fetching CRM deals page");

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .query(&query)
            .send()
            .await?;

        let limits = RateLimitHeaders::from_header_map(response.headers());
        self.budget.update_from_headers(self.portal(), &limits);

        let status = response.status();
        if !status.is_success() {
            let body = match response.text().await {
                Ok(body) => body,
                Err(err) => {
                    warn!(
                        portal = %self.portal(),
                        status = status.as_u16(),
                        error = %err,
                        "Failed to read CRM error body"
                    );
                    String::new()
                }
            };
            return Err(CrmError::from_status(status.as_u16(), limits.retry_after, &body));
        }

        Ok(response.json().await?)
    }

    /// Fetch every deal, following the `after` cursor.
    pub async fn fetch_deals(&self) -> Result<Vec<Deal>> {
        let mut deals = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..self.config.max_pages {
            let after = cursor.clone();
            let page = self
                .policy
                .run("list_deals", || self.fetch_page(after.as_deref()))
                .await
                .result?;

            let next = page.next_cursor().map(str::to_string);
            deals.extend(page.results.into_iter().map(Deal::from));

            match next {
                Some(next) if Some(&next) != cursor.as_ref() => cursor = Some(next),
                Some(_) => {
                    warn!(portal = %self.portal(), "CRM cursor did not advance, stopping");
                    return Ok(deals);
                }
                None => {
                    info!(portal = %self.portal(), count = deals.len(), "Fetched CRM deals");
                    return Ok(deals);
                }
            }
        }

        warn!(
            portal = %self.portal(),
            max_pages = self.config.max_pages,
            count = deals.len(),
            "CRM page ceiling reached, stopping pagination"
        );
        Ok(deals)
    }
}
