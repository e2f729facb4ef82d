//! Paginated, retrying reader of remote collections.
//!
//! Parent listing is all-or-nothing: without it nothing can be planned.
//! Entity listing is isolated per parent, so one parent's failure is recorded
//! and its siblings are still fetched.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tasksync_core::{ErrorKind, RemoteEntity, RemoteParent};
use tracing::{debug, info, warn};

use crate::client::AccountingApi;
use crate::error::{AccountingError, Result};
use crate::retry::RetryPolicy;
use crate::types::Page;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Hard ceiling guarding against pagination that never ends.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Parents whose entities are fetched at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_page_size() -> u32 {
    50
}

fn default_max_pages() -> u32 {
    50
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    1000
}

fn default_concurrency() -> usize {
    5
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            concurrency: default_concurrency(),
        }
    }
}

impl FetchConfig {
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::reads()
            .with_max_attempts(self.max_attempts)
            .with_base_delay(Duration::from_millis(self.backoff_ms))
    }
}

/// A parent whose entities could not be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    pub parent_remote_id: String,
    pub kind: ErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

/// Entities fetched once per parent for one reconciliation run.
#[derive(Debug, Clone, Default)]
pub struct RemoteSnapshot {
    pub entities: HashMap<String, Vec<RemoteEntity>>,
    pub failures: HashMap<String, FetchFailure>,
}

impl RemoteSnapshot {
    pub fn entities_for(&self, parent_remote_id: &str) -> Option<&[RemoteEntity]> {
        self.entities.get(parent_remote_id).map(Vec::as_slice)
    }

    pub fn failure_for(&self, parent_remote_id: &str) -> Option<&FetchFailure> {
        self.failures.get(parent_remote_id)
    }

    /// First failure that must abort the whole session.
    pub fn fatal_failure(&self) -> Option<&FetchFailure> {
        self.failures.values().find(|f| f.kind.is_fatal())
    }

    pub fn entity_count(&self) -> usize {
        self.entities.values().map(Vec::len).sum()
    }
}

pub struct RemoteStateFetcher {
    api: Arc<dyn AccountingApi>,
    config: FetchConfig,
    policy: RetryPolicy,
}

impl RemoteStateFetcher {
    pub fn new(api: Arc<dyn AccountingApi>, config: FetchConfig) -> Self {
        let policy = config.retry_policy();
        Self {
            api,
            config,
            policy,
        }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// List every active parent. Any failure here is structural.
    pub async fn fetch_parents(&self) -> Result<Vec<RemoteParent>> {
        let api = self.api.clone();
        let parents = self
            .collect_pages("list_projects", |page| {
                let api = api.clone();
                let page_size = self.config.page_size;
                async move { api.list_projects(page, page_size).await }
            })
            .await?;

        let mut seen = HashSet::new();
        let parents: Vec<RemoteParent> = parents
            .into_iter()
            .filter(|p| seen.insert(p.remote_id.clone()))
            .collect();

        info!(tenant_id = %self.api.tenant_id(), count = parents.len(), "Fetched remote parents");
        Ok(parents)
    }

    /// Fetch the entities of each given parent, isolating failures per parent.
    pub async fn fetch_entities(&self, parent_ids: &[String]) -> RemoteSnapshot {
        let results: Vec<(String, Result<Vec<RemoteEntity>>)> = stream::iter(parent_ids.iter().cloned())
            .map(|parent_id| async move {
                let result = self.fetch_entities_for(&parent_id).await;
                (parent_id, result)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut snapshot = RemoteSnapshot::default();
        for (parent_id, result) in results {
            match result {
                Ok(entities) => {
                    snapshot.entities.insert(parent_id, entities);
                }
                Err(err) => {
                    warn!(parent = %parent_id, error = %err, "Failed to fetch entities for parent");
                    snapshot.failures.insert(
                        parent_id.clone(),
                        FetchFailure {
                            parent_remote_id: parent_id,
                            kind: err.kind(),
                            status: err.status(),
                            message: err.detail(),
                        },
                    );
                }
            }
        }

        info!(
            parents = parent_ids.len(),
            entities = snapshot.entity_count(),
            failures = snapshot.failures.len(),
            "Fetched remote entities"
        );
        snapshot
    }

    async fn fetch_entities_for(&self, parent_id: &str) -> Result<Vec<RemoteEntity>> {
        let api = self.api.clone();
        let result = self
            .collect_pages("list_tasks", |page| {
                let api = api.clone();
                let parent_id = parent_id.to_string();
                let page_size = self.config.page_size;
                async move { api.list_tasks(&parent_id, page, page_size).await }
            })
            .await;

        let entities = match result {
            Ok(entities) => entities,
            // A parent without a task collection simply has no tasks yet
            Err(AccountingError::NotFound(_)) => {
                debug!(parent = %parent_id, "Entity collection not found, treating as empty");
                Vec::new()
            }
            Err(err) => return Err(err),
        };

        let mut seen = HashSet::new();
        Ok(entities
            .into_iter()
            .filter(|e| seen.insert(e.remote_id.clone()))
            .collect())
    }

    async fn collect_pages<T, F, Fut>(&self, operation: &str, mut fetch_page: F) -> Result<Vec<T>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Page<T>>>,
    {
        let mut items = Vec::new();

        for page in 1..=self.config.max_pages {
            let batch = self
                .policy
                .run(operation, || fetch_page(page))
                .await
                .result?;

            let received = batch.items.len();
            items.extend(batch.items);

            let last_by_count = batch.page_count.is_some_and(|count| page >= count);
            if received < self.config.page_size as usize || last_by_count {
                return Ok(items);
            }
        }

        warn!(
            operation,
            max_pages = self.config.max_pages,
            items = items.len(),
            "Page ceiling reached, stopping pagination"
        );
        Ok(items)
    }
}
