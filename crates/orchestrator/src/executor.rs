use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use accounting::{AccountingApi, AccountingError, MutationOutcome, RetryPolicy, TaskPayload};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tasksync_core::{ActionPlanItem, ErrorKind, ExecutionResult, PlanAction, ReconciliationPlan};
use tracing::{debug, error, info, warn};

/// Whether planned mutations are actually sent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    DryRun,
    Live,
}

impl ExecutionMode {
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }
}

/// Configuration for the executor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Parents executed at the same time
    #[serde(default = "default_parent_concurrency")]
    pub parent_concurrency: usize,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    1000
}

fn default_parent_concurrency() -> usize {
    5
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            parent_concurrency: default_parent_concurrency(),
        }
    }
}

impl ExecutorConfig {
    pub fn live() -> Self {
        Self {
            mode: ExecutionMode::Live,
            ..Self::default()
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::mutations()
            .with_max_attempts(self.max_attempts)
            .with_base_delay(Duration::from_millis(self.backoff_ms))
    }
}

/// Applies a reconciliation plan.
///
/// Items of one parent run strictly in plan order; parents run in small
/// concurrent batches. Every call goes through the client, and so through
/// the shared rate budget, on each attempt.
pub struct IdempotentExecutor {
    api: Arc<dyn AccountingApi>,
    config: ExecutorConfig,
    policy: RetryPolicy,
    currency: Option<String>,
    aborted: AtomicBool,
}

impl IdempotentExecutor {
    pub fn new(api: Arc<dyn AccountingApi>, config: ExecutorConfig) -> Self {
        let policy = config.retry_policy();
        Self {
            api,
            config,
            policy,
            currency: None,
            aborted: AtomicBool::new(false),
        }
    }

    pub fn with_currency(mut self, currency: Option<String>) -> Self {
        self.currency = currency;
        self
    }

    pub fn mode(&self) -> ExecutionMode {
        self.config.mode
    }

    /// Set once an `AuthExpired` failure has stopped execution.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub async fn execute(&self, plan: &ReconciliationPlan) -> Vec<ExecutionResult> {
        self.execute_with(plan, |_| {}).await
    }

    /// Execute the plan, calling `on_result` as each item settles.
    ///
    /// Results are returned grouped by parent, parents in first-appearance
    /// order.
    pub async fn execute_with<F>(&self, plan: &ReconciliationPlan, on_result: F) -> Vec<ExecutionResult>
    where
        F: Fn(&ExecutionResult) + Sync,
    {
        let groups = group_by_parent(&plan.items);
        info!(
            mode = ?self.config.mode,
            items = plan.items.len(),
            parents = groups.len(),
            "Executing reconciliation plan"
        );

        let on_result = &on_result;
        let results: Vec<Vec<ExecutionResult>> = stream::iter(groups)
            .map(|items| async move {
                let mut results = Vec::with_capacity(items.len());
                for item in items {
                    let result = self.execute_item(item).await;
                    on_result(&result);
                    results.push(result);
                }
                results
            })
            .buffered(self.config.parent_concurrency.max(1))
            .collect()
            .await;

        results.into_iter().flatten().collect()
    }

    /// Results for the plan without issuing any call.
    pub fn preview(&self, plan: &ReconciliationPlan) -> Vec<ExecutionResult> {
        plan.items.iter().map(Self::without_call).collect()
    }

    async fn execute_item(&self, item: &ActionPlanItem) -> ExecutionResult {
        if !item.action.is_mutation() {
            return Self::without_call(item);
        }
        if self.is_aborted() {
            return ExecutionResult::not_attempted(&item.entity_key, item.action);
        }
        if !self.config.mode.is_live() {
            return Self::without_call(item);
        }

        let Some(parent_id) = item.parent_remote_id.as_deref() else {
            return ExecutionResult::failed(
                &item.entity_key,
                item.action,
                ErrorKind::Unknown,
                "mutation planned without a parent",
            );
        };

        let payload = TaskPayload::from_desired(&item.desired, self.currency.as_deref());
        let outcome = match item.action {
            PlanAction::Create => {
                let Some(key) = item.idempotency_key.as_deref() else {
                    return ExecutionResult::failed(
                        &item.entity_key,
                        item.action,
                        ErrorKind::Unknown,
                        "create planned without an idempotency key",
                    );
                };
                debug!(entity = %item.entity_key, parent = %parent_id, idempotency_key = key, "Creating entity");
                self.policy
                    .run("create_task", || self.api.create_task(parent_id, &payload, key))
                    .await
            }
            _ => {
                let Some(remote_id) = item.remote_id.as_deref() else {
                    return ExecutionResult::failed(
                        &item.entity_key,
                        item.action,
                        ErrorKind::Unknown,
                        "update planned without a remote id",
                    );
                };
                debug!(entity = %item.entity_key, parent = %parent_id, remote_id, "Updating entity");
                self.policy
                    .run("update_task", || self.api.update_task(parent_id, remote_id, &payload))
                    .await
            }
        };

        match outcome.result {
            Ok(done) => Self::applied(item, done).with_retries(outcome.retries),
            Err(err) => self.rejected(item, err).with_retries(outcome.retries),
        }
    }

    fn without_call(item: &ActionPlanItem) -> ExecutionResult {
        match item.action {
            PlanAction::Skip => {
                ExecutionResult::succeeded(&item.entity_key, item.action)
                    .with_remote_id(item.remote_id.clone())
                    .with_message(item.reason.clone())
            }
            PlanAction::NoMatch => {
                let mut result = ExecutionResult::succeeded(&item.entity_key, item.action)
                    .with_message(item.reason.clone());
                result.error_kind = Some(ErrorKind::ParentNotFound);
                result
            }
            PlanAction::Create | PlanAction::Update => {
                ExecutionResult::succeeded(&item.entity_key, item.action)
                    .with_remote_id(item.remote_id.clone())
                    .with_message(format!("dry run: would {}", item.action.as_str()))
                    .as_dry_run()
            }
        }
    }

    fn applied(item: &ActionPlanItem, outcome: MutationOutcome) -> ExecutionResult {
        info!(entity = %item.entity_key, action = item.action.as_str(), status = outcome.status, "Mutation applied");
        ExecutionResult::succeeded(&item.entity_key, item.action)
            .with_status(Some(outcome.status))
            .with_remote_id(outcome.remote_id.or_else(|| item.remote_id.clone()))
    }

    fn rejected(&self, item: &ActionPlanItem, err: AccountingError) -> ExecutionResult {
        let kind = err.kind();

        // A replayed create already exists remotely; a conflicting PUT did not apply
        if kind.is_soft_success() && item.action == PlanAction::Create {
            info!(entity = %item.entity_key, status = ?err.status(), "Idempotent replay, entity already exists");
            let mut result = ExecutionResult::succeeded(&item.entity_key, item.action)
                .with_status(err.status())
                .with_message(err.detail());
            result.error_kind = Some(kind);
            return result;
        }

        if kind.is_fatal() && !self.aborted.swap(true, Ordering::SeqCst) {
            warn!(entity = %item.entity_key, "Authentication expired, stopping execution");
        }

        error!(
            entity = %item.entity_key,
            action = item.action.as_str(),
            kind = %kind,
            status = ?err.status(),
            message = %err.detail(),
            "Mutation failed"
        );
        ExecutionResult::failed(&item.entity_key, item.action, kind, err.detail()).with_status(err.status())
    }
}

/// Items grouped by parent, keeping plan order inside and across groups.
fn group_by_parent(items: &[ActionPlanItem]) -> Vec<Vec<&ActionPlanItem>> {
    let mut groups: Vec<(String, Vec<&ActionPlanItem>)> = Vec::new();
    for item in items {
        let key = item
            .parent_remote_id
            .clone()
            .unwrap_or_else(|| format!("unmatched:{}", item.desired.parent_key));
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, group)) => group.push(item),
            None => groups.push((key, vec![item])),
        }
    }
    groups.into_iter().map(|(_, group)| group).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use accounting::{Page, Result};
    use async_trait::async_trait;
    use tasksync_core::{DesiredEntity, Money, RemoteEntity, RemoteParent};

    /// Api for tests that never reach the network.
    struct Unreachable;

    #[async_trait]
    impl AccountingApi for Unreachable {
        fn tenant_id(&self) -> &str {
            "tenant-1"
        }

        async fn list_projects(&self, _page: u32, _page_size: u32) -> Result<Page<RemoteParent>> {
            unreachable!()
        }

        async fn list_tasks(&self, _project_id: &str, _page: u32, _page_size: u32) -> Result<Page<RemoteEntity>> {
            unreachable!()
        }

        async fn create_task(&self, _project_id: &str, _task: &TaskPayload, _key: &str) -> Result<MutationOutcome> {
            unreachable!()
        }

        async fn update_task(&self, _project_id: &str, _task_id: &str, _task: &TaskPayload) -> Result<MutationOutcome> {
            unreachable!()
        }
    }

    fn item(parent: Option<&str>, name: &str, action: PlanAction) -> ActionPlanItem {
        ActionPlanItem {
            entity_key: format!("P/{}", name),
            action,
            parent_remote_id: parent.map(str::to_string),
            remote_id: None,
            desired: DesiredEntity::new("P", name, Money::from_minor_units(100), 10),
            remote_current: None,
            idempotency_key: None,
            reason: "test".to_string(),
        }
    }

    #[test]
    fn test_group_by_parent_keeps_order() {
        let items = vec![
            item(Some("p-1"), "a", PlanAction::Create),
            item(Some("p-2"), "b", PlanAction::Create),
            item(Some("p-1"), "c", PlanAction::Update),
            item(None, "d", PlanAction::NoMatch),
        ];
        let groups = group_by_parent(&items);

        assert_eq!(groups.len(), 3);
        let names: Vec<Vec<&str>> = groups
            .iter()
            .map(|g| g.iter().map(|i| i.desired.name.as_str()).collect())
            .collect();
        assert_eq!(names, vec![vec!["a", "c"], vec!["b"], vec!["d"]]);
    }

    #[test]
    fn test_without_call_classification() {
        let no_match = IdempotentExecutor::without_call(&item(None, "x", PlanAction::NoMatch));
        assert!(no_match.success);
        assert_eq!(no_match.error_kind, Some(ErrorKind::ParentNotFound));
        assert!(!no_match.is_failure());

        let dry = IdempotentExecutor::without_call(&item(Some("p-1"), "x", PlanAction::Create));
        assert!(dry.dry_run);
        assert!(dry.success);
    }

    #[test]
    fn test_conflict_is_soft_only_for_creates() {
        let executor = IdempotentExecutor::new(Arc::new(Unreachable), ExecutorConfig::live());
        let conflict = || AccountingError::IdempotencyConflict {
            status: 409,
            message: "conflict".to_string(),
        };

        let create = executor.rejected(&item(Some("p-1"), "a", PlanAction::Create), conflict());
        assert!(create.success);
        assert!(create.is_idempotent_replay());

        let update = executor.rejected(&item(Some("p-1"), "b", PlanAction::Update), conflict());
        assert!(!update.success);
        assert!(update.is_failure());
        assert_eq!(update.error_kind, Some(ErrorKind::IdempotencyConflict));
        assert_eq!(update.http_status, Some(409));
    }

    #[test]
    fn test_mode_default_is_dry_run() {
        assert_eq!(ExecutorConfig::default().mode, ExecutionMode::DryRun);
        assert!(ExecutorConfig::live().mode.is_live());
    }
}
