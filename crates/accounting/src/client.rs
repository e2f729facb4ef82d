use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder, StatusCode};
use tasksync_core::{RemoteEntity, RemoteParent};
use tracing::{debug, error, warn};

use crate::error::{classify_response, AccountingError, Result};
use crate::rate_budget::{RateLimitHeaders, TenantRateBudget};
use crate::token::TokenProvider;
use crate::types::{MutationOutcome, Page, PagedResponse, ProjectRecord, TaskPayload, TaskRecord};

pub const TENANT_HEADER: &str = "Xero-tenant-id";
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Operations the reconciliation pipeline needs from the accounting API.
#[async_trait]
pub trait AccountingApi: Send + Sync {
    fn tenant_id(&self) -> &str;

    async fn list_projects(&self, page: u32, page_size: u32) -> Result<Page<RemoteParent>>;

    async fn list_tasks(
        &self,
        project_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Page<RemoteEntity>>;

    /// `POST` a new task; the remote ignores a replay with the same key.
    async fn create_task(
        &self,
        project_id: &str,
        task: &TaskPayload,
        idempotency_key: &str,
    ) -> Result<MutationOutcome>;

    /// `PUT` the full task resource.
    async fn update_task(
        &self,
        project_id: &str,
        task_id: &str,
        task: &TaskPayload,
    ) -> Result<MutationOutcome>;
}

/// REST client for one tenant of the accounting API.
///
/// Every request is gated by the shared [`TenantRateBudget`].
pub struct AccountingClient {
    base_url: String,
    tenant_id: String,
    client: Client,
    tokens: Arc<dyn TokenProvider>,
    budget: Arc<TenantRateBudget>,
    currency: Option<String>,
}

impl AccountingClient {
    pub fn new(
        base_url: impl Into<String>,
        tenant_id: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
        budget: Arc<TenantRateBudget>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tenant_id: tenant_id.into(),
            client: Client::new(),
            tokens,
            budget,
            currency: None,
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }

    pub fn currency(&self) -> Option<&str> {
        self.currency.as_deref()
    }

    pub fn budget(&self) -> &Arc<TenantRateBudget> {
        &self.budget
    }

    async fn send(&self, request: RequestBuilder, operation: &str) -> Result<reqwest::Response> {
        let waited = self.budget.wait_if_needed(&self.tenant_id).await;
        if !waited.is_zero() {
            debug!(
                tenant_id = %self.tenant_id,
                operation,
                waited_ms = waited.as_millis() as u64,
                "Rate budget delayed request"
            );
        }

        let token = self.tokens.bearer_token().await?;
        let response = request
            .bearer_auth(token)
            .header(TENANT_HEADER, &self.tenant_id)
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let limits = RateLimitHeaders::from_header_map(response.headers());
        self.budget.update_from_headers(&self.tenant_id, &limits);

        let status = response.status();
        debug!(tenant_id = %self.tenant_id, operation, status = status.as_u16(), "Accounting API response");

        if status.is_success() {
            return Ok(response);
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => {
                warn!(
                    tenant_id = %self.tenant_id,
                    operation,
                    status = status.as_u16(),
                    error = %err,
                    "Failed to read error response body"
                );
                String::new()
            }
        };
        let err = classify_response(status.as_u16(), limits.retry_after, &body);
        if matches!(err, AccountingError::Unknown { .. }) {
            error!(operation, status = status.as_u16(), body = %body, "Unclassified accounting API response");
        }
        Err(err)
    }

    async fn mutation_outcome(response: reqwest::Response) -> MutationOutcome {
        let status = response.status().as_u16();
        if status == StatusCode::NO_CONTENT.as_u16() {
            return MutationOutcome {
                status,
                remote_id: None,
            };
        }
        // The body is informative only; a created task is still created if it
        // cannot be parsed.
        let remote_id = response
            .json::<TaskRecord>()
            .await
            .ok()
            .map(|task| task.task_id);
        MutationOutcome { status, remote_id }
    }
}

#[async_trait]
impl AccountingApi for AccountingClient {
    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    async fn list_projects(&self, page: u32, page_size: u32) -> Result<Page<RemoteParent>> {
        let request = self
            .client
            .get(format!("{}/projects", self.base_url))
            .query(&[
                ("page", page.to_string()),
                ("pageSize", page_size.to_string()),
                ("states", "INPROGRESS".to_string()),
            ]);

        let response = self.send(request, "list_projects").await?;
        let body: PagedResponse<ProjectRecord> = response.json().await?;

        let mut result = Page::new(body.items.into_iter().map(ProjectRecord::into_remote).collect());
        if let Some(count) = body.pagination.and_then(|p| p.page_count) {
            result = result.with_page_count(count);
        }
        Ok(result)
    }

    async fn list_tasks(
        &self,
        project_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Page<RemoteEntity>> {
        let request = self
            .client
            .get(format!("{}/projects/{}/tasks", self.base_url, project_id))
            .query(&[("page", page.to_string()), ("pageSize", page_size.to_string())]);

        let response = self.send(request, "list_tasks").await?;
        let body: PagedResponse<TaskRecord> = response.json().await?;

        let items = body
            .items
            .into_iter()
            .map(|task| task.into_remote(project_id))
            .collect::<Result<Vec<_>>>()?;

        let mut result = Page::new(items);
        if let Some(count) = body.pagination.and_then(|p| p.page_count) {
            result = result.with_page_count(count);
        }
        Ok(result)
    }

    async fn create_task(
        &self,
        project_id: &str,
        task: &TaskPayload,
        idempotency_key: &str,
    ) -> Result<MutationOutcome> {
        let request = self
            .client
            .post(format!("{}/projects/{}/tasks", self.base_url, project_id))
            .header(IDEMPOTENCY_HEADER, idempotency_key)
            .json(task);

        let response = self.send(request, "create_task").await?;
        Ok(Self::mutation_outcome(response).await)
    }

    async fn update_task(
        &self,
        project_id: &str,
        task_id: &str,
        task: &TaskPayload,
    ) -> Result<MutationOutcome> {
        let request = self
            .client
            .put(format!(
                "{}/projects/{}/tasks/{}",
                self.base_url, project_id, task_id
            ))
            .json(task);

        let response = self.send(request, "update_task").await?;
        let mut outcome = Self::mutation_outcome(response).await;
        outcome.remote_id.get_or_insert_with(|| task_id.to_string());
        Ok(outcome)
    }
}
