pub mod client;
pub mod error;
pub mod fetcher;
pub mod rate_budget;
pub mod retry;
pub mod token;
pub mod types;

pub use client::{AccountingApi, AccountingClient, IDEMPOTENCY_HEADER, TENANT_HEADER};
pub use error::{classify_response, extract_error_message, AccountingError, Result};
pub use fetcher::{FetchConfig, FetchFailure, RemoteSnapshot, RemoteStateFetcher};
pub use rate_budget::{BudgetUsage, RateBudgetConfig, RateLimitHeaders, TenantRateBudget};
pub use retry::{Backoff, Retried, RetryPolicy, RetryState, Retryable};
pub use token::{StaticToken, TokenProvider};
pub use types::{MutationOutcome, Page, TaskPayload};
