use serde::{Deserialize, Serialize};

use super::plan::PlanAction;

/// Classification of every failure the pipeline can observe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimited,
    TransientNetwork,
    ValidationRejected,
    IdempotencyConflict,
    ParentNotFound,
    AuthExpired,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::TransientNetwork => "transient_network",
            Self::ValidationRejected => "validation_rejected",
            Self::IdempotencyConflict => "idempotency_conflict",
            Self::ParentNotFound => "parent_not_found",
            Self::AuthExpired => "auth_expired",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::TransientNetwork)
    }

    /// Outcomes that count as success even though the call did not return 2xx.
    pub fn is_soft_success(&self) -> bool {
        matches!(self, Self::IdempotencyConflict)
    }

    /// Expected conditions that must never be reported as failures.
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::ParentNotFound)
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AuthExpired)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionResult {
    pub entity_key: String,
    pub action: PlanAction,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    /// Mutation was planned but not sent
    #[serde(default)]
    pub dry_run: bool,
    /// Mutation was never sent because the session aborted first
    #[serde(default)]
    pub not_attempted: bool,
}

impl ExecutionResult {
    pub fn succeeded(entity_key: impl Into<String>, action: PlanAction) -> Self {
        Self {
            entity_key: entity_key.into(),
            action,
            success: true,
            http_status: None,
            error_kind: None,
            retries: 0,
            message: None,
            remote_id: None,
            dry_run: false,
            not_attempted: false,
        }
    }

    pub fn failed(
        entity_key: impl Into<String>,
        action: PlanAction,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            entity_key: entity_key.into(),
            action,
            success: false,
            http_status: None,
            error_kind: Some(kind),
            retries: 0,
            message: Some(message.into()),
            remote_id: None,
            dry_run: false,
            not_attempted: false,
        }
    }

    /// A mutation skipped because the session aborted before reaching it.
    pub fn not_attempted(entity_key: impl Into<String>, action: PlanAction) -> Self {
        Self {
            not_attempted: true,
            success: false,
            message: Some("not attempted: session aborted".to_string()),
            ..Self::succeeded(entity_key, action)
        }
    }

    /// Mark as planned only.
    pub fn as_dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn with_status(mut self, status: Option<u16>) -> Self {
        self.http_status = status;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_remote_id(mut self, remote_id: Option<String>) -> Self {
        self.remote_id = remote_id;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Soft success: the remote already holds the entity from an earlier attempt.
    pub fn is_idempotent_replay(&self) -> bool {
        self.success && self.error_kind == Some(ErrorKind::IdempotencyConflict)
    }

    /// Real failure requiring attention.
    pub fn is_failure(&self) -> bool {
        !self.success && !self.error_kind.is_some_and(|k| k.is_benign())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_classes() {
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(ErrorKind::TransientNetwork.is_retryable());
        assert!(!ErrorKind::ValidationRejected.is_retryable());
        assert!(ErrorKind::IdempotencyConflict.is_soft_success());
        assert!(ErrorKind::ParentNotFound.is_benign());
        assert!(ErrorKind::AuthExpired.is_fatal());
    }

    #[test]
    fn test_result_classification() {
        let replay = ExecutionResult {
            error_kind: Some(ErrorKind::IdempotencyConflict),
            http_status: Some(409),
            ..ExecutionResult::succeeded("k", PlanAction::Create)
        };
        assert!(replay.is_idempotent_replay());
        assert!(!replay.is_failure());

        let not_found = ExecutionResult::failed("k", PlanAction::NoMatch, ErrorKind::ParentNotFound, "gone");
        assert!(!not_found.is_failure());

        let rejected =
            ExecutionResult::failed("k", PlanAction::Update, ErrorKind::ValidationRejected, "bad rate")
                .with_status(Some(400));
        assert!(rejected.is_failure());
        assert_eq!(rejected.http_status, Some(400));
    }
}
