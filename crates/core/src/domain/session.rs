use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::execution::{ErrorKind, ExecutionResult};
use super::plan::{BlockedEntity, PlanAction};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Error,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    pub id: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl Step {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: StepStatus::Pending,
            result: None,
            error: None,
            started_at: None,
            ended_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Pending,
    Running,
    Completed,
    /// Finished, but at least one step or action failed
    CompletedWithErrors,
    /// Aborted by a fatal condition
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::CompletedWithErrors => "completed_with_errors",
            Self::Failed => "failed",
        }
    }
}

/// A failure that needs human attention.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailureDetail {
    pub entity_key: String,
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    pub message: String,
}

/// Outcome counters for a session.
///
/// `failures` and `not_found` are kept apart: parents missing from the active
/// remote set are expected and frequent, and must not raise alarms.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSummary {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub no_match: usize,
    pub idempotent_replays: usize,
    pub failed: usize,
    pub blocked: usize,
    pub not_attempted: usize,
    pub deferred_parents: usize,
    /// Deals whose quote failed validation
    #[serde(default)]
    pub invalid_quotes: usize,
    pub dry_run: bool,
    pub failures: Vec<FailureDetail>,
    pub not_found: Vec<String>,
}

impl SessionSummary {
    pub fn record(&mut self, result: &ExecutionResult, parent_key: &str) {
        if result.not_attempted {
            self.not_attempted += 1;
            return;
        }

        if result.success {
            match result.action {
                PlanAction::Create if result.is_idempotent_replay() => self.idempotent_replays += 1,
                PlanAction::Create => self.created += 1,
                PlanAction::Update => self.updated += 1,
                PlanAction::Skip => self.skipped += 1,
                PlanAction::NoMatch => self.record_not_found(parent_key),
            }
            return;
        }

        if result.action == PlanAction::NoMatch
            || result.error_kind.is_some_and(|k| k.is_benign())
        {
            self.record_not_found(parent_key);
            return;
        }

        self.failed += 1;
        self.failures.push(FailureDetail {
            entity_key: result.entity_key.clone(),
            kind: result.error_kind.unwrap_or(ErrorKind::Unknown),
            http_status: result.http_status,
            message: result.message.clone().unwrap_or_default(),
        });
    }

    pub fn record_blocked(&mut self, blocked: &BlockedEntity) {
        self.blocked += 1;
        self.failures.push(FailureDetail {
            entity_key: blocked.entity_key.clone(),
            kind: ErrorKind::TransientNetwork,
            http_status: None,
            message: blocked.reason.clone(),
        });
    }

    pub fn record_quote(&mut self, valid: bool) {
        if !valid {
            self.invalid_quotes += 1;
        }
    }

    fn record_not_found(&mut self, parent_key: &str) {
        self.no_match += 1;
        if !self.not_found.iter().any(|k| k == parent_key) {
            self.not_found.push(parent_key.to_string());
        }
    }

    /// Failures that need attention, excluding benign not-found outcomes.
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub tenant_id: String,
    pub steps: Vec<Step>,
    pub status: SessionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub summary: SessionSummary,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new<I, S>(tenant_id: impl Into<String>, step_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            steps: step_ids.into_iter().map(Step::new).collect(),
            status: SessionStatus::default(),
            started_at: None,
            ended_at: None,
            summary: SessionSummary::default(),
            created_at: Utc::now(),
        }
    }

    pub fn start(&mut self) {
        self.status = SessionStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_mut(&mut self, id: &str) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    /// Settle the session once every step has finished.
    pub fn finalize(&mut self, aborted: bool) {
        let any_step_failed = self.steps.iter().any(|s| s.status == StepStatus::Error);
        self.status = if aborted {
            SessionStatus::Failed
        } else if any_step_failed || self.summary.has_failures() {
            SessionStatus::CompletedWithErrors
        } else {
            SessionStatus::Completed
        };
        self.ended_at = Some(Utc::now());
    }
}
