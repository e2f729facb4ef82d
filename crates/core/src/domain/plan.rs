use serde::{Deserialize, Serialize};

use super::entity::{DesiredEntity, RemoteEntity};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    Create,
    Update,
    Skip,
    NoMatch,
}

impl PlanAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Skip => "skip",
            Self::NoMatch => "no_match",
        }
    }

    /// Whether executing this action issues a remote mutation.
    pub fn is_mutation(&self) -> bool {
        matches!(self, Self::Create | Self::Update)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionPlanItem {
    pub entity_key: String,
    pub action: PlanAction,
    /// Remote parent the mutation targets, when the parent matched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_remote_id: Option<String>,
    /// Remote entity id for updates and skips
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    pub desired: DesiredEntity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_current: Option<RemoteEntity>,
    /// Set on creates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub reason: String,
}

/// A desired entity that could not be planned because its parent's entities
/// failed to fetch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockedEntity {
    pub entity_key: String,
    pub parent_remote_id: String,
    pub desired: DesiredEntity,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconciliationPlan {
    pub items: Vec<ActionPlanItem>,
    #[serde(default)]
    pub blocked: Vec<BlockedEntity>,
}

impl ReconciliationPlan {
    pub fn count(&self, action: PlanAction) -> usize {
        self.items.iter().filter(|i| i.action == action).count()
    }

    pub fn mutations(&self) -> impl Iterator<Item = &ActionPlanItem> {
        self.items.iter().filter(|i| i.action.is_mutation())
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.blocked.is_empty()
    }
}
