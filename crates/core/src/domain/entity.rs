use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::money::Money;

/// How a task is charged on the accounting side.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskCategory {
    #[default]
    Time,
    Fixed,
    NonChargeable,
}

impl TaskCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Time => "TIME",
            Self::Fixed => "FIXED",
            Self::NonChargeable => "NON_CHARGEABLE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().replace([' ', '-'], "_").as_str() {
            "TIME" => Some(Self::Time),
            "FIXED" => Some(Self::Fixed),
            "NON_CHARGEABLE" | "NONCHARGEABLE" => Some(Self::NonChargeable),
            _ => None,
        }
    }
}

/// An entity as it should exist remotely, derived from timesheets or CRM data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DesiredEntity {
    /// Free-text parent reference, e.g. "NY25001 - Lobby refit"
    pub parent_key: String,
    pub name: String,
    pub rate: Money,
    pub duration_minutes: i64,
    pub category: TaskCategory,
    /// Caller-supplied key; derived at planning time when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl DesiredEntity {
    pub fn new(
        parent_key: impl Into<String>,
        name: impl Into<String>,
        rate: Money,
        duration_minutes: i64,
    ) -> Self {
        Self {
            parent_key: parent_key.into(),
            name: name.into(),
            rate,
            duration_minutes,
            category: TaskCategory::default(),
            idempotency_key: None,
        }
    }

    pub fn with_category(mut self, category: TaskCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// A parent collection (project) as listed by the accounting API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteParent {
    pub remote_id: String,
    pub name: String,
    /// Explicit project code when the remote exposes one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// An entity (task) as fetched from the accounting API for this run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteEntity {
    pub remote_id: String,
    pub parent_remote_id: String,
    pub name: String,
    pub rate: Money,
    pub duration_minutes: i64,
    pub category: TaskCategory,
}

impl RemoteEntity {
    /// True when every reconciled field matches the desired entity.
    pub fn matches(&self, desired: &DesiredEntity) -> bool {
        self.rate == desired.rate
            && self.duration_minutes == desired.duration_minutes
            && self.category == desired.category
    }
}

/// Namespace for idempotency keys derived by this tool.
const IDEMPOTENCY_NAMESPACE: Uuid = Uuid::from_u128(0x6c0b_5e7a_2f41_4d3a_9a1e_51c7_0d2b_8e64);

/// Deterministic idempotency key for a create.
pub struct IdempotencyKey;

impl IdempotencyKey {
    /// Derive a key from `(tenant, parent, entity name, run timestamp)`.
    ///
    /// The same run always reproduces the same key; a later run gets a new one.
    pub fn derive(
        tenant_id: &str,
        parent_remote_id: &str,
        entity_name: &str,
        run_timestamp: DateTime<Utc>,
    ) -> String {
        let material = format!(
            "{}|{}|{}|{}",
            tenant_id,
            parent_remote_id,
            normalize_name(entity_name),
            run_timestamp.timestamp_millis()
        );
        Uuid::new_v5(&IDEMPOTENCY_NAMESPACE, material.as_bytes()).to_string()
    }
}

/// Case-insensitive, whitespace-trimmed form used for name matching.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_category_parse() {
        assert_eq!(TaskCategory::parse("time"), Some(TaskCategory::Time));
        assert_eq!(TaskCategory::parse("Non-Chargeable"), Some(TaskCategory::NonChargeable));
        assert_eq!(TaskCategory::parse("FIXED"), Some(TaskCategory::Fixed));
        assert_eq!(TaskCategory::parse("hourly"), None);
    }

    #[test]
    fn test_category_serialization() {
        let json = serde_json::to_string(&TaskCategory::NonChargeable).unwrap();
        assert_eq!(json, "\"NON_CHARGEABLE\"");
    }

    #[test]
    fn test_remote_matches_desired() {
        let desired = DesiredEntity::new("NY25001", "Manhour", Money::from_minor_units(5000), 120);
        let mut remote = RemoteEntity {
            remote_id: "t-1".to_string(),
            parent_remote_id: "p-1".to_string(),
            name: "manhour".to_string(),
            rate: Money::from_minor_units(5000),
            duration_minutes: 120,
            category: TaskCategory::Time,
        };
        assert!(remote.matches(&desired));

        remote.duration_minutes = 90;
        assert!(!remote.matches(&desired));
    }

    #[test]
    fn test_idempotency_key_is_deterministic() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        let a = IdempotencyKey::derive("tenant", "p-1", "Manhour", ts);
        let b = IdempotencyKey::derive("tenant", "p-1", "  MANHOUR ", ts);
        assert_eq!(a, b);

        let other_run = IdempotencyKey::derive("tenant", "p-1", "Manhour", ts + chrono::Duration::seconds(1));
        assert_ne!(a, other_run);

        let other_parent = IdempotencyKey::derive("tenant", "p-2", "Manhour", ts);
        assert_ne!(a, other_parent);

        let other_tenant = IdempotencyKey::derive("tenant-2", "p-1", "Manhour", ts);
        assert_ne!(a, other_tenant);
    }
}
