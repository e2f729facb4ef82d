//! Wire types for the accounting API.
//!
//! Remote payloads are normalised here, once, into the canonical records from
//! `tasksync_core`. Field spellings vary between endpoints and API versions
//! (`projectId`, `project_id`, `ProjectID`), so every field accepts its known
//! aliases.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::value::RawValue;
use tasksync_core::{DesiredEntity, Money, RemoteEntity, RemoteParent, TaskCategory};

use crate::error::{AccountingError, Result};

/// One page of a collection.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Total pages when the remote reports it
    pub page_count: Option<u32>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            page_count: None,
        }
    }

    pub fn with_page_count(mut self, page_count: u32) -> Self {
        self.page_count = Some(page_count);
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    #[serde(default, alias = "page_count")]
    pub page_count: Option<u32>,
    #[serde(default, alias = "item_count")]
    pub item_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct PagedResponse<T> {
    #[serde(default)]
    pub pagination: Option<Pagination>,
    #[serde(default = "Vec::new", alias = "Items", alias = "results")]
    pub items: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    #[serde(alias = "project_id", alias = "ProjectID")]
    pub project_id: String,
    #[serde(alias = "Name")]
    pub name: String,
    #[serde(default, alias = "project_code", alias = "ProjectCode")]
    pub project_code: Option<String>,
    #[serde(default, alias = "Status")]
    pub status: Option<String>,
}

impl ProjectRecord {
    pub fn into_remote(self) -> RemoteParent {
        RemoteParent {
            remote_id: self.project_id,
            name: self.name,
            code: self.project_code.filter(|c| !c.trim().is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AmountRecord {
    #[serde(default, alias = "Currency")]
    pub currency: Option<String>,
    #[serde(alias = "Value")]
    pub value: Box<RawValue>,
}

impl AmountRecord {
    /// Decode the literal text of the amount, never through `f64`.
    pub fn to_money(&self) -> Result<Money> {
        let literal = self.value.get().trim().trim_matches('"');
        Money::parse_major(literal)
            .map_err(|e| AccountingError::InvalidResponse(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    #[serde(alias = "task_id", alias = "TaskID")]
    pub task_id: String,
    #[serde(alias = "Name")]
    pub name: String,
    #[serde(default, alias = "Rate")]
    pub rate: Option<AmountRecord>,
    #[serde(default, alias = "charge_type", alias = "ChargeType")]
    pub charge_type: Option<String>,
    #[serde(default, alias = "estimate_minutes", alias = "EstimateMinutes")]
    pub estimate_minutes: Option<i64>,
}

impl TaskRecord {
    /// Normalise into the canonical record.
    ///
    /// An unknown charge type is an error rather than a default: guessing
    /// would turn an existing task into a spurious update.
    pub fn into_remote(self, parent_remote_id: &str) -> Result<RemoteEntity> {
        let rate = match &self.rate {
            Some(amount) => amount.to_money()?,
            None => Money::ZERO,
        };
        let category = match self.charge_type.as_deref() {
            Some(raw) => TaskCategory::parse(raw).ok_or_else(|| {
                AccountingError::InvalidResponse(format!(
                    "task {} has unknown charge type '{}'",
                    self.task_id, raw
                ))
            })?,
            None => TaskCategory::default(),
        };

        Ok(RemoteEntity {
            remote_id: self.task_id,
            parent_remote_id: parent_remote_id.to_string(),
            name: self.name,
            rate,
            duration_minutes: self.estimate_minutes.unwrap_or(0),
            category,
        })
    }
}

/// Full task resource sent on create and on (full-replacement) update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPayload {
    pub name: String,
    pub rate: Money,
    pub charge_type: TaskCategory,
    pub estimate_minutes: i64,
    pub currency: Option<String>,
}

impl TaskPayload {
    pub fn from_desired(desired: &DesiredEntity, currency: Option<&str>) -> Self {
        Self {
            name: desired.name.clone(),
            rate: desired.rate,
            charge_type: desired.category,
            estimate_minutes: desired.duration_minutes,
            currency: currency.map(str::to_string),
        }
    }
}

struct AmountPayload<'a> {
    currency: Option<&'a str>,
    value: Money,
}

impl Serialize for AmountPayload<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let literal = RawValue::from_string(self.value.to_major_string())
            .map_err(serde::ser::Error::custom)?;
        let fields = if self.currency.is_some() { 2 } else { 1 };
        let mut state = serializer.serialize_struct("Amount", fields)?;
        if let Some(currency) = self.currency {
            state.serialize_field("currency", currency)?;
        }
        state.serialize_field("value", &literal)?;
        state.end()
    }
}

impl Serialize for TaskPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Task", 4)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field(
            "rate",
            &AmountPayload {
                currency: self.currency.as_deref(),
                value: self.rate,
            },
        )?;
        state.serialize_field("chargeType", self.charge_type.as_str())?;
        state.serialize_field("estimateMinutes", &self.estimate_minutes)?;
        state.end()
    }
}

/// Result of an accepted mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationOutcome {
    pub status: u16,
    pub remote_id: Option<String>,
}
