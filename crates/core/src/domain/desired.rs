//! Desired-state documents handed over by the ingestion side.
//!
//! The document is a JSON object keyed by parent reference:
//!
//! ```json
//! {"NY25001": [{"name": "Manhour", "rate": "50.00", "minutes": 120}]}
//! ```

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::entity::{DesiredEntity, TaskCategory};
use super::money::{AmountUnit, Money};
use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DesiredEntry {
    pub name: String,
    /// Major units as a decimal string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<String>,
    /// Explicitly tagged minor units; wins over `rate`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_minor_units: Option<i64>,
    #[serde(alias = "durationMinutes")]
    pub minutes: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl DesiredEntry {
    fn into_entity(self, parent_key: &str) -> Result<DesiredEntity> {
        let rate = match (self.rate_minor_units, self.rate.as_deref()) {
            (Some(minor), _) => Money::from_minor_units(minor),
            (None, Some(major)) => Money::parse_tagged(major, AmountUnit::Major)?,
            (None, None) => {
                return Err(CoreError::InvalidDesiredState(format!(
                    "{}/{}: missing rate",
                    parent_key, self.name
                )))
            }
        };

        if self.name.trim().is_empty() {
            return Err(CoreError::InvalidDesiredState(format!(
                "{}: entry with empty name",
                parent_key
            )));
        }
        if self.minutes < 0 {
            return Err(CoreError::InvalidDesiredState(format!(
                "{}/{}: negative duration",
                parent_key, self.name
            )));
        }

        let category = match self.category.as_deref() {
            Some(raw) => TaskCategory::parse(raw).ok_or_else(|| {
                CoreError::InvalidDesiredState(format!(
                    "{}/{}: unknown category '{}'",
                    parent_key, self.name, raw
                ))
            })?,
            None => TaskCategory::default(),
        };

        let mut entity = DesiredEntity::new(parent_key, self.name.trim(), rate, self.minutes)
            .with_category(category);
        entity.idempotency_key = self.idempotency_key;
        Ok(entity)
    }
}

/// Parent key -> desired entries, in document order.
///
/// A parent key repeated in the document appends to its first occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredStateDocument(pub Vec<(String, Vec<DesiredEntry>)>);

impl DesiredStateDocument {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn parent_count(&self) -> usize {
        self.0.len()
    }

    fn push(&mut self, parent_key: String, entries: Vec<DesiredEntry>) {
        match self.0.iter_mut().find(|(key, _)| *key == parent_key) {
            Some((_, existing)) => existing.extend(entries),
            None => self.0.push((parent_key, entries)),
        }
    }

    /// Flatten into entities, keeping document order.
    pub fn into_entities(self) -> Result<Vec<DesiredEntity>> {
        let mut entities = Vec::new();
        for (parent_key, entries) in self.0 {
            for entry in entries {
                entities.push(entry.into_entity(&parent_key)?);
            }
        }
        Ok(entities)
    }
}

impl Serialize for DesiredStateDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (parent_key, entries) in &self.0 {
            map.serialize_entry(parent_key, entries)?;
        }
        map.end()
    }
}

struct DocumentVisitor;

impl<'de> Visitor<'de> for DocumentVisitor {
    type Value = DesiredStateDocument;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an object of parent keys to desired entries")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
        let mut document = DesiredStateDocument::default();
        while let Some((parent_key, entries)) = access.next_entry::<String, Vec<DesiredEntry>>()? {
            document.push(parent_key, entries);
        }
        Ok(document)
    }
}

impl<'de> Deserialize<'de> for DesiredStateDocument {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(DocumentVisitor)
    }
}
