//! Pure reconciliation planning.
//!
//! The planner never performs I/O: it receives the remote parents, one
//! entity snapshot per parent, and the desired entities, and returns the
//! action plan.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use accounting::RemoteSnapshot;
use chrono::{DateTime, Utc};
use regex::Regex;
use tasksync_core::{
    normalize_name, ActionPlanItem, BlockedEntity, DesiredEntity, IdempotencyKey, PlanAction,
    ReconciliationPlan, RemoteEntity, RemoteParent,
};
use tracing::{debug, info};

const NO_PARENT_REASON: &str = "parent not found in active remote set";

/// Anchored patterns tried in order before falling back to the first token.
static CODE_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

fn code_patterns() -> &'static [Regex] {
    CODE_PATTERNS.get_or_init(|| {
        [r"^[A-Z]{2,3}\d{3,6}", r"^[A-Z]+\d+"]
            .iter()
            .filter_map(|pattern| Regex::new(pattern).ok())
            .collect()
    })
}

/// Extract a parent code from free text, e.g. `"NY25001 - Lobby"` -> `"NY25001"`.
pub fn extract_code(text: &str) -> Option<String> {
    let upper = text.trim().to_uppercase();
    if upper.is_empty() {
        return None;
    }

    for pattern in code_patterns() {
        if let Some(found) = pattern.find(&upper) {
            return Some(found.as_str().to_string());
        }
    }

    upper
        .split(|c: char| c.is_whitespace() || matches!(c, '-' | '_' | ':' | '/' | '|' | ','))
        .find(|token| !token.is_empty())
        .map(str::to_string)
}

/// Lookup of remote parents by code, then by full name.
#[derive(Debug, Default)]
pub struct ParentIndex {
    by_code: HashMap<String, RemoteParent>,
    by_name: HashMap<String, RemoteParent>,
}

impl ParentIndex {
    /// First parent with a given code or name wins.
    pub fn build(parents: &[RemoteParent]) -> Self {
        let mut index = Self::default();
        for parent in parents {
            let code = parent
                .code
                .as_deref()
                .and_then(extract_code)
                .or_else(|| extract_code(&parent.name));

            if let Some(code) = code {
                if index.by_code.contains_key(&code) {
                    debug!(code = %code, parent = %parent.remote_id, "Duplicate parent code, keeping first");
                } else {
                    index.by_code.insert(code, parent.clone());
                }
            }
            index
                .by_name
                .entry(normalize_name(&parent.name))
                .or_insert_with(|| parent.clone());
        }
        index
    }

    pub fn resolve(&self, parent_key: &str) -> Option<&RemoteParent> {
        extract_code(parent_key)
            .and_then(|code| self.by_code.get(&code))
            .or_else(|| self.by_name.get(&normalize_name(parent_key)))
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

pub struct ReconciliationPlanner {
    tenant_id: String,
    run_timestamp: DateTime<Utc>,
}

impl ReconciliationPlanner {
    pub fn new(tenant_id: impl Into<String>, run_timestamp: DateTime<Utc>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            run_timestamp,
        }
    }

    /// Distinct remote parent ids the desired entities resolve to, in first
    /// appearance order.
    pub fn matched_parents(index: &ParentIndex, desired: &[DesiredEntity]) -> Vec<String> {
        let mut seen = HashSet::new();
        desired
            .iter()
            .filter_map(|d| index.resolve(&d.parent_key))
            .filter(|p| seen.insert(p.remote_id.clone()))
            .map(|p| p.remote_id.clone())
            .collect()
    }

    pub fn plan(
        &self,
        desired: &[DesiredEntity],
        index: &ParentIndex,
        snapshot: &RemoteSnapshot,
    ) -> ReconciliationPlan {
        let names = name_index(snapshot);
        let mut planned: HashSet<(String, String)> = HashSet::new();
        let mut plan = ReconciliationPlan::default();

        for entity in desired {
            let entity_key = format!("{}/{}", entity.parent_key, entity.name);

            let Some(parent) = index.resolve(&entity.parent_key) else {
                plan.items.push(self.item(
                    entity_key,
                    PlanAction::NoMatch,
                    entity,
                    None,
                    None,
                    NO_PARENT_REASON,
                ));
                continue;
            };

            if let Some(failure) = snapshot.failure_for(&parent.remote_id) {
                plan.blocked.push(BlockedEntity {
                    entity_key,
                    parent_remote_id: parent.remote_id.clone(),
                    desired: entity.clone(),
                    reason: format!("entity fetch failed ({}): {}", failure.kind, failure.message),
                });
                continue;
            }
            let Some(by_name) = names.get(parent.remote_id.as_str()) else {
                plan.blocked.push(BlockedEntity {
                    entity_key,
                    parent_remote_id: parent.remote_id.clone(),
                    desired: entity.clone(),
                    reason: "entities for parent were not fetched in this run".to_string(),
                });
                continue;
            };

            let name = normalize_name(&entity.name);
            if !planned.insert((parent.remote_id.clone(), name.clone())) {
                plan.items.push(self.item(
                    entity_key,
                    PlanAction::Skip,
                    entity,
                    Some(parent),
                    None,
                    "duplicate desired entry",
                ));
                continue;
            }

            let item = match by_name.get(&name).copied() {
                None => {
                    let key = entity.idempotency_key.clone().unwrap_or_else(|| {
                        IdempotencyKey::derive(
                            &self.tenant_id,
                            &parent.remote_id,
                            &entity.name,
                            self.run_timestamp,
                        )
                    });
                    let mut item = self.item(
                        entity_key,
                        PlanAction::Create,
                        entity,
                        Some(parent),
                        None,
                        "entity missing remotely",
                    );
                    item.idempotency_key = Some(key);
                    item
                }
                Some(remote) if remote.matches(entity) => self.item(
                    entity_key,
                    PlanAction::Skip,
                    entity,
                    Some(parent),
                    Some(remote),
                    "up to date",
                ),
                Some(remote) => {
                    let reason = format!("differs in {}", differing_fields(remote, entity).join(", "));
                    self.item(
                        entity_key,
                        PlanAction::Update,
                        entity,
                        Some(parent),
                        Some(remote),
                        &reason,
                    )
                }
            };
            plan.items.push(item);
        }

        info!(
            tenant_id = %self.tenant_id,
            create = plan.count(PlanAction::Create),
            update = plan.count(PlanAction::Update),
            skip = plan.count(PlanAction::Skip),
            no_match = plan.count(PlanAction::NoMatch),
            blocked = plan.blocked.len(),
            "Reconciliation plan computed"
        );
        plan
    }

    fn item(
        &self,
        entity_key: String,
        action: PlanAction,
        desired: &DesiredEntity,
        parent: Option<&RemoteParent>,
        remote: Option<&RemoteEntity>,
        reason: &str,
    ) -> ActionPlanItem {
        ActionPlanItem {
            entity_key,
            action,
            parent_remote_id: parent.map(|p| p.remote_id.clone()),
            remote_id: remote.map(|r| r.remote_id.clone()),
            desired: desired.clone(),
            remote_current: remote.cloned(),
            idempotency_key: None,
            reason: reason.to_string(),
        }
    }
}

/// Parent id -> normalised name -> first remote entity with that name.
fn name_index(snapshot: &RemoteSnapshot) -> HashMap<&str, HashMap<String, &RemoteEntity>> {
    snapshot
        .entities
        .iter()
        .map(|(parent_id, entities)| {
            let mut by_name: HashMap<String, &RemoteEntity> = HashMap::new();
            for entity in entities {
                by_name.entry(normalize_name(&entity.name)).or_insert(entity);
            }
            (parent_id.as_str(), by_name)
        })
        .collect()
}

fn differing_fields(remote: &RemoteEntity, desired: &DesiredEntity) -> Vec<&'static str> {
    let mut fields = Vec::new();
    if remote.rate != desired.rate {
        fields.push("rate");
    }
    if remote.duration_minutes != desired.duration_minutes {
        fields.push("duration");
    }
    if remote.category != desired.category {
        fields.push("category");
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use accounting::FetchFailure;
    use chrono::TimeZone;
    use tasksync_core::{ErrorKind, Money, TaskCategory};

    fn parent(id: &str, name: &str) -> RemoteParent {
        RemoteParent {
            remote_id: id.to_string(),
            name: name.to_string(),
            code: None,
        }
    }

    fn remote(id: &str, parent: &str, name: &str, rate: i64, minutes: i64) -> RemoteEntity {
        RemoteEntity {
            remote_id: id.to_string(),
            parent_remote_id: parent.to_string(),
            name: name.to_string(),
            rate: Money::from_minor_units(rate),
            duration_minutes: minutes,
            category: TaskCategory::Time,
        }
    }

    fn manhour() -> DesiredEntity {
        DesiredEntity::new("NY25001", "Manhour", Money::from_minor_units(5000), 120)
    }

    fn planner() -> ReconciliationPlanner {
        ReconciliationPlanner::new("tenant-1", Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap())
    }

    fn snapshot(entries: Vec<(&str, Vec<RemoteEntity>)>) -> RemoteSnapshot {
        let mut snapshot = RemoteSnapshot::default();
        for (id, entities) in entries {
            snapshot.entities.insert(id.to_string(), entities);
        }
        snapshot
    }

    #[test]
    fn test_extract_code_cascade() {
        assert_eq!(extract_code("NY25001 - Lobby refit").as_deref(), Some("NY25001"));
        assert_eq!(extract_code("ny25001 lobby").as_deref(), Some("NY25001"));
        assert_eq!(extract_code("ABCD12 Warehouse").as_deref(), Some("ABCD12"));
        assert_eq!(extract_code("Lobby-refit").as_deref(), Some("LOBBY"));
        assert_eq!(extract_code("  "), None);
    }

    #[test]
    fn test_parent_index_prefers_explicit_code() {
        let mut coded = parent("p-2", "Lobby refit");
        coded.code = Some("NY25001".to_string());
        let index = ParentIndex::build(&[coded, parent("p-3", "NY25001 duplicate")]);

        assert_eq!(index.resolve("NY25001 - anything").unwrap().remote_id, "p-2");
        assert_eq!(index.resolve("lobby refit").unwrap().remote_id, "p-2");
        assert!(index.resolve("LA99999").is_none());
    }

    #[test]
    fn test_create_when_entity_missing() {
        let index = ParentIndex::build(&[parent("p-1", "NY25001 Lobby")]);
        let plan = planner().plan(&[manhour()], &index, &snapshot(vec![("p-1", vec![])]));

        assert_eq!(plan.items.len(), 1);
        let item = &plan.items[0];
        assert_eq!(item.action, PlanAction::Create);
        assert_eq!(item.parent_remote_id.as_deref(), Some("p-1"));
        assert!(item.idempotency_key.is_some());
    }

    #[test]
    fn test_skip_when_equal_case_insensitive() {
        let index = ParentIndex::build(&[parent("p-1", "NY25001 Lobby")]);
        let snap = snapshot(vec![("p-1", vec![remote("t-1", "p-1", "MANHOUR ", 5000, 120)])]);
        let plan = planner().plan(&[manhour()], &index, &snap);

        assert_eq!(plan.items[0].action, PlanAction::Skip);
        assert_eq!(plan.items[0].remote_id.as_deref(), Some("t-1"));
    }

    #[test]
    fn test_update_on_any_difference() {
        let index = ParentIndex::build(&[parent("p-1", "NY25001 Lobby")]);

        let rate = snapshot(vec![("p-1", vec![remote("t-1", "p-1", "Manhour", 4999, 120)])]);
        let plan = planner().plan(&[manhour()], &index, &rate);
        assert_eq!(plan.items[0].action, PlanAction::Update);
        assert_eq!(plan.items[0].reason, "differs in rate");

        let minutes = snapshot(vec![("p-1", vec![remote("t-1", "p-1", "Manhour", 5000, 60)])]);
        assert_eq!(planner().plan(&[manhour()], &index, &minutes).items[0].action, PlanAction::Update);

        let fixed = manhour().with_category(TaskCategory::Fixed);
        let same = snapshot(vec![("p-1", vec![remote("t-1", "p-1", "Manhour", 5000, 120)])]);
        let plan = planner().plan(&[fixed], &index, &same);
        assert_eq!(plan.items[0].action, PlanAction::Update);
        assert_eq!(plan.items[0].reason, "differs in category");
    }

    #[test]
    fn test_no_match_is_benign() {
        let index = ParentIndex::build(&[parent("p-1", "LA10001 Office")]);
        let plan = planner().plan(&[manhour()], &index, &snapshot(vec![("p-1", vec![])]));

        assert_eq!(plan.items[0].action, PlanAction::NoMatch);
        assert_eq!(plan.items[0].reason, NO_PARENT_REASON);
        assert!(plan.blocked.is_empty());
    }

    #[test]
    fn test_duplicate_remote_names_first_wins() {
        let index = ParentIndex::build(&[parent("p-1", "NY25001 Lobby")]);
        let snap = snapshot(vec![(
            "p-1",
            vec![
                remote("t-1", "p-1", "Manhour", 4000, 120),
                remote("t-2", "p-1", "manhour", 5000, 120),
            ],
        )]);
        let plan = planner().plan(&[manhour()], &index, &snap);

        assert_eq!(plan.items[0].action, PlanAction::Update);
        assert_eq!(plan.items[0].remote_id.as_deref(), Some("t-1"));
    }

    #[test]
    fn test_duplicate_desired_entry_skipped() {
        let index = ParentIndex::build(&[parent("p-1", "NY25001 Lobby")]);
        let plan = planner().plan(
            &[manhour(), manhour()],
            &index,
            &snapshot(vec![("p-1", vec![])]),
        );

        assert_eq!(plan.items[0].action, PlanAction::Create);
        assert_eq!(plan.items[1].action, PlanAction::Skip);
        assert_eq!(plan.items[1].reason, "duplicate desired entry");
    }

    #[test]
    fn test_failed_parent_blocks_entities() {
        let index = ParentIndex::build(&[parent("p-1", "NY25001 Lobby"), parent("p-2", "NY25002 Roof")]);
        let mut snap = snapshot(vec![("p-1", vec![])]);
        snap.failures.insert(
            "p-2".to_string(),
            FetchFailure {
                parent_remote_id: "p-2".to_string(),
                kind: ErrorKind::TransientNetwork,
                status: Some(503),
                message: "upstream down".to_string(),
            },
        );
        let roof = DesiredEntity::new("NY25002", "Manhour", Money::from_minor_units(5000), 120);

        let plan = planner().plan(&[manhour(), roof], &index, &snap);

        assert_eq!(plan.items.len(), 1);
        assert_eq!(plan.items[0].action, PlanAction::Create);
        assert_eq!(plan.blocked.len(), 1);
        assert_eq!(plan.blocked[0].parent_remote_id, "p-2");
        assert!(plan.blocked[0].reason.contains("upstream down"));
    }

    #[test]
    fn test_idempotency_key_stable_within_run() {
        let index = ParentIndex::build(&[parent("p-1", "NY25001 Lobby")]);
        let snap = snapshot(vec![("p-1", vec![])]);

        let first = planner().plan(&[manhour()], &index, &snap);
        let second = planner().plan(&[manhour()], &index, &snap);
        assert_eq!(first.items[0].idempotency_key, second.items[0].idempotency_key);

        let later = ReconciliationPlanner::new("tenant-1", Utc.with_ymd_and_hms(2025, 3, 2, 9, 0, 0).unwrap());
        assert_ne!(
            first.items[0].idempotency_key,
            later.plan(&[manhour()], &index, &snap).items[0].idempotency_key
        );

        let supplied = manhour().with_idempotency_key("caller-key");
        let plan = planner().plan(&[supplied], &index, &snap);
        assert_eq!(plan.items[0].idempotency_key.as_deref(), Some("caller-key"));
    }

    #[test]
    fn test_matched_parents_in_order() {
        let index = ParentIndex::build(&[parent("p-1", "NY25001 Lobby"), parent("p-2", "NY25002 Roof")]);
        let desired = vec![
            DesiredEntity::new("NY25002", "A", Money::ZERO, 0),
            DesiredEntity::new("XX", "B", Money::ZERO, 0),
            DesiredEntity::new("NY25001", "C", Money::ZERO, 0),
            DesiredEntity::new("NY25002", "D", Money::ZERO, 0),
        ];
        assert_eq!(
            ReconciliationPlanner::matched_parents(&index, &desired),
            vec!["p-2".to_string(), "p-1".to_string()]
        );
    }
}
