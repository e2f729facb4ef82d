//! In-memory accounting API for pipeline tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use accounting::{AccountingApi, AccountingError, MutationOutcome, Page, Result, TaskPayload};
use async_trait::async_trait;
use tasksync_core::{DesiredEntity, Money, RemoteEntity, RemoteParent};

#[derive(Default)]
struct State {
    parents: Vec<RemoteParent>,
    tasks: HashMap<String, Vec<RemoteEntity>>,
    seen_keys: HashSet<String>,
    /// Queued failures for the next mutation calls
    mutation_failures: Vec<AccountingError>,
    failing_parents: HashMap<String, u16>,
    fail_listing: bool,
    next_id: usize,
}

#[derive(Default)]
pub struct FakeAccounting {
    state: Mutex<State>,
    pub list_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    pub update_calls: AtomicUsize,
}

impl FakeAccounting {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parent(self, remote_id: &str, name: &str) -> Self {
        self.state.lock().unwrap().parents.push(RemoteParent {
            remote_id: remote_id.to_string(),
            name: name.to_string(),
            code: None,
        });
        self
    }

    pub fn with_task(self, parent: &str, name: &str, rate: Money, minutes: i64) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.next_id += 1;
            let remote_id = format!("t-{}", state.next_id);
            state.tasks.entry(parent.to_string()).or_default().push(RemoteEntity {
                remote_id,
                parent_remote_id: parent.to_string(),
                name: name.to_string(),
                rate,
                duration_minutes: minutes,
                category: Default::default(),
            });
        }
        self
    }

    /// Entity listing for `parent` fails with `status`.
    pub fn failing_parent(self, parent: &str, status: u16) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_parents
            .insert(parent.to_string(), status);
        self
    }

    pub fn failing_listing(self) -> Self {
        self.state.lock().unwrap().fail_listing = true;
        self
    }

    /// The next mutation fails with `err` before reaching the store.
    pub fn fail_next_mutation(&self, err: AccountingError) {
        self.state.lock().unwrap().mutation_failures.push(err);
    }

    pub fn task_count(&self, parent: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .tasks
            .get(parent)
            .map_or(0, Vec::len)
    }

    pub fn mutation_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst) + self.update_calls.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> Option<AccountingError> {
        let mut state = self.state.lock().unwrap();
        if state.mutation_failures.is_empty() {
            None
        } else {
            Some(state.mutation_failures.remove(0))
        }
    }
}

#[async_trait]
impl AccountingApi for FakeAccounting {
    fn tenant_id(&self) -> &str {
        "tenant-1"
    }

    async fn list_projects(&self, _page: u32, _page_size: u32) -> Result<Page<RemoteParent>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        if state.fail_listing {
            return Err(AccountingError::Server {
                status: 500,
                message: "listing unavailable".to_string(),
            });
        }
        Ok(Page::new(state.parents.clone()))
    }

    async fn list_tasks(&self, project_id: &str, _page: u32, _page_size: u32) -> Result<Page<RemoteEntity>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        match state.failing_parents.get(project_id) {
            Some(401) => Err(AccountingError::AuthExpired("token expired".to_string())),
            Some(status) => Err(AccountingError::Server {
                status: *status,
                message: "upstream unavailable".to_string(),
            }),
            None => Ok(Page::new(state.tasks.get(project_id).cloned().unwrap_or_default())),
        }
    }

    async fn create_task(&self, project_id: &str, task: &TaskPayload, idempotency_key: &str) -> Result<MutationOutcome> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.take_failure() {
            return Err(err);
        }

        let mut state = self.state.lock().unwrap();
        if !state.seen_keys.insert(idempotency_key.to_string()) {
            return Err(AccountingError::IdempotencyConflict {
                status: 409,
                message: "idempotency key already used".to_string(),
            });
        }
        state.next_id += 1;
        let remote_id = format!("t-{}", state.next_id);
        state.tasks.entry(project_id.to_string()).or_default().push(RemoteEntity {
            remote_id: remote_id.clone(),
            parent_remote_id: project_id.to_string(),
            name: task.name.clone(),
            rate: task.rate,
            duration_minutes: task.estimate_minutes,
            category: task.charge_type,
        });
        Ok(MutationOutcome {
            status: 201,
            remote_id: Some(remote_id),
        })
    }

    async fn update_task(&self, project_id: &str, task_id: &str, task: &TaskPayload) -> Result<MutationOutcome> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.take_failure() {
            return Err(err);
        }

        let mut state = self.state.lock().unwrap();
        let existing = state
            .tasks
            .get_mut(project_id)
            .and_then(|tasks| tasks.iter_mut().find(|t| t.remote_id == task_id))
            .ok_or_else(|| AccountingError::NotFound(task_id.to_string()))?;
        existing.rate = task.rate;
        existing.duration_minutes = task.estimate_minutes;
        existing.category = task.charge_type;
        Ok(MutationOutcome {
            status: 200,
            remote_id: Some(task_id.to_string()),
        })
    }
}

pub fn manhour(parent_key: &str) -> DesiredEntity {
    DesiredEntity::new(parent_key, "Manhour", Money::from_minor_units(5000), 120)
}
