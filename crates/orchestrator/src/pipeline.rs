//! Step-driven reconciliation runs.
//!
//! A run is a [`Session`] with named steps. Each step moves
//! `pending -> running -> completed | error`, and every transition is sent
//! to the progress sink. Only a failure to list parents or an expired token
//! aborts a run; the report step runs regardless.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use accounting::{AccountingApi, FetchConfig, RemoteSnapshot, RemoteStateFetcher};
use crm::{validate_quote, Deal, DealMapper};
use events::{EventEnvelope, LogLevel, NoopSink, ProgressEvent, ProgressSink};
use serde_json::json;
use tasksync_core::{
    DesiredEntity, ExecutionResult, PlanAction, ReconciliationPlan, Session, SessionStatus, Step,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{OrchestratorConfig, SyncConfig};
use crate::error::Result;
use crate::executor::{ExecutorConfig, IdempotentExecutor};
use crate::planner::{ParentIndex, ReconciliationPlanner};
use crate::report::{render_report, Report};
use crate::state_machine::StepStateMachine;

pub const STEP_VALIDATE: &str = "validate";
pub const STEP_FETCH: &str = "fetch";
pub const STEP_PLAN: &str = "plan";
pub const STEP_EXECUTE: &str = "execute";
pub const STEP_REPORT: &str = "report";

/// Everything a finished run produced.
#[derive(Debug)]
pub struct SyncOutcome {
    pub session: Session,
    pub plan: ReconciliationPlan,
    pub results: Vec<ExecutionResult>,
    pub report: Option<Report>,
}

impl SyncOutcome {
    pub fn is_aborted(&self) -> bool {
        self.session.status == SessionStatus::Failed
    }
}

/// Remote state for one run, read once.
struct Fetched {
    index: ParentIndex,
    snapshot: RemoteSnapshot,
    /// Desired entities left after deferring parents over the batch cap
    desired: Vec<DesiredEntity>,
}

pub struct ProgressOrchestrator {
    api: Arc<dyn AccountingApi>,
    fetcher: RemoteStateFetcher,
    executor_config: ExecutorConfig,
    config: OrchestratorConfig,
    currency: Option<String>,
    sink: Arc<dyn ProgressSink>,
    sink_failed: AtomicBool,
}

impl ProgressOrchestrator {
    pub fn new(
        api: Arc<dyn AccountingApi>,
        fetch_config: FetchConfig,
        executor_config: ExecutorConfig,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            fetcher: RemoteStateFetcher::new(api.clone(), fetch_config),
            api,
            executor_config,
            config,
            currency: None,
            sink: Arc::new(NoopSink),
            sink_failed: AtomicBool::new(false),
        }
    }

    pub fn from_config(api: Arc<dyn AccountingApi>, config: &SyncConfig) -> Self {
        Self::new(
            api,
            config.accounting.fetch_config(),
            config.executor.clone(),
            config.orchestrator.clone(),
        )
        .with_currency(config.accounting.currency.clone())
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_currency(mut self, currency: Option<String>) -> Self {
        self.currency = currency;
        self
    }

    /// Fetch, plan, execute and report.
    pub async fn run(&self, desired: Vec<DesiredEntity>) -> SyncOutcome {
        let mut session = self.open_session([STEP_FETCH, STEP_PLAN, STEP_EXECUTE, STEP_REPORT]);
        let mut plan = ReconciliationPlan::default();
        let mut results = Vec::new();
        let mut aborted = true;

        if let Some(fetched) = self.fetch_step(&mut session, desired).await {
            plan = self.plan_step(&mut session, &fetched);
            let (executed, execution_aborted) = self.execute_step(&mut session, &plan).await;
            results = executed;
            aborted = execution_aborted;
        }

        self.close_session(session, plan, results, aborted)
    }

    /// Fetch and plan only; nothing is sent.
    pub async fn plan_only(&self, desired: Vec<DesiredEntity>) -> SyncOutcome {
        let mut session = self.open_session([STEP_FETCH, STEP_PLAN, STEP_REPORT]);
        let mut plan = ReconciliationPlan::default();
        let mut results = Vec::new();
        let mut aborted = true;

        if let Some(fetched) = self.fetch_step(&mut session, desired).await {
            plan = self.plan_step(&mut session, &fetched);
            results = self.preview(&mut session, &plan);
            aborted = false;
        }

        self.close_session(session, plan, results, aborted)
    }

    /// Validate CRM quotes, then plan their line items against the
    /// accounting side. Never mutates.
    pub async fn validate_deals(&self, deals: &[Deal], mapper: &DealMapper) -> SyncOutcome {
        let mut session = self.open_session([STEP_VALIDATE, STEP_FETCH, STEP_PLAN, STEP_REPORT]);

        self.start(&mut session, STEP_VALIDATE);
        let total = deals.len();
        for (checked, deal) in deals.iter().enumerate() {
            let validation = validate_quote(deal);
            session.summary.record_quote(validation.is_valid());
            if !validation.is_valid() {
                warn!(deal = %deal.id, issues = validation.issues.len(), "Quote failed validation");
            }

            let detail = (!validation.is_valid()).then(|| {
                validation
                    .issues
                    .iter()
                    .map(|i| i.message.as_str())
                    .collect::<Vec<_>>()
                    .join("; ")
            });
            self.emit(
                session.id,
                ProgressEvent::ValidationProgress {
                    parent_key: validation.parent_key.clone(),
                    checked: checked + 1,
                    total,
                    valid: validation.is_valid(),
                    detail,
                },
            );
        }
        let invalid = session.summary.invalid_quotes;
        self.complete(&mut session, STEP_VALIDATE, json!({"deals": total, "invalid": invalid}));

        let desired = mapper.map_all(deals);
        let mut plan = ReconciliationPlan::default();
        let mut results = Vec::new();
        let mut aborted = true;

        if let Some(fetched) = self.fetch_step(&mut session, desired).await {
            plan = self.plan_step(&mut session, &fetched);
            results = self.preview(&mut session, &plan);
            aborted = false;
        }

        self.close_session(session, plan, results, aborted)
    }

    fn open_session<const N: usize>(&self, steps: [&str; N]) -> Session {
        let mut session = Session::new(self.api.tenant_id(), steps);
        session.start();
        info!(session_id = %session.id, tenant_id = %session.tenant_id, "Reconciliation session started");
        self.emit(
            session.id,
            ProgressEvent::log(LogLevel::Info, format!("Session started for tenant {}", session.tenant_id)),
        );
        session
    }

    async fn fetch_step(&self, session: &mut Session, desired: Vec<DesiredEntity>) -> Option<Fetched> {
        self.start(session, STEP_FETCH);

        let parents = match self.fetcher.fetch_parents().await {
            Ok(parents) => parents,
            Err(err) => {
                error!(tenant_id = %session.tenant_id, error = %err, "Failed to list parents, aborting");
                self.fail(session, STEP_FETCH, format!("failed to list parents: {}", err));
                return None;
            }
        };
        let index = ParentIndex::build(&parents);

        let mut matched = ReconciliationPlanner::matched_parents(&index, &desired);
        let deferred: HashSet<String> = if matched.len() > self.config.max_parents_per_run {
            matched
                .split_off(self.config.max_parents_per_run)
                .into_iter()
                .collect()
        } else {
            HashSet::new()
        };
        if !deferred.is_empty() {
            warn!(
                kept = matched.len(),
                deferred = deferred.len(),
                "Parent cap reached, deferring the rest to a later run"
            );
            self.emit(
                session.id,
                ProgressEvent::log(
                    LogLevel::Warn,
                    format!("{} parents deferred to a later run", deferred.len()),
                ),
            );
        }
        session.summary.deferred_parents = deferred.len();

        let desired: Vec<DesiredEntity> = desired
            .into_iter()
            .filter(|d| {
                index
                    .resolve(&d.parent_key)
                    .map_or(true, |p| !deferred.contains(&p.remote_id))
            })
            .collect();

        let snapshot = self.fetcher.fetch_entities(&matched).await;
        for failure in snapshot.failures.values() {
            self.emit(
                session.id,
                ProgressEvent::error(
                    format!("failed to fetch entities: {}", failure.message),
                    Some(failure.parent_remote_id.clone()),
                ),
            );
        }

        if let Some(fatal) = snapshot.fatal_failure() {
            error!(parent = %fatal.parent_remote_id, "Authentication expired while fetching, aborting");
            self.fail(session, STEP_FETCH, format!("authentication expired: {}", fatal.message));
            return None;
        }

        self.complete(
            session,
            STEP_FETCH,
            json!({
                "parents": parents.len(),
                "matched": matched.len(),
                "deferred": deferred.len(),
                "entities": snapshot.entity_count(),
                "failed_parents": snapshot.failures.len(),
            }),
        );

        Some(Fetched {
            index,
            snapshot,
            desired,
        })
    }

    fn plan_step(&self, session: &mut Session, fetched: &Fetched) -> ReconciliationPlan {
        self.start(session, STEP_PLAN);

        let planner = ReconciliationPlanner::new(session.tenant_id.clone(), session.created_at);
        let plan = planner.plan(&fetched.desired, &fetched.index, &fetched.snapshot);

        for blocked in &plan.blocked {
            session.summary.record_blocked(blocked);
        }

        self.complete(
            session,
            STEP_PLAN,
            json!({
                "create": plan.count(PlanAction::Create),
                "update": plan.count(PlanAction::Update),
                "skip": plan.count(PlanAction::Skip),
                "no_match": plan.count(PlanAction::NoMatch),
                "blocked": plan.blocked.len(),
            }),
        );
        plan
    }

    /// Returns the results and whether execution was aborted.
    async fn execute_step(
        &self,
        session: &mut Session,
        plan: &ReconciliationPlan,
    ) -> (Vec<ExecutionResult>, bool) {
        self.start(session, STEP_EXECUTE);

        let executor = IdempotentExecutor::new(self.api.clone(), self.executor_config.clone())
            .with_currency(self.currency.clone());
        session.summary.dry_run = !executor.mode().is_live();

        let session_id = session.id;
        let total = plan.items.len();
        let processed = AtomicUsize::new(0);
        let results = executor
            .execute_with(plan, |result| {
                let done = processed.fetch_add(1, Ordering::SeqCst) + 1;
                self.emit(
                    session_id,
                    ProgressEvent::PipelineProgress {
                        processed: done,
                        total,
                        current: Some(result.entity_key.clone()),
                    },
                );
            })
            .await;

        self.record_results(session, plan, &results);

        if executor.is_aborted() {
            let message = format!(
                "authentication expired; {} mutations not attempted",
                session.summary.not_attempted
            );
            self.fail(session, STEP_EXECUTE, message);
            return (results, true);
        }

        self.complete(
            session,
            STEP_EXECUTE,
            json!({
                "created": session.summary.created,
                "updated": session.summary.updated,
                "skipped": session.summary.skipped,
                "idempotent_replays": session.summary.idempotent_replays,
                "failed": session.summary.failed,
                "dry_run": session.summary.dry_run,
            }),
        );
        (results, false)
    }

    fn preview(&self, session: &mut Session, plan: &ReconciliationPlan) -> Vec<ExecutionResult> {
        let executor = IdempotentExecutor::new(self.api.clone(), self.executor_config.clone());
        let results = executor.preview(plan);
        session.summary.dry_run = true;
        self.record_results(session, plan, &results);
        results
    }

    fn record_results(&self, session: &mut Session, plan: &ReconciliationPlan, results: &[ExecutionResult]) {
        let parents: HashMap<&str, &str> = plan
            .items
            .iter()
            .map(|i| (i.entity_key.as_str(), i.desired.parent_key.as_str()))
            .collect();
        for result in results {
            let parent = parents.get(result.entity_key.as_str()).copied().unwrap_or("");
            session.summary.record(result, parent);
        }
    }

    fn close_session(
        &self,
        mut session: Session,
        plan: ReconciliationPlan,
        results: Vec<ExecutionResult>,
        aborted: bool,
    ) -> SyncOutcome {
        self.start(&mut session, STEP_REPORT);
        let report = match render_report(&session, &plan, &results) {
            Ok(report) => {
                let rows = results.len() + plan.blocked.len();
                self.complete(&mut session, STEP_REPORT, json!({"filename": report.filename, "rows": rows}));
                Some(report)
            }
            Err(err) => {
                self.fail(&mut session, STEP_REPORT, err.to_string());
                None
            }
        };

        session.finalize(aborted);
        info!(
            session_id = %session.id,
            status = session.status.as_str(),
            created = session.summary.created,
            updated = session.summary.updated,
            failed = session.summary.failed,
            not_found = session.summary.no_match,
            "Reconciliation session finished"
        );
        self.emit(
            session.id,
            ProgressEvent::Complete {
                summary: session.summary.clone(),
            },
        );

        SyncOutcome {
            session,
            plan,
            results,
            report,
        }
    }

    fn start(&self, session: &mut Session, step_id: &str) {
        let step = StepStateMachine::start(session, step_id);
        self.step_changed(session.id, step_id, step);
    }

    fn complete(&self, session: &mut Session, step_id: &str, result: serde_json::Value) {
        let step = StepStateMachine::complete(session, step_id, result);
        self.step_changed(session.id, step_id, step);
    }

    fn fail(&self, session: &mut Session, step_id: &str, message: String) {
        self.emit(session.id, ProgressEvent::error(message.clone(), Some(step_id.to_string())));
        let step = StepStateMachine::fail(session, step_id, message);
        self.step_changed(session.id, step_id, step);
    }

    fn step_changed(&self, session_id: Uuid, step_id: &str, step: Result<Step>) {
        match step {
            Ok(step) => {
                debug!(step = step_id, status = step.status.as_str(), "Step transition");
                self.emit(session_id, ProgressEvent::Progress { step });
            }
            Err(err) => warn!(step = step_id, error = %err, "Rejected step transition"),
        }
    }

    /// Deliver an event; sink failures are logged and otherwise ignored.
    fn emit(&self, session_id: Uuid, event: ProgressEvent) {
        let envelope = EventEnvelope::new(session_id, event);
        if let Err(err) = self.sink.on_progress(&envelope) {
            if !self.sink_failed.swap(true, Ordering::SeqCst) {
                warn!(error = %err, "Progress sink failed, continuing without progress updates");
            }
        }
    }
}
