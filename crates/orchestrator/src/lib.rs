//! Reconciliation runs for tasksync.
//!
//! Reads remote state once, plans against the desired document, applies
//! the plan idempotently and reports on every entity.

pub mod config;
pub mod error;
pub mod executor;
pub mod pipeline;
pub mod planner;
pub mod report;
pub mod state_machine;

pub use config::{AccountingConfig, OrchestratorConfig, ReportConfig, SyncConfig};
pub use error::{OrchestratorError, Result};
pub use executor::{ExecutionMode, ExecutorConfig, IdempotentExecutor};
pub use pipeline::{
    ProgressOrchestrator, SyncOutcome, STEP_EXECUTE, STEP_FETCH, STEP_PLAN, STEP_REPORT,
    STEP_VALIDATE,
};
pub use planner::{extract_code, ParentIndex, ReconciliationPlanner};
pub use report::{render_report, Report, REPORT_HEADERS};
pub use state_machine::StepStateMachine;
