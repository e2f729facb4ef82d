pub mod desired;
pub mod entity;
pub mod execution;
pub mod money;
pub mod plan;
pub mod session;

pub use desired::{DesiredEntry, DesiredStateDocument};
pub use entity::{
    normalize_name, DesiredEntity, IdempotencyKey, RemoteEntity, RemoteParent, TaskCategory,
};
pub use execution::{ErrorKind, ExecutionResult};
pub use money::{AmountUnit, Money};
pub use plan::{ActionPlanItem, BlockedEntity, PlanAction, ReconciliationPlan};
pub use session::{
    FailureDetail, Session, SessionStatus, SessionSummary, Step, StepStatus,
};
