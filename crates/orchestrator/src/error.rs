use accounting::AccountingError;
use crm::CrmError;
use tasksync_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid step transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Step not found: {0}")]
    StepNotFound(String),

    #[error("Accounting API error: {0}")]
    Accounting(#[from] AccountingError),

    #[error("CRM error: {0}")]
    Crm(#[from] CrmError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Report rendering failed: {0}")]
    Report(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
