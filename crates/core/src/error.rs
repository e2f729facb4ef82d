use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid amount '{input}': {reason}")]
    InvalidAmount { input: String, reason: String },

    #[error("Invalid step transition from {from} to {to}")]
    InvalidStepTransition { from: String, to: String },

    #[error("Step not found: {0}")]
    StepNotFound(String),

    #[error("Invalid desired state: {0}")]
    InvalidDesiredState(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    pub fn invalid_amount(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAmount {
            input: input.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
