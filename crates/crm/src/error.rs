use accounting::Retryable;
use tasksync_core::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrmError {
    #[error("Rate limited, retry after {retry_after:?}s")]
    RateLimited { retry_after: Option<u64> },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl CrmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Network(_) | Self::Server { .. } => ErrorKind::TransientNetwork,
            Self::Unauthorized(_) => ErrorKind::AuthExpired,
            Self::Rejected { .. } => ErrorKind::ValidationRejected,
            Self::InvalidResponse(_) | Self::Config(_) => ErrorKind::Unknown,
        }
    }

    pub(crate) fn from_status(status: u16, retry_after: Option<u64>, body: &str) -> Self {
        let message = accounting::extract_error_message(body);
        match status {
            429 => Self::RateLimited { retry_after },
            401 | 403 => Self::Unauthorized(message),
            500..=599 => Self::Server { status, message },
            _ => Self::Rejected { status, message },
        }
    }
}

impl Retryable for CrmError {
    fn kind(&self) -> ErrorKind {
        CrmError::kind(self)
    }

    fn retry_after(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for CrmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            CrmError::InvalidResponse(err.to_string())
        } else {
            CrmError::Network(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, CrmError>;
