use tasksync_core::ErrorKind;
use thiserror::Error;

/// Longest raw body excerpt kept in an error message.
const MAX_RAW_BODY_CHARS: usize = 200;

#[derive(Debug, Error)]
pub enum AccountingError {
    #[error("Rate limited, retry after {retry_after:?}s")]
    RateLimited { retry_after: Option<u64> },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Validation rejected ({status}): {message}")]
    ValidationRejected { status: u16, message: String },

    #[error("Idempotency conflict ({status}): {message}")]
    IdempotencyConflict { status: u16, message: String },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Authentication expired: {0}")]
    AuthExpired(String),

    #[error("Unexpected response ({status:?}): {body}")]
    Unknown { status: Option<u16>, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl AccountingError {
    /// Map onto the pipeline-wide error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Network(_) | Self::Server { .. } => ErrorKind::TransientNetwork,
            Self::ValidationRejected { .. } | Self::NotFound(_) => ErrorKind::ValidationRejected,
            Self::IdempotencyConflict { .. } => ErrorKind::IdempotencyConflict,
            Self::AuthExpired(_) => ErrorKind::AuthExpired,
            Self::Unknown { .. } | Self::InvalidResponse(_) | Self::Config(_) => ErrorKind::Unknown,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RateLimited { .. } => Some(429),
            Self::Server { status, .. }
            | Self::ValidationRejected { status, .. }
            | Self::IdempotencyConflict { status, .. } => Some(*status),
            Self::NotFound(_) => Some(404),
            Self::Unknown { status, .. } => *status,
            Self::AuthExpired(_) | Self::Network(_) | Self::InvalidResponse(_) | Self::Config(_) => None,
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Message suitable for reports, without the variant prefix.
    pub fn detail(&self) -> String {
        match self {
            Self::Server { message, .. }
            | Self::ValidationRejected { message, .. }
            | Self::IdempotencyConflict { message, .. } => message.clone(),
            Self::Unknown { body, .. } => body.clone(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for AccountingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            AccountingError::Network(err.to_string())
        } else if err.is_decode() {
            AccountingError::InvalidResponse(err.to_string())
        } else {
            AccountingError::Unknown {
                status: err.status().map(|s| s.as_u16()),
                body: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for AccountingError {
    fn from(err: serde_json::Error) -> Self {
        AccountingError::InvalidResponse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AccountingError>;

/// Classify a non-success response.
pub fn classify_response(status: u16, retry_after: Option<u64>, body: &str) -> AccountingError {
    let message = extract_error_message(body);

    match status {
        429 => AccountingError::RateLimited { retry_after },
        409 => AccountingError::IdempotencyConflict { status, message },
        401 | 403 => AccountingError::AuthExpired(message),
        404 => AccountingError::NotFound(message),
        400..=499 if mentions_idempotency(body) => {
            AccountingError::IdempotencyConflict { status, message }
        }
        400..=499 => AccountingError::ValidationRejected { status, message },
        500..=599 => AccountingError::Server { status, message },
        _ => AccountingError::Unknown {
            status: Some(status),
            body: truncate_chars(body, MAX_RAW_BODY_CHARS),
        },
    }
}

fn mentions_idempotency(body: &str) -> bool {
    body.to_ascii_lowercase().contains("idempotency")
}

/// Pull the most useful message out of an error body.
///
/// Priority: `Message`, `message`, joined `ValidationErrors[].Message`
/// (top level or under `Elements[]`), then the raw body truncated.
pub fn extract_error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for field in ["Message", "message"] {
            if let Some(msg) = value.get(field).and_then(|v| v.as_str()) {
                if !msg.trim().is_empty() {
                    return msg.to_string();
                }
            }
        }

        let mut validation = collect_validation_messages(&value);
        if validation.is_empty() {
            if let Some(elements) = value.get("Elements").and_then(|v| v.as_array()) {
                for element in elements {
                    validation.extend(collect_validation_messages(element));
                }
            }
        }
        if !validation.is_empty() {
            return validation.join("; ");
        }
    }

    truncate_chars(body.trim(), MAX_RAW_BODY_CHARS)
}

fn collect_validation_messages(value: &serde_json::Value) -> Vec<String> {
    value
        .get("ValidationErrors")
        .and_then(|v| v.as_array())
        .map(|errors| {
            errors
                .iter()
                .filter_map(|e| e.get("Message").and_then(|m| m.as_str()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
