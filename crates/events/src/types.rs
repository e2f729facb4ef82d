//! Progress event types emitted while a reconciliation session runs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tasksync_core::{SessionSummary, Step};
use uuid::Uuid;

/// Envelope wrapping all events with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,
    /// Session the event belongs to
    pub session_id: Uuid,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// The actual event
    pub event: ProgressEvent,
}

impl EventEnvelope {
    /// Create a new event envelope with auto-generated ID and timestamp
    pub fn new(session_id: Uuid, event: ProgressEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            timestamp: Utc::now(),
            event,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Everything a progress sink can observe
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Free-form log line for the operator
    Log { level: LogLevel, message: String },

    /// A step changed status
    Progress { step: Step },

    /// Execution advanced over the plan
    PipelineProgress {
        processed: usize,
        total: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current: Option<String>,
    },

    /// A desired entity or quote was checked against remote state
    ValidationProgress {
        parent_key: String,
        checked: usize,
        total: usize,
        valid: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },

    /// Something went wrong; the session may still continue
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },

    /// Session finished
    Complete { summary: SessionSummary },
}

impl ProgressEvent {
    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        Self::Log {
            level,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>, context: Option<String>) -> Self {
        Self::Error {
            message: message.into(),
            context,
        }
    }

    /// Wire name of the event type
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Log { .. } => "log",
            Self::Progress { .. } => "progress",
            Self::PipelineProgress { .. } => "pipeline_progress",
            Self::ValidationProgress { .. } => "validation_progress",
            Self::Error { .. } => "error",
            Self::Complete { .. } => "complete",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasksync_core::StepStatus;

    #[test]
    fn test_event_envelope_creation() {
        let session_id = Uuid::new_v4();
        let envelope = EventEnvelope::new(session_id, ProgressEvent::log(LogLevel::Info, "hello"));

        assert!(!envelope.id.is_nil());
        assert_eq!(envelope.session_id, session_id);
        assert!(envelope.timestamp <= Utc::now());
    }

    #[test]
    fn test_event_serialization() {
        let mut step = Step::new("fetch");
        step.status = StepStatus::Running;
        let event = ProgressEvent::Progress { step };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"progress\""));
        assert!(json.contains("\"status\":\"running\""));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"pipeline_progress","processed":3,"total":10}"#;
        let event: ProgressEvent = serde_json::from_str(json).unwrap();

        match event {
            ProgressEvent::PipelineProgress {
                processed,
                total,
                current,
            } => {
                assert_eq!(processed, 3);
                assert_eq!(total, 10);
                assert!(current.is_none());
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_event_type_names() {
        assert_eq!(ProgressEvent::error("boom", None).event_type(), "error");
        let complete = ProgressEvent::Complete {
            summary: SessionSummary::default(),
        };
        assert_eq!(complete.event_type(), "complete");
        assert!(complete.is_terminal());

        let json = serde_json::to_string(&ProgressEvent::ValidationProgress {
            parent_key: "NY25001".to_string(),
            checked: 1,
            total: 2,
            valid: false,
            detail: Some("total mismatch".to_string()),
        })
        .unwrap();
        assert!(json.contains("validation_progress"));
    }
}
