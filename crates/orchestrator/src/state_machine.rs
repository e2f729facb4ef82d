use chrono::Utc;
use tasksync_core::{Session, Step, StepStatus};

use crate::error::{OrchestratorError, Result};

pub struct StepStateMachine;

impl StepStateMachine {
    pub fn validate_transition(from: &StepStatus, to: &StepStatus) -> Result<()> {
        let allowed = Self::allowed_transitions(from);

        if allowed.contains(to) {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }

    fn allowed_transitions(from: &StepStatus) -> Vec<StepStatus> {
        match from {
            StepStatus::Pending => vec![StepStatus::Running],
            StepStatus::Running => vec![StepStatus::Completed, StepStatus::Error],
            StepStatus::Completed | StepStatus::Error => vec![],
        }
    }

    pub fn can_transition(from: &StepStatus, to: &StepStatus) -> bool {
        Self::validate_transition(from, to).is_ok()
    }

    /// `pending -> running`
    pub fn start(session: &mut Session, step_id: &str) -> Result<Step> {
        let step = Self::step_mut(session, step_id)?;
        Self::validate_transition(&step.status, &StepStatus::Running)?;
        step.status = StepStatus::Running;
        step.started_at = Some(Utc::now());
        Ok(step.clone())
    }

    /// `running -> completed` with a result payload
    pub fn complete(session: &mut Session, step_id: &str, result: serde_json::Value) -> Result<Step> {
        let step = Self::step_mut(session, step_id)?;
        Self::validate_transition(&step.status, &StepStatus::Completed)?;
        step.status = StepStatus::Completed;
        step.result = Some(result);
        step.ended_at = Some(Utc::now());
        Ok(step.clone())
    }

    /// `running -> error` with a message
    pub fn fail(session: &mut Session, step_id: &str, error: impl Into<String>) -> Result<Step> {
        let step = Self::step_mut(session, step_id)?;
        Self::validate_transition(&step.status, &StepStatus::Error)?;
        step.status = StepStatus::Error;
        step.error = Some(error.into());
        step.ended_at = Some(Utc::now());
        Ok(step.clone())
    }

    fn step_mut<'a>(session: &'a mut Session, step_id: &str) -> Result<&'a mut Step> {
        session
            .step_mut(step_id)
            .ok_or_else(|| OrchestratorError::StepNotFound(step_id.to_string()))
    }
}
