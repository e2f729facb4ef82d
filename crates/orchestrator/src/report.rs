//! Delimited run report.
//!
//! One row per plan item (blocked entities included), every field quoted,
//! with running success/failure/skip counters in the last three columns.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use csv::{QuoteStyle, WriterBuilder};
use serde::{Deserialize, Serialize};
use tasksync_core::{ExecutionResult, PlanAction, ReconciliationPlan, Session};

use crate::error::{OrchestratorError, Result};

pub const REPORT_HEADERS: [&str; 11] = [
    "Entity",
    "Parent",
    "Action",
    "Outcome",
    "HTTP Status",
    "Error Kind",
    "Retries",
    "Message",
    "Successes",
    "Failures",
    "Skipped",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub filename: String,
    pub content: String,
}

impl Report {
    /// Write into `dir`, creating it when missing.
    pub async fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(&self.filename);
        tokio::fs::write(&path, &self.content).await?;
        Ok(path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tally {
    Success,
    Failure,
    Skipped,
}

#[derive(Debug, Default)]
struct Counters {
    successes: usize,
    failures: usize,
    skipped: usize,
}

impl Counters {
    fn add(&mut self, tally: Tally) {
        match tally {
            Tally::Success => self.successes += 1,
            Tally::Failure => self.failures += 1,
            Tally::Skipped => self.skipped += 1,
        }
    }

    fn columns(&self) -> [String; 3] {
        [
            self.successes.to_string(),
            self.failures.to_string(),
            self.skipped.to_string(),
        ]
    }
}

fn outcome(result: &ExecutionResult) -> (&'static str, Tally) {
    if result.not_attempted {
        return ("not_attempted", Tally::Failure);
    }
    if result.dry_run {
        return ("dry_run", Tally::Skipped);
    }
    if result.is_idempotent_replay() {
        return ("already_exists", Tally::Success);
    }
    if !result.success {
        return ("failed", Tally::Failure);
    }
    match result.action {
        PlanAction::Create => ("created", Tally::Success),
        PlanAction::Update => ("updated", Tally::Success),
        PlanAction::Skip => ("skipped", Tally::Skipped),
        PlanAction::NoMatch => ("not_found", Tally::Skipped),
    }
}

pub fn render_report(
    session: &Session,
    plan: &ReconciliationPlan,
    results: &[ExecutionResult],
) -> Result<Report> {
    let parents: HashMap<&str, &str> = plan
        .items
        .iter()
        .map(|i| (i.entity_key.as_str(), i.desired.parent_key.as_str()))
        .collect();

    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .from_writer(Vec::new());
    let csv_err = |e: csv::Error| OrchestratorError::Report(e.to_string());

    writer.write_record(REPORT_HEADERS).map_err(csv_err)?;

    let mut counters = Counters::default();
    for result in results {
        let (label, tally) = outcome(result);
        counters.add(tally);

        let parent = parents.get(result.entity_key.as_str()).copied().unwrap_or("");
        let status = result.http_status.map(|s| s.to_string()).unwrap_or_default();
        let kind = result.error_kind.map(|k| k.as_str()).unwrap_or("");
        let retries = result.retries.to_string();
        let message = result.message.as_deref().unwrap_or("");
        let [successes, failures, skipped] = counters.columns();

        writer
            .write_record([
                result.entity_key.as_str(),
                parent,
                result.action.as_str(),
                label,
                status.as_str(),
                kind,
                retries.as_str(),
                message,
                successes.as_str(),
                failures.as_str(),
                skipped.as_str(),
            ])
            .map_err(csv_err)?;
    }

    for blocked in &plan.blocked {
        counters.add(Tally::Failure);
        let [successes, failures, skipped] = counters.columns();

        writer
            .write_record([
                blocked.entity_key.as_str(),
                blocked.desired.parent_key.as_str(),
                "",
                "blocked",
                "",
                "",
                "0",
                blocked.reason.as_str(),
                successes.as_str(),
                failures.as_str(),
                skipped.as_str(),
            ])
            .map_err(csv_err)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| OrchestratorError::Report(e.to_string()))?;
    let content = String::from_utf8(bytes).map_err(|e| OrchestratorError::Report(e.to_string()))?;

    Ok(Report {
        filename: report_filename(session),
        content,
    })
}

fn report_filename(session: &Session) -> String {
    let tenant: String = session
        .tenant_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!(
        "tasksync-{}-{}.csv",
        if tenant.is_empty() { "tenant" } else { &tenant },
        session.created_at.format("%Y%m%d-%H%M%S")
    )
}
