//! Terminal rendering of progress events.

use colored::Colorize;
use events::{EventEnvelope, LogLevel, ProgressEvent};
use indicatif::{ProgressBar, ProgressStyle};
use tasksync_core::StepStatus;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

const TEMPLATE: &str = "{spinner:.cyan} {msg:<24} [{bar:30.cyan/blue}] {pos}/{len}";

/// Drain `receiver` into a progress bar until the sender side is dropped.
pub fn spawn_renderer(mut receiver: UnboundedReceiver<EventEnvelope>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );

        while let Some(envelope) = receiver.recv().await {
            match envelope.event {
                ProgressEvent::Progress { step } => match step.status {
                    StepStatus::Running => bar.set_message(format!("{}...", step.id)),
                    StepStatus::Error => bar.println(format!(
                        "{} {}: {}",
                        "✗".red(),
                        step.id,
                        step.error.unwrap_or_default()
                    )),
                    _ => {}
                },
                ProgressEvent::PipelineProgress {
                    processed,
                    total,
                    current,
                } => {
                    bar.set_length(total as u64);
                    bar.set_position(processed as u64);
                    if let Some(current) = current {
                        bar.set_message(current);
                    }
                }
                ProgressEvent::ValidationProgress {
                    parent_key,
                    checked,
                    total,
                    valid,
                    detail,
                } => {
                    bar.set_length(total as u64);
                    bar.set_position(checked as u64);
                    if !valid {
                        bar.println(format!(
                            "{} {}: {}",
                            "!".yellow(),
                            parent_key,
                            detail.unwrap_or_default()
                        ));
                    }
                }
                ProgressEvent::Log { level, message } => match level {
                    LogLevel::Warn => bar.println(format!("{} {}", "!".yellow(), message)),
                    LogLevel::Error => bar.println(format!("{} {}", "✗".red(), message)),
                    _ => {}
                },
                ProgressEvent::Error { message, context } => {
                    let context = context.map(|c| format!("[{}] ", c)).unwrap_or_default();
                    bar.println(format!("{} {}{}", "✗".red(), context, message));
                }
                ProgressEvent::Complete { .. } => bar.finish_and_clear(),
            }
        }

        if !bar.is_finished() {
            bar.finish_and_clear();
        }
    })
}
