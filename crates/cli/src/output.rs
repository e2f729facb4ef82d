use colored::Colorize;
use orchestrator::SyncOutcome;
use tasksync_core::{PlanAction, ReconciliationPlan, SessionStatus};

pub fn print_plan(plan: &ReconciliationPlan) {
    if plan.is_empty() {
        println!("Nothing to reconcile.");
        return;
    }

    println!();
    for item in &plan.items {
        let action = match item.action {
            PlanAction::Create => "create".green(),
            PlanAction::Update => "update".yellow(),
            PlanAction::Skip => "skip".dimmed(),
            PlanAction::NoMatch => "no match".magenta(),
        };
        println!("  {:<10} {}  {}", action, item.entity_key, item.reason.dimmed());
    }
    for blocked in &plan.blocked {
        println!(
            "  {:<10} {}  {}",
            "blocked".red(),
            blocked.entity_key,
            blocked.reason.dimmed()
        );
    }
}

pub fn print_summary(outcome: &SyncOutcome) {
    let session = &outcome.session;
    let summary = &session.summary;

    let status = match session.status {
        SessionStatus::Completed => session.status.as_str().green().bold(),
        SessionStatus::CompletedWithErrors => session.status.as_str().yellow().bold(),
        _ => session.status.as_str().red().bold(),
    };

    println!();
    print!("Session {} ({})", session.id, status);
    if summary.dry_run {
        print!(" {}", "dry run, nothing was sent".cyan());
    }
    println!();
    println!("════════════════════════════════════════");
    println!("  Created:             {}", summary.created.to_string().green());
    println!("  Updated:             {}", summary.updated.to_string().green());
    println!("  Skipped:             {}", summary.skipped);
    println!("  Already existed:     {}", summary.idempotent_replays);
    println!("  Failed:              {}", count(summary.failed));
    println!("  Blocked:             {}", count(summary.blocked));
    println!("  Not attempted:       {}", count(summary.not_attempted));
    if summary.deferred_parents > 0 {
        println!("  Deferred parents:    {}", summary.deferred_parents.to_string().yellow());
    }
    if summary.invalid_quotes > 0 {
        println!("  Invalid quotes:      {}", summary.invalid_quotes.to_string().yellow());
    }

    if !summary.not_found.is_empty() {
        println!();
        println!("Parents not found ({}):", summary.no_match);
        for key in &summary.not_found {
            println!("  {} {}", "○".magenta(), key);
        }
    }

    if !summary.failures.is_empty() {
        println!();
        println!("Needs attention:");
        for failure in &summary.failures {
            let status = failure
                .http_status
                .map(|s| format!(" {}", s))
                .unwrap_or_default();
            println!(
                "  {} {} [{}{}] {}",
                "✗".red(),
                failure.entity_key,
                failure.kind,
                status,
                failure.message
            );
        }
    }
}

fn count(n: usize) -> colored::ColoredString {
    if n == 0 {
        n.to_string().normal()
    } else {
        n.to_string().red()
    }
}
