mod common;

use std::sync::Arc;
use std::time::Duration;

use accounting::{AccountingError, FetchConfig};
use common::{manhour, FakeAccounting};
use crm::{Deal, DealMapper, LineItem};
use events::{ChannelSink, ProgressEvent};
use orchestrator::{
    ExecutorConfig, IdempotentExecutor, OrchestratorConfig, ProgressOrchestrator, STEP_EXECUTE,
    STEP_FETCH, STEP_REPORT, STEP_VALIDATE,
};
use tasksync_core::{
    DesiredEntity, ErrorKind, Money, PlanAction, SessionStatus, StepStatus, TaskCategory,
};

fn pipeline(api: Arc<FakeAccounting>, executor: ExecutorConfig) -> ProgressOrchestrator {
    ProgressOrchestrator::new(api, FetchConfig::default(), executor, OrchestratorConfig::default())
}

#[tokio::test]
async fn test_missing_entity_is_created() {
    let api = Arc::new(FakeAccounting::new().with_parent("p-1", "NY25001 Lobby refit"));

    let outcome = pipeline(api.clone(), ExecutorConfig::live())
        .run(vec![manhour("NY25001")])
        .await;

    assert_eq!(outcome.session.status, SessionStatus::Completed);
    assert_eq!(outcome.session.summary.created, 1);
    assert_eq!(outcome.session.summary.failed, 0);
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].http_status, Some(201));
    assert_eq!(api.task_count("p-1"), 1);
    assert!(outcome.report.is_some());
}

#[tokio::test]
async fn test_up_to_date_entity_makes_no_calls() {
    let api = Arc::new(
        FakeAccounting::new()
            .with_parent("p-1", "NY25001 Lobby refit")
            .with_task("p-1", "manhour", Money::from_minor_units(5000), 120),
    );

    let outcome = pipeline(api.clone(), ExecutorConfig::live())
        .run(vec![manhour("NY25001")])
        .await;

    assert_eq!(outcome.plan.items[0].action, PlanAction::Skip);
    assert_eq!(outcome.session.summary.skipped, 1);
    assert_eq!(api.mutation_calls(), 0);
}

#[tokio::test]
async fn test_changed_rate_is_updated() {
    let api = Arc::new(
        FakeAccounting::new()
            .with_parent("p-1", "NY25001 Lobby refit")
            .with_task("p-1", "Manhour", Money::from_minor_units(4500), 120),
    );

    let outcome = pipeline(api.clone(), ExecutorConfig::live())
        .run(vec![manhour("NY25001")])
        .await;

    assert_eq!(outcome.session.summary.updated, 1);
    assert_eq!(api.update_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_conflicting_update_is_a_failure() {
    let api = Arc::new(
        FakeAccounting::new()
            .with_parent("p-1", "NY25001 Lobby refit")
            .with_task("p-1", "Manhour", Money::from_minor_units(4500), 120),
    );
    api.fail_next_mutation(AccountingError::IdempotencyConflict {
        status: 409,
        message: "conflicting edit".to_string(),
    });

    let outcome = pipeline(api.clone(), ExecutorConfig::live())
        .run(vec![manhour("NY25001")])
        .await;

    let result = &outcome.results[0];
    assert_eq!(result.action, PlanAction::Update);
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::IdempotencyConflict));
    assert_eq!(outcome.session.summary.updated, 0);
    assert_eq!(outcome.session.summary.idempotent_replays, 0);
    assert_eq!(outcome.session.summary.failed, 1);
    assert_eq!(outcome.session.status, SessionStatus::CompletedWithErrors);

    let report = outcome.report.unwrap();
    assert!(report.content.contains(r#""update","failed","409","idempotency_conflict""#));
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_create_waits_for_retry_after() {
    let api = Arc::new(FakeAccounting::new().with_parent("p-1", "NY25001 Lobby refit"));
    api.fail_next_mutation(AccountingError::RateLimited {
        retry_after: Some(2),
    });

    let started = tokio::time::Instant::now();
    let outcome = pipeline(api.clone(), ExecutorConfig::live())
        .run(vec![manhour("NY25001")])
        .await;

    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(outcome.results[0].retries, 1);
    assert!(outcome.results[0].success);
    assert_eq!(outcome.session.summary.created, 1);
    assert_eq!(api.create_calls.load(std::sync::atomic::Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_replayed_plan_does_not_duplicate() {
    let api = Arc::new(FakeAccounting::new().with_parent("p-1", "NY25001 Lobby refit"));

    let outcome = pipeline(api.clone(), ExecutorConfig::live())
        .run(vec![manhour("NY25001")])
        .await;
    assert_eq!(api.task_count("p-1"), 1);

    let executor = IdempotentExecutor::new(api.clone(), ExecutorConfig::live());
    let replay = executor.execute(&outcome.plan).await;

    assert_eq!(api.task_count("p-1"), 1);
    assert!(replay[0].success);
    assert_eq!(replay[0].error_kind, Some(ErrorKind::IdempotencyConflict));
    assert!(replay[0].is_idempotent_replay());
}

#[tokio::test]
async fn test_second_run_converges() {
    let api = Arc::new(FakeAccounting::new().with_parent("p-1", "NY25001 Lobby refit"));
    let orchestrator = pipeline(api.clone(), ExecutorConfig::live());

    orchestrator.run(vec![manhour("NY25001")]).await;
    let second = orchestrator.run(vec![manhour("NY25001")]).await;

    assert_eq!(second.session.summary.created, 0);
    assert_eq!(second.session.summary.skipped, 1);
    assert_eq!(api.task_count("p-1"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failing_parent_does_not_block_others() {
    let api = Arc::new(
        FakeAccounting::new()
            .with_parent("p-1", "NY25001 Lobby refit")
            .with_parent("p-2", "NY25002 Roof")
            .failing_parent("p-2", 503),
    );

    let outcome = pipeline(api.clone(), ExecutorConfig::live())
        .run(vec![manhour("NY25001"), manhour("NY25002")])
        .await;

    assert_eq!(outcome.session.summary.created, 1);
    assert_eq!(outcome.session.summary.blocked, 1);
    assert_eq!(outcome.plan.blocked[0].parent_remote_id, "p-2");
    assert_eq!(outcome.session.status, SessionStatus::CompletedWithErrors);
    assert_eq!(api.task_count("p-1"), 1);
    assert_eq!(api.task_count("p-2"), 0);

    let report = outcome.report.unwrap();
    assert!(report.content.contains("\"NY25002/Manhour\""));
    assert!(report.content.contains("\"blocked\""));
}

#[tokio::test]
async fn test_unknown_parent_is_not_found() {
    let api = Arc::new(FakeAccounting::new().with_parent("p-1", "NY25001 Lobby refit"));

    let outcome = pipeline(api.clone(), ExecutorConfig::live())
        .run(vec![manhour("ZZ99999")])
        .await;

    assert_eq!(outcome.session.summary.no_match, 1);
    assert_eq!(outcome.session.summary.not_found, vec!["ZZ99999".to_string()]);
    assert_eq!(outcome.session.status, SessionStatus::Completed);
    assert_eq!(api.mutation_calls(), 0);
}

#[tokio::test]
async fn test_expired_token_stops_remaining_mutations() {
    let api = Arc::new(
        FakeAccounting::new()
            .with_parent("p-1", "NY25001 Lobby refit")
            .with_parent("p-2", "NY25002 Roof"),
    );
    api.fail_next_mutation(AccountingError::AuthExpired("token expired".to_string()));
    let executor = ExecutorConfig {
        parent_concurrency: 1,
        ..ExecutorConfig::live()
    };
    let survey = DesiredEntity::new("NY25001", "Survey", Money::from_minor_units(9000), 60);

    let outcome = pipeline(api.clone(), executor)
        .run(vec![manhour("NY25001"), survey, manhour("NY25002")])
        .await;

    assert_eq!(outcome.session.status, SessionStatus::Failed);
    assert_eq!(outcome.session.summary.failed, 1);
    assert_eq!(outcome.session.summary.not_attempted, 2);
    assert_eq!(api.create_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(
        outcome.session.step(STEP_EXECUTE).map(|s| s.status),
        Some(StepStatus::Error)
    );
    assert_eq!(
        outcome.session.step(STEP_REPORT).map(|s| s.status),
        Some(StepStatus::Completed)
    );
}

#[tokio::test(start_paused = true)]
async fn test_parent_listing_failure_aborts() {
    let api = Arc::new(
        FakeAccounting::new()
            .with_parent("p-1", "NY25001 Lobby refit")
            .failing_listing(),
    );

    let outcome = pipeline(api.clone(), ExecutorConfig::live())
        .run(vec![manhour("NY25001")])
        .await;

    assert!(outcome.is_aborted());
    assert!(outcome.plan.is_empty());
    assert_eq!(
        outcome.session.step(STEP_FETCH).map(|s| s.status),
        Some(StepStatus::Error)
    );
    assert!(outcome.report.is_some());
    assert_eq!(api.mutation_calls(), 0);
}

#[tokio::test]
async fn test_dry_run_sends_nothing() {
    let api = Arc::new(FakeAccounting::new().with_parent("p-1", "NY25001 Lobby refit"));

    let outcome = pipeline(api.clone(), ExecutorConfig::default())
        .run(vec![manhour("NY25001")])
        .await;

    assert!(outcome.session.summary.dry_run);
    assert!(outcome.results.iter().all(|r| r.dry_run));
    assert_eq!(api.mutation_calls(), 0);
    assert_eq!(api.task_count("p-1"), 0);
}

#[tokio::test]
async fn test_parent_cap_defers_the_rest() {
    let api = Arc::new(
        FakeAccounting::new()
            .with_parent("p-1", "NY25001 Lobby refit")
            .with_parent("p-2", "NY25002 Roof"),
    );
    let orchestrator = ProgressOrchestrator::new(
        api.clone(),
        FetchConfig::default(),
        ExecutorConfig::live(),
        OrchestratorConfig {
            max_parents_per_run: 1,
        },
    );

    let outcome = orchestrator
        .run(vec![manhour("NY25001"), manhour("NY25002")])
        .await;

    assert_eq!(outcome.session.summary.deferred_parents, 1);
    assert_eq!(outcome.session.summary.created, 1);
    assert_eq!(api.task_count("p-1"), 1);
    assert_eq!(api.task_count("p-2"), 0);
}

#[tokio::test]
async fn test_closed_sink_does_not_stop_the_run() {
    let api = Arc::new(FakeAccounting::new().with_parent("p-1", "NY25001 Lobby refit"));
    let (sink, receiver) = ChannelSink::new();
    drop(receiver);

    let outcome = pipeline(api.clone(), ExecutorConfig::live())
        .with_sink(Arc::new(sink))
        .run(vec![manhour("NY25001")])
        .await;

    assert_eq!(outcome.session.status, SessionStatus::Completed);
    assert_eq!(api.task_count("p-1"), 1);
}

#[tokio::test]
async fn test_progress_events_end_with_complete() {
    let api = Arc::new(FakeAccounting::new().with_parent("p-1", "NY25001 Lobby refit"));
    let (sink, mut receiver) = ChannelSink::new();

    let outcome = pipeline(api, ExecutorConfig::live())
        .with_sink(Arc::new(sink))
        .run(vec![manhour("NY25001")])
        .await;

    let mut events = Vec::new();
    while let Ok(envelope) = receiver.try_recv() {
        assert_eq!(envelope.session_id, outcome.session.id);
        events.push(envelope.event);
    }

    let step_updates = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::Progress { .. }))
        .count();
    assert_eq!(step_updates, 8);
    assert!(events
        .iter()
        .any(|e| matches!(e, ProgressEvent::PipelineProgress { processed: 1, total: 1, .. })));
    assert!(matches!(events.last(), Some(ProgressEvent::Complete { .. })));
}

fn line(id: &str, name: &str, price: i64, quantity: i64) -> LineItem {
    LineItem {
        id: id.to_string(),
        name: name.to_string(),
        price: Some(Money::from_minor_units(price)),
        price_raw: None,
        quantity,
        duration_minutes: 60,
        charge_type: None,
    }
}

#[tokio::test]
async fn test_validate_deals_previews_without_mutating() {
    let api = Arc::new(FakeAccounting::new().with_parent("p-1", "NY25001 Lobby refit"));
    let deals = vec![
        Deal {
            id: "d-1".to_string(),
            name: "Lobby refit".to_string(),
            project_code: Some("NY25001".to_string()),
            quote_total: Some(Money::from_minor_units(10000)),
            quote_total_raw: Some("100.00".to_string()),
            line_items: vec![line("l-1", "Manhour", 5000, 2)],
        },
        Deal {
            id: "d-2".to_string(),
            name: "Roof".to_string(),
            project_code: Some("NY25001".to_string()),
            quote_total: Some(Money::from_minor_units(999)),
            quote_total_raw: Some("9.99".to_string()),
            line_items: vec![line("l-2", "Survey", 5000, 1)],
        },
    ];
    let (sink, mut receiver) = ChannelSink::new();

    let outcome = pipeline(api.clone(), ExecutorConfig::live())
        .with_sink(Arc::new(sink))
        .validate_deals(&deals, &DealMapper::new(TaskCategory::Time))
        .await;

    assert_eq!(outcome.session.summary.invalid_quotes, 1);
    assert!(outcome.session.summary.dry_run);
    assert_eq!(outcome.plan.count(PlanAction::Create), 2);
    assert_eq!(api.mutation_calls(), 0);
    assert_eq!(
        outcome.session.step(STEP_VALIDATE).map(|s| s.status),
        Some(StepStatus::Completed)
    );

    let mut invalid = Vec::new();
    while let Ok(envelope) = receiver.try_recv() {
        if let ProgressEvent::ValidationProgress { valid: false, detail, .. } = envelope.event {
            invalid.push(detail.unwrap_or_default());
        }
    }
    assert_eq!(invalid.len(), 1);
    assert!(invalid[0].contains("d-2"));
}
