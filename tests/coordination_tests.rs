//! Task lifecycle integration tests
//!
//! Exercises the coordinator end-to-end over an in-memory database: claim
//! arbitration, the retry/dead-letter policy, operator requeue, and the
//! approval gate.

use foreman::coordination::{
    ApprovalDecision, ApprovalStatus, ApprovalTier, ClaimDenied, ClaimOutcome, CoordinatorConfig,
    FailAction, TaskCoordinator, TaskStatus,
};
use foreman::models::CreateTaskRequest;
use foreman::store::Store;
use sqlx::sqlite::SqlitePoolOptions;
use uuid::Uuid;

async fn setup_coordinator() -> TaskCoordinator {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    TaskCoordinator::new(Store::new(pool), CoordinatorConfig::default())
}

fn request(title: &str, assignees: &[&str]) -> CreateTaskRequest {
    CreateTaskRequest {
        title: title.to_string(),
        description: None,
        assignees: assignees.iter().map(|a| a.to_string()).collect(),
        priority: None,
        creator_id: "planner".to_string(),
        parent_task_id: None,
        max_retries: None,
    }
}

#[tokio::test]
async fn at_most_one_claim_wins() {
    let coordinator = setup_coordinator().await;
    let task = coordinator
        .create_task(request("Contested", &["alpha", "beta"]))
        .await
        .unwrap();

    let first = coordinator.claim(task.id, "alpha").await.unwrap();
    assert!(first.is_claimed());

    let second = coordinator.claim(task.id, "beta").await.unwrap();
    match second {
        ClaimOutcome::Denied(reason) => assert!(matches!(
            reason,
            ClaimDenied::WrongStatus | ClaimDenied::AlreadyClaimed
        )),
        ClaimOutcome::Claimed(_) => panic!("second claim must not win"),
    }
}

#[tokio::test]
async fn claim_on_task_held_by_other_agent_does_not_mutate() {
    let coordinator = setup_coordinator().await;
    let task = coordinator
        .create_task(request("T1", &["A", "B"]))
        .await
        .unwrap();

    assert!(coordinator.claim(task.id, "B").await.unwrap().is_claimed());
    let before = coordinator.task(task.id).await.unwrap();

    let outcome = coordinator.claim(task.id, "A").await.unwrap();
    assert!(matches!(
        outcome,
        ClaimOutcome::Denied(ClaimDenied::AlreadyClaimed)
    ));

    let after = coordinator.task(task.id).await.unwrap();
    assert_eq!(after.claimed_by, before.claimed_by);
    assert_eq!(after.updated_at, before.updated_at);
    assert_eq!(after.status, TaskStatus::InProgress);
}

#[tokio::test]
async fn claim_missing_task_reports_not_found() {
    let coordinator = setup_coordinator().await;
    let outcome = coordinator.claim(Uuid::new_v4(), "alpha").await.unwrap();
    assert!(matches!(
        outcome,
        ClaimOutcome::Denied(ClaimDenied::NotFound)
    ));
}

#[tokio::test]
async fn retry_count_survives_reclaim() {
    let coordinator = setup_coordinator().await;
    let task = coordinator
        .create_task(request("Flaky", &["alpha"]))
        .await
        .unwrap();

    for expected in 1..=2 {
        coordinator.claim(task.id, "alpha").await.unwrap();
        let action = coordinator
            .fail(task.id, "alpha", "transient", false)
            .await
            .unwrap();
        assert_eq!(action, FailAction::Retry);
        let fetched = coordinator.task(task.id).await.unwrap();
        assert_eq!(fetched.retry_count, expected);
    }

    // a successful claim does not reset the counter
    let outcome = coordinator.claim(task.id, "alpha").await.unwrap();
    let ClaimOutcome::Claimed(claimed) = outcome else {
        panic!("expected claim to succeed");
    };
    assert_eq!(claimed.retry_count, 2);
}

#[tokio::test]
async fn three_retries_then_dead_letter() {
    let coordinator = setup_coordinator().await;
    let task = coordinator
        .create_task(request("Doomed", &["alpha"]))
        .await
        .unwrap();
    assert_eq!(task.max_retries, 3);

    for expected in 1..=3u32 {
        coordinator.claim(task.id, "alpha").await.unwrap();
        let action = coordinator
            .fail(task.id, "alpha", "still broken", false)
            .await
            .unwrap();
        assert_eq!(action, FailAction::Retry, "attempt {}", expected);
        assert_eq!(
            coordinator.task(task.id).await.unwrap().retry_count,
            expected
        );
    }

    coordinator.claim(task.id, "alpha").await.unwrap();
    let action = coordinator
        .fail(task.id, "alpha", "still broken", false)
        .await
        .unwrap();
    assert_eq!(action, FailAction::DeadLetter);

    let fetched = coordinator.task(task.id).await.unwrap();
    assert_eq!(fetched.retry_count, 4);
    assert!(fetched.dead_lettered);
    assert_eq!(fetched.status, TaskStatus::Pending);
    assert!(fetched.claimed_by.is_none());
}

#[tokio::test]
async fn terminal_failure_dead_letters_immediately() {
    let coordinator = setup_coordinator().await;
    let task = coordinator
        .create_task(request("Misconfigured", &["alpha"]))
        .await
        .unwrap();
    coordinator.claim(task.id, "alpha").await.unwrap();

    let action = coordinator
        .fail(task.id, "alpha", "no such bucket", true)
        .await
        .unwrap();
    assert_eq!(action, FailAction::DeadLetter);

    let fetched = coordinator.task(task.id).await.unwrap();
    assert!(fetched.dead_lettered);
    assert_eq!(fetched.retry_count, 1);
    assert!(fetched.claimed_by.is_none());
}

#[tokio::test]
async fn dead_lettered_tasks_never_listed_claimable() {
    let coordinator = setup_coordinator().await;
    let task = coordinator
        .create_task(request("Parked", &["alpha"]))
        .await
        .unwrap();
    coordinator.claim(task.id, "alpha").await.unwrap();
    coordinator.fail(task.id, "alpha", "fatal", true).await.unwrap();

    assert!(coordinator.list_claimable("alpha").await.unwrap().is_empty());

    let parked = coordinator.list_dead_lettered().await.unwrap();
    assert_eq!(parked.len(), 1);
    assert_eq!(parked[0].id, task.id);
}

#[tokio::test]
async fn requeue_restores_claim_eligibility() {
    let coordinator = setup_coordinator().await;
    let task = coordinator
        .create_task(request("Parked", &["alpha"]))
        .await
        .unwrap();
    coordinator.claim(task.id, "alpha").await.unwrap();
    coordinator.fail(task.id, "alpha", "fatal", true).await.unwrap();

    let requeued = coordinator.requeue(task.id, true).await.unwrap();
    assert!(!requeued.dead_lettered);
    assert_eq!(requeued.status, TaskStatus::Pending);
    assert_eq!(requeued.retry_count, 0);

    let claimable = coordinator.list_claimable("alpha").await.unwrap();
    assert_eq!(claimable.len(), 1);
    assert_eq!(claimable[0].id, task.id);
}

#[tokio::test]
async fn requeue_without_reset_keeps_retry_count() {
    let coordinator = setup_coordinator().await;
    let task = coordinator
        .create_task(request("Parked", &["alpha"]))
        .await
        .unwrap();
    coordinator.claim(task.id, "alpha").await.unwrap();
    coordinator.fail(task.id, "alpha", "fatal", true).await.unwrap();

    let requeued = coordinator.requeue(task.id, false).await.unwrap();
    assert_eq!(requeued.retry_count, 1);
}

#[tokio::test]
async fn approval_request_pauses_queue_visibility() {
    let coordinator = setup_coordinator().await;
    let task = coordinator
        .create_task(request("Gated", &["alpha"]))
        .await
        .unwrap();
    coordinator.claim(task.id, "alpha").await.unwrap();
    // release it so it would otherwise be claimable again
    coordinator.fail(task.id, "alpha", "retryable", false).await.unwrap();
    assert_eq!(coordinator.list_claimable("alpha").await.unwrap().len(), 1);

    coordinator
        .request_approval(task.id, "alpha", "touch production", ApprovalTier::Gate, None)
        .await
        .unwrap();

    assert!(coordinator.list_claimable("alpha").await.unwrap().is_empty());
}

#[tokio::test]
async fn approval_does_not_readmit_to_queue() {
    let coordinator = setup_coordinator().await;
    let task = coordinator
        .create_task(request("Gated", &["alpha"]))
        .await
        .unwrap();
    coordinator.claim(task.id, "alpha").await.unwrap();
    coordinator
        .request_approval(task.id, "alpha", "touch production", ApprovalTier::Gate, None)
        .await
        .unwrap();

    let resolved = coordinator
        .respond_to_approval(task.id, ApprovalDecision::Approved, "operator", None)
        .await
        .unwrap();
    assert_eq!(resolved.approval_status, Some(ApprovalStatus::Approved));
    assert_eq!(resolved.status, TaskStatus::InProgress);

    // still in progress, so still not claimable; the holder resumes by polling
    assert!(coordinator.list_claimable("alpha").await.unwrap().is_empty());
}

#[tokio::test]
async fn rejection_archives_permanently() {
    let coordinator = setup_coordinator().await;
    let task = coordinator
        .create_task(request("Gated", &["alpha"]))
        .await
        .unwrap();
    coordinator.claim(task.id, "alpha").await.unwrap();
    coordinator
        .request_approval(task.id, "alpha", "touch production", ApprovalTier::Gate, None)
        .await
        .unwrap();

    let rejected = coordinator
        .respond_to_approval(
            task.id,
            ApprovalDecision::Rejected,
            "operator",
            Some("too risky"),
        )
        .await
        .unwrap();
    assert_eq!(rejected.status, TaskStatus::Archived);
    assert_eq!(rejected.approval_status, Some(ApprovalStatus::Rejected));

    // archived is terminal: not claimable, and a fresh claim is denied
    assert!(coordinator.list_claimable("alpha").await.unwrap().is_empty());
    let outcome = coordinator.claim(task.id, "alpha").await.unwrap();
    assert!(matches!(
        outcome,
        ClaimOutcome::Denied(ClaimDenied::WrongStatus)
    ));
}

#[tokio::test]
async fn respond_twice_is_rejected_as_misuse() {
    let coordinator = setup_coordinator().await;
    let task = coordinator
        .create_task(request("Gated", &["alpha"]))
        .await
        .unwrap();
    coordinator.claim(task.id, "alpha").await.unwrap();
    coordinator
        .request_approval(task.id, "alpha", "touch production", ApprovalTier::Notify, None)
        .await
        .unwrap();
    coordinator
        .respond_to_approval(task.id, ApprovalDecision::Approved, "operator", None)
        .await
        .unwrap();

    let result = coordinator
        .respond_to_approval(task.id, ApprovalDecision::Approved, "operator", None)
        .await;
    assert!(result.is_err());
}
