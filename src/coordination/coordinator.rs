//! Task coordinator: claim arbitration, retry policy, and the approval gate
//!
//! Every lifecycle operation runs as a single store transaction: load,
//! validate, write, and append the side-channel records under one commit.
//! Splitting a transition across transactions would break the at-most-one
//! claim guarantee, so nothing here holds state outside the store; the only
//! in-process machinery is the event broadcast channel.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{ActivityKind, CreateTaskRequest, NotificationKind};
use crate::store::Store;

use super::queue;
use super::task::{
    truncated, ApprovalDecision, ApprovalTier, ClaimDenied, ClaimOutcome, FailAction, Task,
    TaskStatus, DEFAULT_APPROVAL_TIMEOUT_MINUTES, NOTIFY_EXCERPT_MAX, SUMMARY_MAX,
};

/// Events emitted by the coordinator
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CoordinationEvent {
    /// A task was created
    TaskCreated {
        task_id: Uuid,
        title: String,
        creator_id: String,
    },
    /// A task was claimed
    TaskClaimed { task_id: Uuid, agent_id: String },
    /// A task was completed
    TaskCompleted { task_id: Uuid, agent_id: String },
    /// A failed task was released for another attempt
    TaskRetried {
        task_id: Uuid,
        agent_id: String,
        retry_count: u32,
        max_retries: u32,
    },
    /// A task exhausted its retries or failed terminally
    TaskDeadLettered {
        task_id: Uuid,
        agent_id: String,
        retry_count: u32,
    },
    /// An operator returned a dead-lettered task to the queue
    TaskRequeued { task_id: Uuid },
    /// An agent asked for an approval decision
    ApprovalRequested {
        task_id: Uuid,
        agent_id: String,
        tier: ApprovalTier,
    },
    /// A pending approval was decided
    ApprovalResolved {
        task_id: Uuid,
        decision: ApprovalDecision,
        responded_by: String,
    },
    /// An agent reported progress on a claimed task
    ProgressReported {
        task_id: Uuid,
        agent_id: String,
        percent_complete: Option<u8>,
    },
    /// A message was posted to a task thread
    MessagePosted { task_id: Uuid, author_id: String },
}

/// Well-known agents the coordinator notifies
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Notified about dead letters and rejections
    pub supervisor: String,
    /// Receives approval requests
    pub approver: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            supervisor: "supervisor".to_string(),
            approver: "operator".to_string(),
        }
    }
}

/// Coordinates the task lifecycle over the store
pub struct TaskCoordinator {
    store: Store,
    config: CoordinatorConfig,
    event_tx: broadcast::Sender<CoordinationEvent>,
}

impl TaskCoordinator {
    /// Create a new coordinator over the given store
    pub fn new(store: Store, config: CoordinatorConfig) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            store,
            config,
            event_tx,
        }
    }

    /// Subscribe to coordination events
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinationEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: CoordinationEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Create a pending task and notify its assignees
    pub async fn create_task(&self, req: CreateTaskRequest) -> Result<Task> {
        let mut task = Task::new(req.title, req.assignees, req.creator_id);
        if let Some(description) = req.description {
            task = task.with_description(description);
        }
        if let Some(priority) = req.priority {
            task = task.with_priority(priority);
        }
        if let Some(parent) = req.parent_task_id {
            task = task.with_parent(parent);
        }
        if let Some(max_retries) = req.max_retries {
            task = task.with_max_retries(max_retries);
        }

        let mut tx = self.store.begin().await?;
        Store::insert_task(&mut tx, &task).await?;
        for assignee in &task.assignees {
            Store::insert_notification(
                &mut tx,
                assignee,
                NotificationKind::TaskAssigned,
                &format!("New task: {}", truncated(&task.title, NOTIFY_EXCERPT_MAX)),
                Some(task.id),
            )
            .await?;
        }
        Store::insert_activity(
            &mut tx,
            &task.creator_id,
            ActivityKind::TaskStarted,
            &format!("Created: {}", truncated(&task.title, NOTIFY_EXCERPT_MAX)),
            Some(task.id),
        )
        .await?;
        tx.commit().await?;

        tracing::info!(task_id = %task.id, title = %task.title, "task created");
        self.emit(CoordinationEvent::TaskCreated {
            task_id: task.id,
            title: task.title.clone(),
            creator_id: task.creator_id.clone(),
        });

        Ok(task)
    }

    /// Pending tasks `agent_id` may claim, best first
    pub async fn list_claimable(&self, agent_id: &str) -> Result<Vec<Task>> {
        let mut tasks = self
            .store
            .tasks_with_status(TaskStatus::Pending.as_str())
            .await?;
        tasks.retain(|t| queue::eligible(t, agent_id));
        tasks.sort_by(queue::claim_order);
        Ok(tasks)
    }

    /// Attempt to claim a task for an agent
    ///
    /// Atomic against the store: of two concurrent claims on the same task,
    /// exactly one commits the pending to in_progress transition; the loser
    /// sees a denial value, never an error.
    pub async fn claim(&self, task_id: Uuid, agent_id: &str) -> Result<ClaimOutcome> {
        let mut tx = self.store.begin().await?;
        let Some(mut task) = Store::load_task(&mut tx, task_id).await? else {
            return Ok(ClaimOutcome::Denied(ClaimDenied::NotFound));
        };

        let now = chrono::Utc::now();
        if let Err(denied) = task.begin_claim(agent_id, now) {
            return Ok(ClaimOutcome::Denied(denied));
        }

        Store::save_task(&mut tx, &task).await?;
        Store::insert_activity(
            &mut tx,
            agent_id,
            ActivityKind::TaskStarted,
            &format!(
                "{} claimed task: {}",
                agent_id,
                truncated(&task.title, NOTIFY_EXCERPT_MAX)
            ),
            Some(task.id),
        )
        .await?;
        Store::insert_audit(
            &mut tx,
            "task_claimed",
            agent_id,
            "task",
            Some(&task.id.to_string()),
            Some(
                &serde_json::json!({ "title": task.title, "priority": task.priority })
                    .to_string(),
            ),
        )
        .await?;
        tx.commit().await?;

        tracing::info!(task_id = %task.id, agent_id, "task claimed");
        self.emit(CoordinationEvent::TaskClaimed {
            task_id: task.id,
            agent_id: agent_id.to_string(),
        });

        Ok(ClaimOutcome::Claimed(task))
    }

    /// Mark a task completed and fan out the completion records
    pub async fn complete(
        &self,
        task_id: Uuid,
        agent_id: &str,
        result_summary: &str,
        output_document_id: Option<Uuid>,
    ) -> Result<Task> {
        let mut tx = self.store.begin().await?;
        let mut task = Store::load_task(&mut tx, task_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Task {} not found", task_id)))?;

        task.record_completion(result_summary, output_document_id, chrono::Utc::now());
        Store::save_task(&mut tx, &task).await?;

        let summary = task.result_summary.clone().unwrap_or_default();
        Store::insert_message(
            &mut tx,
            task.id,
            agent_id,
            &format!("[COMPLETE] {}", summary),
            &[],
        )
        .await?;
        Store::insert_activity(
            &mut tx,
            agent_id,
            ActivityKind::TaskCompleted,
            &format!(
                "{} completed: {}",
                agent_id,
                truncated(&task.title, NOTIFY_EXCERPT_MAX)
            ),
            Some(task.id),
        )
        .await?;
        Store::insert_audit(
            &mut tx,
            "task_completed",
            agent_id,
            "task",
            Some(&task.id.to_string()),
            Some(&summary),
        )
        .await?;
        for assignee in task.assignees.iter().filter(|a| *a != agent_id) {
            Store::insert_notification(
                &mut tx,
                assignee,
                NotificationKind::TaskCompleted,
                &format!(
                    "{} completed task: {}",
                    agent_id,
                    truncated(&task.title, NOTIFY_EXCERPT_MAX)
                ),
                Some(task.id),
            )
            .await?;
        }
        tx.commit().await?;

        tracing::info!(task_id = %task.id, agent_id, "task completed");
        self.emit(CoordinationEvent::TaskCompleted {
            task_id: task.id,
            agent_id: agent_id.to_string(),
        });

        Ok(task)
    }

    /// Record a failed attempt: release the claim and retry, or dead-letter
    /// when the budget is gone
    ///
    /// Retry exhaustion is not an error to the caller; a dead-letter is a
    /// successful transition.
    pub async fn fail(
        &self,
        task_id: Uuid,
        agent_id: &str,
        error_message: &str,
        terminal: bool,
    ) -> Result<FailAction> {
        let mut tx = self.store.begin().await?;
        let mut task = Store::load_task(&mut tx, task_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Task {} not found", task_id)))?;

        let action = task.record_failure(error_message, terminal, chrono::Utc::now());
        Store::save_task(&mut tx, &task).await?;

        match action {
            FailAction::DeadLetter => {
                Store::insert_notification(
                    &mut tx,
                    &self.config.supervisor,
                    NotificationKind::System,
                    &format!(
                        "DEAD LETTER: Task \"{}\" failed {} times. Last error: {}",
                        truncated(&task.title, NOTIFY_EXCERPT_MAX),
                        task.retry_count,
                        truncated(error_message, NOTIFY_EXCERPT_MAX)
                    ),
                    Some(task.id),
                )
                .await?;
                Store::insert_audit(
                    &mut tx,
                    "task_dead_lettered",
                    agent_id,
                    "task",
                    Some(&task.id.to_string()),
                    Some(
                        &serde_json::json!({
                            "retry_count": task.retry_count,
                            "last_error": truncated(error_message, SUMMARY_MAX),
                        })
                        .to_string(),
                    ),
                )
                .await?;
            }
            FailAction::Retry => {
                Store::insert_activity(
                    &mut tx,
                    agent_id,
                    ActivityKind::TaskStarted,
                    &format!(
                        "Retry {}/{} for: {}",
                        task.retry_count,
                        task.max_retries,
                        truncated(&task.title, NOTIFY_EXCERPT_MAX)
                    ),
                    Some(task.id),
                )
                .await?;
            }
        }
        tx.commit().await?;

        match action {
            FailAction::DeadLetter => {
                tracing::warn!(task_id = %task.id, agent_id, retry_count = task.retry_count, "task dead-lettered");
                self.emit(CoordinationEvent::TaskDeadLettered {
                    task_id: task.id,
                    agent_id: agent_id.to_string(),
                    retry_count: task.retry_count,
                });
            }
            FailAction::Retry => {
                tracing::info!(task_id = %task.id, agent_id, retry_count = task.retry_count, "task released for retry");
                self.emit(CoordinationEvent::TaskRetried {
                    task_id: task.id,
                    agent_id: agent_id.to_string(),
                    retry_count: task.retry_count,
                    max_retries: task.max_retries,
                });
            }
        }

        Ok(action)
    }

    /// Return a dead-lettered task to the queue (operator recovery)
    pub async fn requeue(&self, task_id: Uuid, reset_retry_count: bool) -> Result<Task> {
        let mut tx = self.store.begin().await?;
        let mut task = Store::load_task(&mut tx, task_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Task {} not found", task_id)))?;

        task.requeue(reset_retry_count, chrono::Utc::now());
        Store::save_task(&mut tx, &task).await?;
        Store::insert_audit(
            &mut tx,
            "task_requeued",
            &self.config.supervisor,
            "task",
            Some(&task.id.to_string()),
            Some(&serde_json::json!({ "reset_retry_count": reset_retry_count }).to_string()),
        )
        .await?;
        tx.commit().await?;

        tracing::info!(task_id = %task.id, reset_retry_count, "task requeued");
        self.emit(CoordinationEvent::TaskRequeued { task_id: task.id });

        Ok(task)
    }

    /// Pause a claimed task behind a human-approval gate
    ///
    /// Returns the id of the approval notification sent to the configured
    /// approver. For the `notify` tier the auto-proceed timer is an external
    /// collaborator's job; only the tier and window are recorded here.
    pub async fn request_approval(
        &self,
        task_id: Uuid,
        agent_id: &str,
        action_description: &str,
        tier: ApprovalTier,
        timeout_minutes: Option<u32>,
    ) -> Result<Uuid> {
        let mut tx = self.store.begin().await?;
        let mut task = Store::load_task(&mut tx, task_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Task {} not found", task_id)))?;

        task.open_approval(tier, chrono::Utc::now());

        let timeout = timeout_minutes.unwrap_or(DEFAULT_APPROVAL_TIMEOUT_MINUTES);
        let content = approval_request_content(&task, agent_id, action_description, tier, timeout);
        let notification_id = Store::insert_notification(
            &mut tx,
            &self.config.approver,
            NotificationKind::ApprovalRequest,
            &content,
            Some(task.id),
        )
        .await?;
        task.approval_notification_id = Some(notification_id);
        Store::save_task(&mut tx, &task).await?;

        Store::insert_audit(
            &mut tx,
            "approval_requested",
            agent_id,
            "task",
            Some(&task.id.to_string()),
            Some(
                &serde_json::json!({
                    "tier": tier,
                    "action": truncated(action_description, SUMMARY_MAX),
                })
                .to_string(),
            ),
        )
        .await?;
        tx.commit().await?;

        tracing::info!(task_id = %task.id, agent_id, tier = tier.as_str(), "approval requested");
        self.emit(CoordinationEvent::ApprovalRequested {
            task_id: task.id,
            agent_id: agent_id.to_string(),
            tier,
        });

        Ok(notification_id)
    }

    /// Resolve a pending approval
    ///
    /// Approval does not change `status`; the claim holder resumes by
    /// observing the decision. Rejection archives the task permanently and
    /// tells both the claim holder and the supervisor.
    pub async fn respond_to_approval(
        &self,
        task_id: Uuid,
        decision: ApprovalDecision,
        responded_by: &str,
        rejection_reason: Option<&str>,
    ) -> Result<Task> {
        let mut tx = self.store.begin().await?;
        let mut task = Store::load_task(&mut tx, task_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Task {} not found", task_id)))?;

        if !task.has_pending_approval() {
            return Err(AppError::NoPendingApproval(task_id));
        }

        task.resolve_approval(decision, responded_by, rejection_reason, chrono::Utc::now());
        Store::save_task(&mut tx, &task).await?;

        match decision {
            ApprovalDecision::Approved => {
                if let Some(holder) = &task.claimed_by {
                    Store::insert_notification(
                        &mut tx,
                        holder,
                        NotificationKind::TaskAssigned,
                        &format!(
                            "APPROVED: You may proceed with task \"{}\"",
                            truncated(&task.title, NOTIFY_EXCERPT_MAX)
                        ),
                        Some(task.id),
                    )
                    .await?;
                }
            }
            ApprovalDecision::Rejected => {
                let content = format!(
                    "REJECTED: Task \"{}\" was rejected by {}. Reason: {}",
                    truncated(&task.title, NOTIFY_EXCERPT_MAX),
                    responded_by,
                    rejection_reason.unwrap_or("none")
                );
                if let Some(holder) = &task.claimed_by {
                    Store::insert_notification(
                        &mut tx,
                        holder,
                        NotificationKind::System,
                        &content,
                        Some(task.id),
                    )
                    .await?;
                }
                Store::insert_notification(
                    &mut tx,
                    &self.config.supervisor,
                    NotificationKind::System,
                    &content,
                    Some(task.id),
                )
                .await?;
            }
        }

        if let Some(notification_id) = task.approval_notification_id {
            Store::set_notification_delivered(&mut tx, notification_id).await?;
        }

        Store::insert_audit(
            &mut tx,
            "approval_responded",
            responded_by,
            "task",
            Some(&task.id.to_string()),
            Some(
                &serde_json::json!({
                    "decision": decision,
                    "rejection_reason": rejection_reason,
                })
                .to_string(),
            ),
        )
        .await?;
        tx.commit().await?;

        tracing::info!(task_id = %task.id, decision = decision.as_str(), responded_by, "approval resolved");
        self.emit(CoordinationEvent::ApprovalResolved {
            task_id: task.id,
            decision,
            responded_by: responded_by.to_string(),
        });

        Ok(task)
    }

    /// Append a progress note to the task thread and activity feed
    pub async fn write_progress(
        &self,
        task_id: Uuid,
        agent_id: &str,
        progress_note: &str,
        percent_complete: Option<u8>,
    ) -> Result<()> {
        let mut tx = self.store.begin().await?;
        Store::load_task(&mut tx, task_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Task {} not found", task_id)))?;

        let content = match percent_complete {
            Some(percent) => format!("[PROGRESS] {} ({}%)", progress_note, percent),
            None => format!("[PROGRESS] {}", progress_note),
        };
        Store::insert_message(&mut tx, task_id, agent_id, &content, &[]).await?;
        Store::insert_activity(
            &mut tx,
            agent_id,
            ActivityKind::TaskStarted,
            &truncated(progress_note, NOTIFY_EXCERPT_MAX),
            Some(task_id),
        )
        .await?;
        tx.commit().await?;

        self.emit(CoordinationEvent::ProgressReported {
            task_id,
            agent_id: agent_id.to_string(),
            percent_complete,
        });

        Ok(())
    }

    /// Post a message to a task thread, notifying mentioned agents
    pub async fn send_message(
        &self,
        task_id: Uuid,
        author_id: &str,
        content: &str,
        mentions: &[String],
    ) -> Result<Uuid> {
        let mut tx = self.store.begin().await?;
        let task = Store::load_task(&mut tx, task_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Task {} not found", task_id)))?;

        let message_id = Store::insert_message(&mut tx, task_id, author_id, content, mentions).await?;
        for mention in mentions {
            Store::insert_notification(
                &mut tx,
                mention,
                NotificationKind::Mention,
                &format!(
                    "{} mentioned you in task \"{}\": {}",
                    author_id,
                    truncated(&task.title, NOTIFY_EXCERPT_MAX),
                    truncated(content, NOTIFY_EXCERPT_MAX)
                ),
                Some(task_id),
            )
            .await?;
        }
        Store::insert_activity(
            &mut tx,
            author_id,
            ActivityKind::MessageSent,
            &format!(
                "{} posted in: {}",
                author_id,
                truncated(&task.title, NOTIFY_EXCERPT_MAX)
            ),
            Some(task_id),
        )
        .await?;
        tx.commit().await?;

        self.emit(CoordinationEvent::MessagePosted {
            task_id,
            author_id: author_id.to_string(),
        });

        Ok(message_id)
    }

    /// Fetch a single task
    pub async fn task(&self, task_id: Uuid) -> Result<Task> {
        self.store.get_task(task_id).await
    }

    /// Dead-lettered tasks, most recently parked first
    pub async fn list_dead_lettered(&self) -> Result<Vec<Task>> {
        self.store.dead_lettered_tasks().await
    }
}

fn approval_request_content(
    task: &Task,
    agent_id: &str,
    action_description: &str,
    tier: ApprovalTier,
    timeout_minutes: u32,
) -> String {
    let mut content = format!(
        "APPROVAL REQUIRED\nTask: {}\nAgent: {}\nTier: {}\nAction: {}\n",
        truncated(&task.title, NOTIFY_EXCERPT_MAX),
        agent_id,
        tier.as_str().to_uppercase(),
        truncated(action_description, SUMMARY_MAX),
    );
    match tier {
        ApprovalTier::Notify => {
            content.push_str(&format!(
                "Auto-proceeds in {} min if no response.\n",
                timeout_minutes
            ));
        }
        ApprovalTier::Gate => {
            content.push_str("Task is blocked until you respond.\n");
        }
    }
    content.push_str(&format!("Reply APPROVE {} or REJECT {}.", task.id, task.id));
    content
}
