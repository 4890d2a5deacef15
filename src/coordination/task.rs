//! Task records and their lifecycle transitions
//!
//! A task is created pending, claimed by exactly one agent at a time, and
//! either completed, retried on failure until its retry budget runs out, or
//! parked in the dead-letter queue for an operator. An approval gate can pause
//! a claimed task until a human decides.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Retry budget applied when a task does not specify one
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Maximum stored length for result summaries, dead-letter reasons, and
/// rejection notes
pub const SUMMARY_MAX: usize = 500;

/// Maximum stored length for the last execution error
pub const LAST_ERROR_MAX: usize = 2000;

/// Maximum length for titles and excerpts echoed into notifications and
/// activity lines
pub const NOTIFY_EXCERPT_MAX: usize = 200;

/// Sort weight for tasks without a priority (below `low`)
pub const ABSENT_PRIORITY_WEIGHT: u8 = 4;

/// Auto-proceed window for `notify`-tier approvals when none is given
pub const DEFAULT_APPROVAL_TIMEOUT_MINUTES: u32 = 30;

/// Truncate a string to at most `max` characters
pub fn truncated(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// Status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be claimed
    Pending,
    /// Claimed and being worked on
    InProgress,
    /// Output submitted for review
    Review,
    /// Finished successfully (terminal for the success path)
    Completed,
    /// Closed without completion (terminal)
    Archived,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Review => "review",
            TaskStatus::Completed => "completed",
            TaskStatus::Archived => "archived",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "review" => Ok(TaskStatus::Review),
            "completed" => Ok(TaskStatus::Completed),
            "archived" => Ok(TaskStatus::Archived),
            _ => Err(format!("Invalid task status: {}", s)),
        }
    }
}

/// Priority level for tasks; a task with no priority sorts last
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Urgent,
    High,
    Medium,
    Low,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Urgent => "urgent",
            TaskPriority::High => "high",
            TaskPriority::Medium => "medium",
            TaskPriority::Low => "low",
        }
    }

    /// Sort weight, ascending: urgent first
    pub fn weight(&self) -> u8 {
        match self {
            TaskPriority::Urgent => 0,
            TaskPriority::High => 1,
            TaskPriority::Medium => 2,
            TaskPriority::Low => 3,
        }
    }
}

impl std::str::FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "urgent" => Ok(TaskPriority::Urgent),
            "high" => Ok(TaskPriority::High),
            "medium" => Ok(TaskPriority::Medium),
            "low" => Ok(TaskPriority::Low),
            _ => Err(format!("Invalid task priority: {}", s)),
        }
    }
}

/// Approval tier: `notify` implies an externally-enforced auto-proceed
/// timeout, `gate` blocks until answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalTier {
    Notify,
    Gate,
}

impl ApprovalTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalTier::Notify => "notify",
            ApprovalTier::Gate => "gate",
        }
    }
}

impl std::str::FromStr for ApprovalTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "notify" => Ok(ApprovalTier::Notify),
            "gate" => Ok(ApprovalTier::Gate),
            _ => Err(format!("Invalid approval tier: {}", s)),
        }
    }
}

/// Status of a task's approval gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Waiting for a decision; the task is paused
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for ApprovalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ApprovalStatus::Pending),
            "approved" => Ok(ApprovalStatus::Approved),
            "rejected" => Ok(ApprovalStatus::Rejected),
            _ => Err(format!("Invalid approval status: {}", s)),
        }
    }
}

/// Decision taken on a pending approval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

impl ApprovalDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalDecision::Approved => "approved",
            ApprovalDecision::Rejected => "rejected",
        }
    }
}

impl From<ApprovalDecision> for ApprovalStatus {
    fn from(decision: ApprovalDecision) -> Self {
        match decision {
            ApprovalDecision::Approved => ApprovalStatus::Approved,
            ApprovalDecision::Rejected => ApprovalStatus::Rejected,
        }
    }
}

/// Reason a claim attempt was denied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimDenied {
    NotFound,
    WrongStatus,
    AlreadyClaimed,
}

impl ClaimDenied {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimDenied::NotFound => "not_found",
            ClaimDenied::WrongStatus => "wrong_status",
            ClaimDenied::AlreadyClaimed => "already_claimed",
        }
    }
}

/// Outcome of a claim attempt; contention is a value, not an error
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    Claimed(Task),
    Denied(ClaimDenied),
}

impl ClaimOutcome {
    pub fn is_claimed(&self) -> bool {
        matches!(self, ClaimOutcome::Claimed(_))
    }
}

/// What `fail` decided to do with the task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailAction {
    /// Released back to the queue for another attempt
    Retry,
    /// Retry budget exhausted (or terminal error); parked for an operator
    DeadLetter,
}

impl FailAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailAction::Retry => "retry",
            FailAction::DeadLetter => "dead_letter",
        }
    }
}

/// A unit of work coordinated among agents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: Uuid,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: TaskStatus,
    /// Absent priority sorts below `low`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
    /// Agents eligible to claim this task
    pub assignees: Vec<String>,
    pub creator_id: String,
    /// Back-reference only; no ownership semantics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<Uuid>,
    /// Agent currently holding the claim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    /// Failed attempts so far; never reset except by operator requeue
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Parked for manual intervention; excluded from claim eligibility
    pub dead_lettered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dead_lettered_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dead_letter_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_tier: Option<ApprovalTier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_status: Option<ApprovalStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_requested_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_responded_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_notification_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_document_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new pending task
    pub fn new(
        title: impl Into<String>,
        assignees: Vec<String>,
        creator_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: None,
            status: TaskStatus::Pending,
            priority: None,
            assignees,
            creator_id: creator_id.into(),
            parent_task_id: None,
            claimed_by: None,
            claimed_at: None,
            started_at: None,
            completed_at: None,
            failed_at: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            last_error: None,
            dead_lettered: false,
            dead_lettered_at: None,
            dead_letter_reason: None,
            approval_tier: None,
            approval_status: None,
            approval_requested_at: None,
            approval_responded_at: None,
            approval_notification_id: None,
            result_summary: None,
            output_document_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Reference a parent task
    pub fn with_parent(mut self, parent_task_id: Uuid) -> Self {
        self.parent_task_id = Some(parent_task_id);
        self
    }

    /// Override the retry budget
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Whether an approval decision is outstanding
    pub fn has_pending_approval(&self) -> bool {
        self.approval_status == Some(ApprovalStatus::Pending)
    }

    /// Attempt to claim this task for `agent_id`
    ///
    /// A re-claim by the agent already holding an in-progress task is an
    /// accepted idempotent retry, refreshing timestamps only. A task paused
    /// behind a pending approval is never claimable, whatever its status.
    pub fn begin_claim(
        &mut self,
        agent_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ClaimDenied> {
        if self.status == TaskStatus::InProgress
            && self.claimed_by.as_deref() == Some(agent_id)
            && !self.has_pending_approval()
        {
            self.claimed_at = Some(now);
            self.updated_at = now;
            return Ok(());
        }
        if self.has_pending_approval() {
            return Err(ClaimDenied::WrongStatus);
        }
        match self.status {
            TaskStatus::Pending => {
                if self.claimed_by.as_deref().is_some_and(|h| h != agent_id) {
                    return Err(ClaimDenied::AlreadyClaimed);
                }
                self.status = TaskStatus::InProgress;
                self.claimed_by = Some(agent_id.to_string());
                self.claimed_at = Some(now);
                self.started_at = Some(now);
                self.updated_at = now;
                Ok(())
            }
            TaskStatus::InProgress if self.claimed_by.is_some() => {
                Err(ClaimDenied::AlreadyClaimed)
            }
            _ => Err(ClaimDenied::WrongStatus),
        }
    }

    /// Mark the task completed with a result summary
    pub fn record_completion(
        &mut self,
        result_summary: &str,
        output_document_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(now);
        self.result_summary = Some(truncated(result_summary, SUMMARY_MAX));
        self.output_document_id = output_document_id;
        self.updated_at = now;
    }

    /// Record a failed attempt, deciding between retry and dead-letter
    ///
    /// The claim is released either way so a poisoned task cannot be
    /// monopolized by one agent.
    pub fn record_failure(
        &mut self,
        error_message: &str,
        terminal: bool,
        now: DateTime<Utc>,
    ) -> FailAction {
        let new_retry_count = self.retry_count + 1;
        if terminal || new_retry_count > self.max_retries {
            self.status = TaskStatus::Pending;
            self.dead_lettered = true;
            self.dead_lettered_at = Some(now);
            self.dead_letter_reason = Some(truncated(error_message, SUMMARY_MAX));
            self.retry_count = new_retry_count;
            self.claimed_by = None;
            self.updated_at = now;
            FailAction::DeadLetter
        } else {
            self.status = TaskStatus::Pending;
            self.claimed_by = None;
            self.claimed_at = None;
            self.retry_count = new_retry_count;
            self.failed_at = Some(now);
            self.last_error = Some(truncated(error_message, LAST_ERROR_MAX));
            self.updated_at = now;
            FailAction::Retry
        }
    }

    /// Clear the dead-letter flag and return the task to the queue
    ///
    /// The only path that removes `dead_lettered`. The retry count survives
    /// unless the operator explicitly asks for a reset.
    pub fn requeue(&mut self, reset_retry_count: bool, now: DateTime<Utc>) {
        self.dead_lettered = false;
        self.dead_lettered_at = None;
        self.dead_letter_reason = None;
        self.status = TaskStatus::Pending;
        self.claimed_by = None;
        if reset_retry_count {
            self.retry_count = 0;
        }
        self.updated_at = now;
    }

    /// Open an approval gate; `status` is untouched but the task is paused
    pub fn open_approval(&mut self, tier: ApprovalTier, now: DateTime<Utc>) {
        self.approval_tier = Some(tier);
        self.approval_status = Some(ApprovalStatus::Pending);
        self.approval_requested_at = Some(now);
        self.updated_at = now;
    }

    /// Apply an approval decision; the caller must have verified a pending
    /// approval exists
    ///
    /// A rejection archives the task permanently and records the reason.
    /// An approval changes nothing else: the claim holder resumes by polling.
    pub fn resolve_approval(
        &mut self,
        decision: ApprovalDecision,
        responded_by: &str,
        rejection_reason: Option<&str>,
        now: DateTime<Utc>,
    ) {
        self.approval_status = Some(decision.into());
        self.approval_responded_at = Some(now);
        if decision == ApprovalDecision::Rejected {
            self.status = TaskStatus::Archived;
            self.dead_letter_reason = Some(truncated(
                &format!(
                    "Rejected by {}: {}",
                    responded_by,
                    rejection_reason.unwrap_or("no reason given")
                ),
                SUMMARY_MAX,
            ));
        }
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_task() -> Task {
        Task::new("Index the archive", vec!["scout".to_string()], "planner")
    }

    #[test]
    fn test_task_status_as_str() {
        assert_eq!(TaskStatus::Pending.as_str(), "pending");
        assert_eq!(TaskStatus::InProgress.as_str(), "in_progress");
        assert_eq!(TaskStatus::Review.as_str(), "review");
        assert_eq!(TaskStatus::Completed.as_str(), "completed");
        assert_eq!(TaskStatus::Archived.as_str(), "archived");
    }

    #[test]
    fn test_task_status_from_str() {
        assert_eq!("pending".parse::<TaskStatus>().unwrap(), TaskStatus::Pending);
        assert_eq!(
            "in_progress".parse::<TaskStatus>().unwrap(),
            TaskStatus::InProgress
        );
        assert!("unknown".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_priority_weights() {
        assert_eq!(TaskPriority::Urgent.weight(), 0);
        assert_eq!(TaskPriority::High.weight(), 1);
        assert_eq!(TaskPriority::Medium.weight(), 2);
        assert_eq!(TaskPriority::Low.weight(), 3);
        assert!(TaskPriority::Low.weight() < ABSENT_PRIORITY_WEIGHT);
    }

    #[test]
    fn test_truncated() {
        assert_eq!(truncated("short", 10), "short");
        assert_eq!(truncated("exact", 5), "exact");
        assert_eq!(truncated("overlong", 4), "over");
        // multi-byte characters count as one
        assert_eq!(truncated("héllo", 3), "hél");
    }

    #[test]
    fn test_task_new_defaults() {
        let task = make_task();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, None);
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.max_retries, DEFAULT_MAX_RETRIES);
        assert!(!task.dead_lettered);
        assert!(task.claimed_by.is_none());
    }

    #[test]
    fn test_task_builders() {
        let parent = Uuid::new_v4();
        let task = make_task()
            .with_description("everything under /archive")
            .with_priority(TaskPriority::High)
            .with_parent(parent)
            .with_max_retries(1);
        assert_eq!(task.description.as_deref(), Some("everything under /archive"));
        assert_eq!(task.priority, Some(TaskPriority::High));
        assert_eq!(task.parent_task_id, Some(parent));
        assert_eq!(task.max_retries, 1);
    }

    #[test]
    fn test_claim_pending_task() {
        let mut task = make_task();
        let now = Utc::now();
        task.begin_claim("scout", now).unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.claimed_by.as_deref(), Some("scout"));
        assert_eq!(task.claimed_at, Some(now));
        assert_eq!(task.started_at, Some(now));
    }

    #[test]
    fn test_claim_preserves_retry_count() {
        let mut task = make_task();
        task.record_failure("boom", false, Utc::now());
        assert_eq!(task.retry_count, 1);
        task.begin_claim("scout", Utc::now()).unwrap();
        assert_eq!(task.retry_count, 1);
    }

    #[test]
    fn test_reclaim_by_holder_is_idempotent() {
        let mut task = make_task();
        let first = Utc::now();
        task.begin_claim("scout", first).unwrap();
        let second = Utc::now();
        task.begin_claim("scout", second).unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.claimed_by.as_deref(), Some("scout"));
        assert_eq!(task.started_at, Some(first));
        assert_eq!(task.claimed_at, Some(second));
    }

    #[test]
    fn test_claim_held_by_other_agent() {
        let mut task = make_task();
        task.begin_claim("scout", Utc::now()).unwrap();
        let result = task.begin_claim("ranger", Utc::now());
        assert_eq!(result, Err(ClaimDenied::AlreadyClaimed));
        assert_eq!(task.claimed_by.as_deref(), Some("scout"));
    }

    #[test]
    fn test_claim_completed_task() {
        let mut task = make_task();
        task.begin_claim("scout", Utc::now()).unwrap();
        task.record_completion("done", None, Utc::now());
        let result = task.begin_claim("ranger", Utc::now());
        assert_eq!(result, Err(ClaimDenied::WrongStatus));
    }

    #[test]
    fn test_claim_during_pending_approval() {
        let mut task = make_task();
        task.begin_claim("scout", Utc::now()).unwrap();
        task.open_approval(ApprovalTier::Gate, Utc::now());
        // not even the holder can re-claim while paused
        assert_eq!(
            task.begin_claim("scout", Utc::now()),
            Err(ClaimDenied::WrongStatus)
        );
        assert_eq!(
            task.begin_claim("ranger", Utc::now()),
            Err(ClaimDenied::WrongStatus)
        );
    }

    #[test]
    fn test_completion_truncates_summary() {
        let mut task = make_task();
        let long = "x".repeat(SUMMARY_MAX + 100);
        task.record_completion(&long, None, Utc::now());
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result_summary.as_ref().unwrap().len(), SUMMARY_MAX);
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn test_failure_retry_branch() {
        let mut task = make_task();
        task.begin_claim("scout", Utc::now()).unwrap();
        let action = task.record_failure("transient error", false, Utc::now());
        assert_eq!(action, FailAction::Retry);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 1);
        assert!(task.claimed_by.is_none());
        assert!(task.claimed_at.is_none());
        assert_eq!(task.last_error.as_deref(), Some("transient error"));
        assert!(task.failed_at.is_some());
        assert!(!task.dead_lettered);
    }

    #[test]
    fn test_failure_dead_letter_on_exhaustion() {
        let mut task = make_task().with_max_retries(1);
        task.record_failure("first", false, Utc::now());
        let action = task.record_failure("second", false, Utc::now());
        assert_eq!(action, FailAction::DeadLetter);
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.dead_lettered);
        assert_eq!(task.retry_count, 2);
        assert!(task.claimed_by.is_none());
        assert_eq!(task.dead_letter_reason.as_deref(), Some("second"));
        assert!(task.dead_lettered_at.is_some());
    }

    #[test]
    fn test_failure_dead_letter_on_terminal() {
        let mut task = make_task();
        let action = task.record_failure("config missing", true, Utc::now());
        assert_eq!(action, FailAction::DeadLetter);
        assert!(task.dead_lettered);
        assert_eq!(task.retry_count, 1);
    }

    #[test]
    fn test_failure_truncates_error() {
        let mut task = make_task();
        let long = "e".repeat(LAST_ERROR_MAX + 50);
        task.record_failure(&long, false, Utc::now());
        assert_eq!(task.last_error.as_ref().unwrap().len(), LAST_ERROR_MAX);

        let mut task = make_task();
        task.record_failure(&long, true, Utc::now());
        assert_eq!(task.dead_letter_reason.as_ref().unwrap().len(), SUMMARY_MAX);
    }

    #[test]
    fn test_retry_count_never_resets_on_failures() {
        let mut task = make_task().with_max_retries(10);
        for expected in 1..=5 {
            task.begin_claim("scout", Utc::now()).unwrap();
            task.record_failure("boom", false, Utc::now());
            assert_eq!(task.retry_count, expected);
        }
    }

    #[test]
    fn test_requeue_preserves_retry_count() {
        let mut task = make_task();
        task.record_failure("fatal", true, Utc::now());
        assert!(task.dead_lettered);
        task.requeue(false, Utc::now());
        assert!(!task.dead_lettered);
        assert!(task.dead_lettered_at.is_none());
        assert!(task.dead_letter_reason.is_none());
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 1);
    }

    #[test]
    fn test_requeue_with_reset() {
        let mut task = make_task();
        task.record_failure("fatal", true, Utc::now());
        task.requeue(true, Utc::now());
        assert_eq!(task.retry_count, 0);
        assert!(!task.dead_lettered);
    }

    #[test]
    fn test_open_approval_keeps_status() {
        let mut task = make_task();
        task.begin_claim("scout", Utc::now()).unwrap();
        task.open_approval(ApprovalTier::Notify, Utc::now());
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.approval_tier, Some(ApprovalTier::Notify));
        assert!(task.has_pending_approval());
        assert!(task.approval_requested_at.is_some());
    }

    #[test]
    fn test_resolve_approval_approved() {
        let mut task = make_task();
        task.begin_claim("scout", Utc::now()).unwrap();
        task.open_approval(ApprovalTier::Gate, Utc::now());
        task.resolve_approval(ApprovalDecision::Approved, "operator", None, Utc::now());
        assert_eq!(task.approval_status, Some(ApprovalStatus::Approved));
        // no status change: resuming is the agent's polling concern
        assert_eq!(task.status, TaskStatus::InProgress);
        assert!(task.approval_responded_at.is_some());
    }

    #[test]
    fn test_resolve_approval_rejected_archives() {
        let mut task = make_task();
        task.begin_claim("scout", Utc::now()).unwrap();
        task.open_approval(ApprovalTier::Gate, Utc::now());
        task.resolve_approval(
            ApprovalDecision::Rejected,
            "operator",
            Some("out of scope"),
            Utc::now(),
        );
        assert_eq!(task.approval_status, Some(ApprovalStatus::Rejected));
        assert_eq!(task.status, TaskStatus::Archived);
        assert_eq!(
            task.dead_letter_reason.as_deref(),
            Some("Rejected by operator: out of scope")
        );
    }

    #[test]
    fn test_resolve_approval_rejected_without_reason() {
        let mut task = make_task();
        task.open_approval(ApprovalTier::Gate, Utc::now());
        task.resolve_approval(ApprovalDecision::Rejected, "operator", None, Utc::now());
        assert_eq!(
            task.dead_letter_reason.as_deref(),
            Some("Rejected by operator: no reason given")
        );
    }

    #[test]
    fn test_claim_denied_as_str() {
        assert_eq!(ClaimDenied::NotFound.as_str(), "not_found");
        assert_eq!(ClaimDenied::WrongStatus.as_str(), "wrong_status");
        assert_eq!(ClaimDenied::AlreadyClaimed.as_str(), "already_claimed");
    }

    #[test]
    fn test_fail_action_serialization() {
        assert_eq!(serde_json::to_string(&FailAction::Retry).unwrap(), "\"retry\"");
        assert_eq!(
            serde_json::to_string(&FailAction::DeadLetter).unwrap(),
            "\"dead_letter\""
        );
    }

    #[test]
    fn test_task_serialization_skips_empty_fields() {
        let task = make_task();
        let json = serde_json::to_string(&task).unwrap();
        assert!(json.contains("\"pending\""));
        assert!(!json.contains("claimed_by"));
        assert!(!json.contains("approval_status"));
    }
}
