//! Claim-eligibility view over the task store
//!
//! Decides which pending tasks an agent may claim and in what order. Pure
//! functions; the coordinator applies them to the store's pending set.

use std::cmp::Ordering;

use super::task::{Task, TaskPriority, TaskStatus, ABSENT_PRIORITY_WEIGHT};

/// Sort weight for an optional priority
pub fn priority_weight(priority: Option<TaskPriority>) -> u8 {
    priority.map(|p| p.weight()).unwrap_or(ABSENT_PRIORITY_WEIGHT)
}

/// Whether `agent_id` may claim `task` right now
///
/// Dead-lettered tasks stay visible in the pending set but are never
/// automatically claimable; a pending approval pauses the task regardless of
/// its status.
pub fn eligible(task: &Task, agent_id: &str) -> bool {
    task.status == TaskStatus::Pending
        && task.assignees.iter().any(|a| a == agent_id)
        && !task.dead_lettered
        && !task.has_pending_approval()
}

/// Claim ordering: priority weight ascending, then oldest first
pub fn claim_order(a: &Task, b: &Task) -> Ordering {
    priority_weight(a.priority)
        .cmp(&priority_weight(b.priority))
        .then(a.created_at.cmp(&b.created_at))
}
