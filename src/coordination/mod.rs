//! Task lifecycle coordination
//!
//! The state machine at the center of Foreman: tasks are claimed by exactly
//! one agent, retried on failure up to a budget, dead-lettered past it, and
//! optionally paused behind a human-approval gate.

pub mod coordinator;
pub mod queue;
pub mod task;

pub use coordinator::{CoordinationEvent, CoordinatorConfig, TaskCoordinator};
pub use task::{
    ApprovalDecision, ApprovalStatus, ApprovalTier, ClaimDenied, ClaimOutcome, FailAction, Task,
    TaskPriority, TaskStatus,
};
