//! Data models for the side-channel records and API request types
//!
//! Messages, notifications, activities, and audit records are append-only
//! artifacts of task transitions; the agent registry tracks who is around to
//! do the work. None of these participate in claim arbitration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::coordination::{ApprovalDecision, ApprovalTier, TaskPriority};

/// A message in a task's thread
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub task_id: Uuid,
    pub author_id: String,
    pub content: String,
    pub mentions: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Kind of notification delivered to an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Mention,
    TaskAssigned,
    TaskCompleted,
    ApprovalRequest,
    System,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Mention => "mention",
            NotificationKind::TaskAssigned => "task_assigned",
            NotificationKind::TaskCompleted => "task_completed",
            NotificationKind::ApprovalRequest => "approval_request",
            NotificationKind::System => "system",
        }
    }
}

impl std::str::FromStr for NotificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mention" => Ok(NotificationKind::Mention),
            "task_assigned" => Ok(NotificationKind::TaskAssigned),
            "task_completed" => Ok(NotificationKind::TaskCompleted),
            "approval_request" => Ok(NotificationKind::ApprovalRequest),
            "system" => Ok(NotificationKind::System),
            _ => Err(format!("Invalid notification kind: {}", s)),
        }
    }
}

/// A notification queued for an agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub agent_id: String,
    pub kind: NotificationKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_task_id: Option<Uuid>,
    pub delivered: bool,
    pub created_at: DateTime<Utc>,
}

/// Kind of activity feed entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Heartbeat,
    TaskStarted,
    TaskCompleted,
    MessageSent,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Heartbeat => "heartbeat",
            ActivityKind::TaskStarted => "task_started",
            ActivityKind::TaskCompleted => "task_completed",
            ActivityKind::MessageSent => "message_sent",
        }
    }
}

impl std::str::FromStr for ActivityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "heartbeat" => Ok(ActivityKind::Heartbeat),
            "task_started" => Ok(ActivityKind::TaskStarted),
            "task_completed" => Ok(ActivityKind::TaskCompleted),
            "message_sent" => Ok(ActivityKind::MessageSent),
            _ => Err(format!("Invalid activity kind: {}", s)),
        }
    }
}

/// An entry in the activity feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: Uuid,
    pub agent_id: String,
    pub kind: ActivityKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_task_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
}

/// An immutable audit log record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub event_type: String,
    pub actor_id: String,
    pub target_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Availability status of a registered agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Idle,
    Busy,
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Idle => "idle",
            AgentStatus::Busy => "busy",
            AgentStatus::Offline => "offline",
        }
    }
}

impl std::str::FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AgentStatus::Active),
            "idle" => Ok(AgentStatus::Idle),
            "busy" => Ok(AgentStatus::Busy),
            "offline" => Ok(AgentStatus::Offline),
            _ => Err(format!("Invalid agent status: {}", s)),
        }
    }
}

/// A registered agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub name: String,
    pub role: String,
    pub capabilities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    pub status: AgentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// API request types

/// Request to create a new task
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: Option<String>,
    pub assignees: Vec<String>,
    pub priority: Option<TaskPriority>,
    pub creator_id: String,
    pub parent_task_id: Option<Uuid>,
    pub max_retries: Option<u32>,
}

/// Request to claim a task
#[derive(Debug, Deserialize)]
pub struct ClaimTaskRequest {
    pub agent_id: String,
}

/// Request to complete a task
#[derive(Debug, Deserialize)]
pub struct CompleteTaskRequest {
    pub agent_id: String,
    pub result_summary: String,
    pub output_document_id: Option<Uuid>,
}

/// Request to report a task failure
#[derive(Debug, Deserialize)]
pub struct FailTaskRequest {
    pub agent_id: String,
    pub error_message: String,
    #[serde(default)]
    pub terminal: bool,
}

/// Request to requeue a dead-lettered task
#[derive(Debug, Deserialize)]
pub struct RequeueTaskRequest {
    #[serde(default)]
    pub reset_retry_count: bool,
}

/// Request to record task progress
#[derive(Debug, Deserialize)]
pub struct TaskProgressRequest {
    pub agent_id: String,
    pub progress_note: String,
    pub percent_complete: Option<u8>,
}

/// Request to open an approval gate on a task
#[derive(Debug, Deserialize)]
pub struct RequestApprovalRequest {
    pub agent_id: String,
    pub action_description: String,
    pub tier: ApprovalTier,
    pub timeout_minutes: Option<u32>,
}

/// Request to resolve a pending approval
#[derive(Debug, Deserialize)]
pub struct ApprovalResponseRequest {
    pub decision: ApprovalDecision,
    pub responded_by: String,
    pub rejection_reason: Option<String>,
}

/// Request to post a message to a task thread
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub author_id: String,
    pub content: String,
    #[serde(default)]
    pub mentions: Vec<String>,
}

/// Request to register or update an agent
#[derive(Debug, Deserialize)]
pub struct UpsertAgentRequest {
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub workspace: Option<String>,
}

/// Request to record an agent heartbeat
#[derive(Debug, Deserialize, Default)]
pub struct HeartbeatRequest {
    pub status: Option<AgentStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_kind_as_str() {
        assert_eq!(NotificationKind::Mention.as_str(), "mention");
        assert_eq!(NotificationKind::TaskAssigned.as_str(), "task_assigned");
        assert_eq!(NotificationKind::TaskCompleted.as_str(), "task_completed");
        assert_eq!(NotificationKind::ApprovalRequest.as_str(), "approval_request");
        assert_eq!(NotificationKind::System.as_str(), "system");
    }

    #[test]
    fn test_notification_kind_from_str() {
        assert_eq!(
            "approval_request".parse::<NotificationKind>().unwrap(),
            NotificationKind::ApprovalRequest
        );
        assert!("bogus".parse::<NotificationKind>().is_err());
    }

    #[test]
    fn test_activity_kind_round_trip() {
        for kind in [
            ActivityKind::Heartbeat,
            ActivityKind::TaskStarted,
            ActivityKind::TaskCompleted,
            ActivityKind::MessageSent,
        ] {
            assert_eq!(kind.as_str().parse::<ActivityKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_agent_status_from_str() {
        assert_eq!("active".parse::<AgentStatus>().unwrap(), AgentStatus::Active);
        assert_eq!("offline".parse::<AgentStatus>().unwrap(), AgentStatus::Offline);
        assert!("asleep".parse::<AgentStatus>().is_err());
    }

    #[test]
    fn test_notification_serialization() {
        let notification = Notification {
            id: Uuid::new_v4(),
            agent_id: "scout".to_string(),
            kind: NotificationKind::System,
            content: "DEAD LETTER: something".to_string(),
            related_task_id: None,
            delivered: false,
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&notification).unwrap();
        assert!(json.contains("\"system\""));
        assert!(!json.contains("related_task_id"));
    }
}
