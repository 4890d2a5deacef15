//! Database store for tasks and their side-channel records
//!
//! The task table is the single source of truth for the lifecycle state
//! machine; the coordinator runs every transition as one transaction here.
//! Messages, notifications, activities, and audit records are append-only
//! inserts made inside the same transaction as the state change, so the
//! `conn`-taking helpers accept whatever connection the caller is holding.

use chrono::Utc;
use sqlx::sqlite::SqliteConnection;
use sqlx::{Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::coordination::Task;
use crate::error::{AppError, Result};
use crate::models::{
    Activity, ActivityKind, Agent, AgentStatus, AuditRecord, Message, Notification,
    NotificationKind,
};

/// Database store
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Begin a transaction for a lifecycle operation
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    // Task operations

    pub async fn insert_task(conn: &mut SqliteConnection, task: &Task) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, title, description, status, priority, assignees, creator_id,
                parent_task_id, claimed_by, claimed_at, started_at, completed_at,
                failed_at, retry_count, max_retries, last_error, dead_lettered,
                dead_lettered_at, dead_letter_reason, approval_tier, approval_status,
                approval_requested_at, approval_responded_at, approval_notification_id,
                result_summary, output_document_id, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task.id.to_string())
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.status.as_str())
        .bind(task.priority.map(|p| p.as_str()))
        .bind(serde_json::to_string(&task.assignees).unwrap_or_else(|_| "[]".into()))
        .bind(&task.creator_id)
        .bind(task.parent_task_id.map(|u| u.to_string()))
        .bind(&task.claimed_by)
        .bind(task.claimed_at)
        .bind(task.started_at)
        .bind(task.completed_at)
        .bind(task.failed_at)
        .bind(task.retry_count as i64)
        .bind(task.max_retries as i64)
        .bind(&task.last_error)
        .bind(task.dead_lettered)
        .bind(task.dead_lettered_at)
        .bind(&task.dead_letter_reason)
        .bind(task.approval_tier.map(|t| t.as_str()))
        .bind(task.approval_status.map(|s| s.as_str()))
        .bind(task.approval_requested_at)
        .bind(task.approval_responded_at)
        .bind(task.approval_notification_id.map(|u| u.to_string()))
        .bind(&task.result_summary)
        .bind(task.output_document_id.map(|u| u.to_string()))
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Load a task inside the caller's transaction
    pub async fn load_task(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(conn)
            .await?;

        row.map(|r| r.try_into()).transpose()
    }

    /// Write back every mutable field of a task
    pub async fn save_task(conn: &mut SqliteConnection, task: &Task) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE tasks SET
                title = ?, description = ?, status = ?, priority = ?, assignees = ?,
                claimed_by = ?, claimed_at = ?, started_at = ?, completed_at = ?,
                failed_at = ?, retry_count = ?, max_retries = ?, last_error = ?,
                dead_lettered = ?, dead_lettered_at = ?, dead_letter_reason = ?,
                approval_tier = ?, approval_status = ?, approval_requested_at = ?,
                approval_responded_at = ?, approval_notification_id = ?,
                result_summary = ?, output_document_id = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.status.as_str())
        .bind(task.priority.map(|p| p.as_str()))
        .bind(serde_json::to_string(&task.assignees).unwrap_or_else(|_| "[]".into()))
        .bind(&task.claimed_by)
        .bind(task.claimed_at)
        .bind(task.started_at)
        .bind(task.completed_at)
        .bind(task.failed_at)
        .bind(task.retry_count as i64)
        .bind(task.max_retries as i64)
        .bind(&task.last_error)
        .bind(task.dead_lettered)
        .bind(task.dead_lettered_at)
        .bind(&task.dead_letter_reason)
        .bind(task.approval_tier.map(|t| t.as_str()))
        .bind(task.approval_status.map(|s| s.as_str()))
        .bind(task.approval_requested_at)
        .bind(task.approval_responded_at)
        .bind(task.approval_notification_id.map(|u| u.to_string()))
        .bind(&task.result_summary)
        .bind(task.output_document_id.map(|u| u.to_string()))
        .bind(task.updated_at)
        .bind(task.id.to_string())
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn get_task(&self, id: Uuid) -> Result<Task> {
        let row = sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Task {} not found", id)))?;

        row.try_into()
    }

    pub async fn tasks_with_status(&self, status: &str) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            "SELECT * FROM tasks WHERE status = ? ORDER BY created_at ASC",
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    pub async fn all_tasks(&self) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    /// Dead-lettered tasks, most recently parked first
    pub async fn dead_lettered_tasks(&self) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            "SELECT * FROM tasks WHERE dead_lettered = 1 ORDER BY dead_lettered_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    // Side-channel inserts, run inside the caller's transaction

    pub async fn insert_message(
        conn: &mut SqliteConnection,
        task_id: Uuid,
        author_id: &str,
        content: &str,
        mentions: &[String],
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO messages (id, task_id, author_id, content, mentions, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(task_id.to_string())
        .bind(author_id)
        .bind(content)
        .bind(serde_json::to_string(mentions).unwrap_or_else(|_| "[]".into()))
        .bind(Utc::now())
        .execute(conn)
        .await?;

        Ok(id)
    }

    pub async fn insert_notification(
        conn: &mut SqliteConnection,
        agent_id: &str,
        kind: NotificationKind,
        content: &str,
        related_task_id: Option<Uuid>,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO notifications (id, agent_id, kind, content, related_task_id, delivered, created_at)
            VALUES (?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(agent_id)
        .bind(kind.as_str())
        .bind(content)
        .bind(related_task_id.map(|u| u.to_string()))
        .bind(Utc::now())
        .execute(conn)
        .await?;

        Ok(id)
    }

    pub async fn insert_activity(
        conn: &mut SqliteConnection,
        agent_id: &str,
        kind: ActivityKind,
        message: &str,
        related_task_id: Option<Uuid>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO activities (id, agent_id, kind, message, related_task_id, timestamp)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(agent_id)
        .bind(kind.as_str())
        .bind(message)
        .bind(related_task_id.map(|u| u.to_string()))
        .bind(Utc::now())
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn insert_audit(
        conn: &mut SqliteConnection,
        event_type: &str,
        actor_id: &str,
        target_type: &str,
        target_id: Option<&str>,
        details: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (id, event_type, actor_id, target_type, target_id, details, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(event_type)
        .bind(actor_id)
        .bind(target_type)
        .bind(target_id)
        .bind(details)
        .bind(Utc::now())
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn set_notification_delivered(
        conn: &mut SqliteConnection,
        id: Uuid,
    ) -> Result<()> {
        sqlx::query("UPDATE notifications SET delivered = 1 WHERE id = ?")
            .bind(id.to_string())
            .execute(conn)
            .await?;

        Ok(())
    }

    // Collaborator queries

    pub async fn messages_for_task(&self, task_id: Uuid) -> Result<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT * FROM messages WHERE task_id = ? ORDER BY created_at ASC",
        )
        .bind(task_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    pub async fn notifications(
        &self,
        agent_id: Option<&str>,
        undelivered_only: bool,
    ) -> Result<Vec<Notification>> {
        let rows = match (agent_id, undelivered_only) {
            (Some(agent), true) => {
                sqlx::query_as::<_, NotificationRow>(
                    "SELECT * FROM notifications WHERE agent_id = ? AND delivered = 0 ORDER BY created_at DESC",
                )
                .bind(agent)
                .fetch_all(&self.pool)
                .await?
            }
            (Some(agent), false) => {
                sqlx::query_as::<_, NotificationRow>(
                    "SELECT * FROM notifications WHERE agent_id = ? ORDER BY created_at DESC",
                )
                .bind(agent)
                .fetch_all(&self.pool)
                .await?
            }
            (None, true) => {
                sqlx::query_as::<_, NotificationRow>(
                    "SELECT * FROM notifications WHERE delivered = 0 ORDER BY created_at DESC",
                )
                .fetch_all(&self.pool)
                .await?
            }
            (None, false) => {
                sqlx::query_as::<_, NotificationRow>(
                    "SELECT * FROM notifications ORDER BY created_at DESC",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    pub async fn mark_notification_delivered(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("UPDATE notifications SET delivered = 1 WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Notification {} not found", id)));
        }

        Ok(())
    }

    pub async fn recent_activities(&self, limit: i64) -> Result<Vec<Activity>> {
        let rows = sqlx::query_as::<_, ActivityRow>(
            "SELECT * FROM activities ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    pub async fn recent_audit(&self, limit: i64) -> Result<Vec<AuditRecord>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            "SELECT * FROM audit_log ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    // Agent registry

    pub async fn upsert_agent(
        &self,
        name: &str,
        role: &str,
        capabilities: &[String],
        workspace: Option<&str>,
    ) -> Result<Agent> {
        let now = Utc::now();
        let existing = sqlx::query_as::<_, AgentRow>("SELECT * FROM agents WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        let capabilities_json =
            serde_json::to_string(capabilities).unwrap_or_else(|_| "[]".into());

        if let Some(row) = existing {
            sqlx::query(
                "UPDATE agents SET role = ?, capabilities = ?, workspace = ?, updated_at = ? WHERE name = ?",
            )
            .bind(role)
            .bind(&capabilities_json)
            .bind(workspace)
            .bind(now)
            .bind(name)
            .execute(&self.pool)
            .await?;

            let mut agent: Agent = row.try_into()?;
            agent.role = role.to_string();
            agent.capabilities = capabilities.to_vec();
            agent.workspace = workspace.map(|w| w.to_string());
            agent.updated_at = now;
            return Ok(agent);
        }

        let agent = Agent {
            id: Uuid::new_v4(),
            name: name.to_string(),
            role: role.to_string(),
            capabilities: capabilities.to_vec(),
            workspace: workspace.map(|w| w.to_string()),
            status: AgentStatus::Active,
            heartbeat_at: None,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO agents (id, name, role, capabilities, workspace, status, heartbeat_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(agent.id.to_string())
        .bind(&agent.name)
        .bind(&agent.role)
        .bind(&capabilities_json)
        .bind(&agent.workspace)
        .bind(agent.status.as_str())
        .bind(agent.heartbeat_at)
        .bind(agent.created_at)
        .bind(agent.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(agent)
    }

    /// Stamp an agent heartbeat and record it in the activity feed
    ///
    /// An unknown agent still leaves an activity line, matching the feed's
    /// append-only contract.
    pub async fn heartbeat(&self, name: &str, status: Option<AgentStatus>) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE agents SET heartbeat_at = ?, status = ?, updated_at = ? WHERE name = ?")
            .bind(now)
            .bind(status.unwrap_or(AgentStatus::Active).as_str())
            .bind(now)
            .bind(name)
            .execute(&mut *tx)
            .await?;

        Self::insert_activity(
            &mut tx,
            name,
            ActivityKind::Heartbeat,
            &format!("{} heartbeat", name),
            None,
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn list_agents(&self) -> Result<Vec<Agent>> {
        let rows = sqlx::query_as::<_, AgentRow>("SELECT * FROM agents ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }
}

// Internal row types for sqlx

fn parse_uuid(s: &str, field: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| AppError::Internal(format!("Invalid {} UUID: {}", field, e)))
}

fn parse_opt_uuid(s: Option<String>, field: &str) -> Result<Option<Uuid>> {
    s.map(|s| parse_uuid(&s, field)).transpose()
}

fn parse_string_list(s: &str, field: &str) -> Result<Vec<String>> {
    serde_json::from_str(s).map_err(|e| AppError::Internal(format!("Invalid {}: {}", field, e)))
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    title: String,
    description: Option<String>,
    status: String,
    priority: Option<String>,
    assignees: String,
    creator_id: String,
    parent_task_id: Option<String>,
    claimed_by: Option<String>,
    claimed_at: Option<chrono::DateTime<Utc>>,
    started_at: Option<chrono::DateTime<Utc>>,
    completed_at: Option<chrono::DateTime<Utc>>,
    failed_at: Option<chrono::DateTime<Utc>>,
    retry_count: i64,
    max_retries: i64,
    last_error: Option<String>,
    dead_lettered: bool,
    dead_lettered_at: Option<chrono::DateTime<Utc>>,
    dead_letter_reason: Option<String>,
    approval_tier: Option<String>,
    approval_status: Option<String>,
    approval_requested_at: Option<chrono::DateTime<Utc>>,
    approval_responded_at: Option<chrono::DateTime<Utc>>,
    approval_notification_id: Option<String>,
    result_summary: Option<String>,
    output_document_id: Option<String>,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
}

impl TryFrom<TaskRow> for Task {
    type Error = AppError;

    fn try_from(row: TaskRow) -> Result<Self> {
        Ok(Task {
            id: parse_uuid(&row.id, "task id")?,
            title: row.title,
            description: row.description,
            status: row
                .status
                .parse()
                .map_err(|e| AppError::Internal(format!("Invalid status: {}", e)))?,
            priority: row
                .priority
                .map(|p| p.parse())
                .transpose()
                .map_err(|e| AppError::Internal(format!("Invalid priority: {}", e)))?,
            assignees: parse_string_list(&row.assignees, "assignees")?,
            creator_id: row.creator_id,
            parent_task_id: parse_opt_uuid(row.parent_task_id, "parent_task_id")?,
            claimed_by: row.claimed_by,
            claimed_at: row.claimed_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            failed_at: row.failed_at,
            retry_count: row.retry_count as u32,
            max_retries: row.max_retries as u32,
            last_error: row.last_error,
            dead_lettered: row.dead_lettered,
            dead_lettered_at: row.dead_lettered_at,
            dead_letter_reason: row.dead_letter_reason,
            approval_tier: row
                .approval_tier
                .map(|t| t.parse())
                .transpose()
                .map_err(|e| AppError::Internal(format!("Invalid approval tier: {}", e)))?,
            approval_status: row
                .approval_status
                .map(|s| s.parse())
                .transpose()
                .map_err(|e| AppError::Internal(format!("Invalid approval status: {}", e)))?,
            approval_requested_at: row.approval_requested_at,
            approval_responded_at: row.approval_responded_at,
            approval_notification_id: parse_opt_uuid(
                row.approval_notification_id,
                "approval_notification_id",
            )?,
            result_summary: row.result_summary,
            output_document_id: parse_opt_uuid(row.output_document_id, "output_document_id")?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    task_id: String,
    author_id: String,
    content: String,
    mentions: String,
    created_at: chrono::DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = AppError;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Message {
            id: parse_uuid(&row.id, "message id")?,
            task_id: parse_uuid(&row.task_id, "task_id")?,
            author_id: row.author_id,
            content: row.content,
            mentions: parse_string_list(&row.mentions, "mentions")?,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct NotificationRow {
    id: String,
    agent_id: String,
    kind: String,
    content: String,
    related_task_id: Option<String>,
    delivered: bool,
    created_at: chrono::DateTime<Utc>,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = AppError;

    fn try_from(row: NotificationRow) -> Result<Self> {
        Ok(Notification {
            id: parse_uuid(&row.id, "notification id")?,
            agent_id: row.agent_id,
            kind: row
                .kind
                .parse()
                .map_err(|e| AppError::Internal(format!("Invalid notification kind: {}", e)))?,
            content: row.content,
            related_task_id: parse_opt_uuid(row.related_task_id, "related_task_id")?,
            delivered: row.delivered,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ActivityRow {
    id: String,
    agent_id: String,
    kind: String,
    message: String,
    related_task_id: Option<String>,
    timestamp: chrono::DateTime<Utc>,
}

impl TryFrom<ActivityRow> for Activity {
    type Error = AppError;

    fn try_from(row: ActivityRow) -> Result<Self> {
        Ok(Activity {
            id: parse_uuid(&row.id, "activity id")?,
            agent_id: row.agent_id,
            kind: row
                .kind
                .parse()
                .map_err(|e| AppError::Internal(format!("Invalid activity kind: {}", e)))?,
            message: row.message,
            related_task_id: parse_opt_uuid(row.related_task_id, "related_task_id")?,
            timestamp: row.timestamp,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    id: String,
    event_type: String,
    actor_id: String,
    target_type: String,
    target_id: Option<String>,
    details: Option<String>,
    timestamp: chrono::DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditRecord {
    type Error = AppError;

    fn try_from(row: AuditRow) -> Result<Self> {
        Ok(AuditRecord {
            id: parse_uuid(&row.id, "audit id")?,
            event_type: row.event_type,
            actor_id: row.actor_id,
            target_type: row.target_type,
            target_id: row.target_id,
            details: row.details,
            timestamp: row.timestamp,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AgentRow {
    id: String,
    name: String,
    role: String,
    capabilities: String,
    workspace: Option<String>,
    status: String,
    heartbeat_at: Option<chrono::DateTime<Utc>>,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
}

impl TryFrom<AgentRow> for Agent {
    type Error = AppError;

    fn try_from(row: AgentRow) -> Result<Self> {
        Ok(Agent {
            id: parse_uuid(&row.id, "agent id")?,
            name: row.name,
            role: row.role,
            capabilities: parse_string_list(&row.capabilities, "capabilities")?,
            workspace: row.workspace,
            status: row
                .status
                .parse()
                .map_err(|e| AppError::Internal(format!("Invalid agent status: {}", e)))?,
            heartbeat_at: row.heartbeat_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
