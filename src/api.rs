//! REST API over the coordinator and store

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::coordination::{ClaimOutcome, Task};
use crate::error::Result;
use crate::models::{
    Activity, Agent, ApprovalResponseRequest, AuditRecord, ClaimTaskRequest, CompleteTaskRequest,
    CreateTaskRequest, FailTaskRequest, HeartbeatRequest, Message, Notification,
    RequestApprovalRequest, RequeueTaskRequest, SendMessageRequest, TaskProgressRequest,
    UpsertAgentRequest,
};
use crate::{websocket, AppState};

/// Build the application router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tasks", post(create_task).get(task_board))
        .route("/tasks/:id", get(get_task))
        .route("/tasks/:id/claim", post(claim_task))
        .route("/tasks/:id/complete", post(complete_task))
        .route("/tasks/:id/fail", post(fail_task))
        .route("/tasks/:id/requeue", post(requeue_task))
        .route("/tasks/:id/progress", post(task_progress))
        .route("/tasks/:id/approval", post(request_approval))
        .route("/tasks/:id/approval/response", post(respond_to_approval))
        .route("/tasks/:id/messages", get(task_messages).post(send_message))
        .route("/queues/:agent_id", get(claimable_queue))
        .route("/dead-letters", get(dead_letters))
        .route("/notifications", get(notifications))
        .route("/notifications/:id/delivered", post(notification_delivered))
        .route("/activities", get(activities))
        .route("/audit", get(audit))
        .route("/agents", get(list_agents).post(upsert_agent))
        .route("/agents/:name/heartbeat", post(heartbeat))
        .route("/ws", get(websocket::handler))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<Json<Task>> {
    let task = state.coordinator.create_task(req).await?;
    Ok(Json(task))
}

/// All tasks grouped by status
async fn task_board(
    State(state): State<Arc<AppState>>,
) -> Result<Json<BTreeMap<String, Vec<Task>>>> {
    let tasks = state.store.all_tasks().await?;
    let mut board: BTreeMap<String, Vec<Task>> = BTreeMap::new();
    for task in tasks {
        board.entry(task.status.as_str().to_string()).or_default().push(task);
    }
    Ok(Json(board))
}

async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>> {
    Ok(Json(state.coordinator.task(id).await?))
}

async fn claim_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ClaimTaskRequest>,
) -> Result<Json<Value>> {
    let outcome = state.coordinator.claim(id, &req.agent_id).await?;
    let body = match outcome {
        ClaimOutcome::Claimed(task) => json!({ "success": true, "task": task }),
        ClaimOutcome::Denied(reason) => json!({ "success": false, "reason": reason }),
    };
    Ok(Json(body))
}

async fn complete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<CompleteTaskRequest>,
) -> Result<Json<Task>> {
    let task = state
        .coordinator
        .complete(id, &req.agent_id, &req.result_summary, req.output_document_id)
        .await?;
    Ok(Json(task))
}

async fn fail_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<FailTaskRequest>,
) -> Result<Json<Value>> {
    let action = state
        .coordinator
        .fail(id, &req.agent_id, &req.error_message, req.terminal)
        .await?;
    Ok(Json(json!({ "action": action })))
}

async fn requeue_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<RequeueTaskRequest>,
) -> Result<Json<Task>> {
    let task = state.coordinator.requeue(id, req.reset_retry_count).await?;
    Ok(Json(task))
}

async fn task_progress(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<TaskProgressRequest>,
) -> Result<Json<Value>> {
    state
        .coordinator
        .write_progress(id, &req.agent_id, &req.progress_note, req.percent_complete)
        .await?;
    Ok(Json(json!({ "ok": true })))
}

async fn request_approval(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<RequestApprovalRequest>,
) -> Result<Json<Value>> {
    let notification_id = state
        .coordinator
        .request_approval(
            id,
            &req.agent_id,
            &req.action_description,
            req.tier,
            req.timeout_minutes,
        )
        .await?;
    Ok(Json(json!({ "notification_id": notification_id })))
}

async fn respond_to_approval(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ApprovalResponseRequest>,
) -> Result<Json<Task>> {
    let task = state
        .coordinator
        .respond_to_approval(
            id,
            req.decision,
            &req.responded_by,
            req.rejection_reason.as_deref(),
        )
        .await?;
    Ok(Json(task))
}

async fn task_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Message>>> {
    Ok(Json(state.store.messages_for_task(id).await?))
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<Value>> {
    let message_id = state
        .coordinator
        .send_message(id, &req.author_id, &req.content, &req.mentions)
        .await?;
    Ok(Json(json!({ "message_id": message_id })))
}

async fn claimable_queue(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> Result<Json<Vec<Task>>> {
    Ok(Json(state.coordinator.list_claimable(&agent_id).await?))
}

async fn dead_letters(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Task>>> {
    Ok(Json(state.coordinator.list_dead_lettered().await?))
}

#[derive(Debug, Deserialize)]
struct NotificationsQuery {
    agent_id: Option<String>,
    #[serde(default)]
    undelivered: bool,
}

async fn notifications(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NotificationsQuery>,
) -> Result<Json<Vec<Notification>>> {
    let notifications = state
        .store
        .notifications(query.agent_id.as_deref(), query.undelivered)
        .await?;
    Ok(Json(notifications))
}

async fn notification_delivered(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>> {
    state.store.mark_notification_delivered(id).await?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<i64>,
}

async fn activities(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<Activity>>> {
    Ok(Json(state.store.recent_activities(query.limit.unwrap_or(50)).await?))
}

async fn audit(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<AuditRecord>>> {
    Ok(Json(state.store.recent_audit(query.limit.unwrap_or(50)).await?))
}

async fn list_agents(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Agent>>> {
    Ok(Json(state.store.list_agents().await?))
}

async fn upsert_agent(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpsertAgentRequest>,
) -> Result<Json<Agent>> {
    let agent = state
        .store
        .upsert_agent(&req.name, &req.role, &req.capabilities, req.workspace.as_deref())
        .await?;
    Ok(Json(agent))
}

async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<Value>> {
    state.store.heartbeat(&name, req.status).await?;
    Ok(Json(json!({ "ok": true })))
}
