//! HTTP client for the Foreman server

use anyhow::{bail, Result};
use serde_json::{json, Value};
use uuid::Uuid;

/// Thin client over the Foreman REST API
pub struct ForemanClient {
    base_url: String,
    http: reqwest::Client,
}

impl ForemanClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn parse(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            bail!("Server returned {}: {}", status, text);
        }
        Ok(serde_json::from_str(&text)?)
    }

    pub async fn create_task(
        &self,
        title: &str,
        description: Option<&str>,
        assignees: &[String],
        priority: Option<&str>,
        creator_id: &str,
    ) -> Result<Value> {
        self.post(
            "/tasks",
            json!({
                "title": title,
                "description": description,
                "assignees": assignees,
                "priority": priority,
                "creator_id": creator_id,
            }),
        )
        .await
    }

    pub async fn task(&self, task_id: Uuid) -> Result<Value> {
        self.get(&format!("/tasks/{}", task_id)).await
    }

    pub async fn board(&self) -> Result<Value> {
        self.get("/tasks").await
    }

    pub async fn queue(&self, agent_id: &str) -> Result<Value> {
        self.get(&format!("/queues/{}", agent_id)).await
    }

    pub async fn dead_letters(&self) -> Result<Value> {
        self.get("/dead-letters").await
    }

    pub async fn requeue(&self, task_id: Uuid, reset_retry_count: bool) -> Result<Value> {
        self.post(
            &format!("/tasks/{}/requeue", task_id),
            json!({ "reset_retry_count": reset_retry_count }),
        )
        .await
    }

    pub async fn respond_to_approval(
        &self,
        task_id: Uuid,
        decision: &str,
        responded_by: &str,
        rejection_reason: Option<&str>,
    ) -> Result<Value> {
        self.post(
            &format!("/tasks/{}/approval/response", task_id),
            json!({
                "decision": decision,
                "responded_by": responded_by,
                "rejection_reason": rejection_reason,
            }),
        )
        .await
    }

    pub async fn agents(&self) -> Result<Value> {
        self.get("/agents").await
    }
}
