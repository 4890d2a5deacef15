//! WebSocket event feed tests
//!
//! Runs the server on a real listener and watches coordination events arrive
//! over `/ws`.

use std::time::Duration;

use foreman::models::CreateTaskRequest;
use foreman::AppState;
use futures::StreamExt;
use sqlx::sqlite::SqlitePoolOptions;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

async fn setup_server() -> (std::net::SocketAddr, std::sync::Arc<AppState>) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let state = AppState::new(pool);
    let app = foreman::api::router(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

#[tokio::test]
async fn test_event_feed_reports_lifecycle() {
    let (addr, state) = setup_server().await;

    let (mut socket, _) = connect_async(format!("ws://{}/ws", addr))
        .await
        .expect("Failed to connect");

    // let the handler subscribe before emitting
    tokio::time::sleep(Duration::from_millis(100)).await;

    let task = state
        .coordinator
        .create_task(CreateTaskRequest {
            title: "Survey".to_string(),
            description: None,
            assignees: vec!["scout".to_string()],
            priority: None,
            creator_id: "planner".to_string(),
            parent_task_id: None,
            max_retries: None,
        })
        .await
        .unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("Timed out waiting for event")
        .expect("Stream ended")
        .expect("WebSocket error");
    let Message::Text(text) = frame else {
        panic!("Expected a text frame");
    };
    let event: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(event["event"], "task_created");
    assert_eq!(event["task_id"], task.id.to_string());

    state.coordinator.claim(task.id, "scout").await.unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("Timed out waiting for event")
        .expect("Stream ended")
        .expect("WebSocket error");
    let Message::Text(text) = frame else {
        panic!("Expected a text frame");
    };
    let event: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(event["event"], "task_claimed");
    assert_eq!(event["agent_id"], "scout");
}
