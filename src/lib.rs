//! Foreman server - task coordination for autonomous agent crews

pub mod api;
pub mod config;
pub mod coordination;
pub mod error;
pub mod models;
pub mod store;
pub mod websocket;

use sqlx::SqlitePool;
use std::sync::Arc;

use coordination::{CoordinatorConfig, TaskCoordinator};
use store::Store;

/// Application state shared across handlers
pub struct AppState {
    pub store: Store,
    pub coordinator: TaskCoordinator,
}

impl AppState {
    pub fn new(pool: SqlitePool) -> Arc<Self> {
        Self::with_config(pool, CoordinatorConfig::default())
    }

    pub fn with_config(pool: SqlitePool, config: CoordinatorConfig) -> Arc<Self> {
        let store = Store::new(pool);
        Arc::new(Self {
            coordinator: TaskCoordinator::new(store.clone(), config),
            store,
        })
    }
}
