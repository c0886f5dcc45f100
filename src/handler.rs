use std::collections::HashMap;
use std::sync::Arc;

use axum::{Json, response::IntoResponse};
use tokio::sync::RwLock;
use tracing::info;

use crate::api::APIResponse;
use crate::session::{SessionContext, SharedSession};

#[derive(Clone)]
pub struct AppState {
    pub ctx: SessionContext,
    /// Open pages keyed by URL.
    pub sessions: Arc<RwLock<HashMap<String, SharedSession>>>,
}

impl AppState {
    pub fn new(ctx: SessionContext) -> Self {
        AppState {
            ctx,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn session(&self, url: &str) -> Option<SharedSession> {
        self.sessions.read().await.get(url).cloned()
    }
}

pub async fn healthcheck() -> impl IntoResponse {
    info!("got healthcheck request");
    Json(APIResponse::new(Some("ok"), None))
}
