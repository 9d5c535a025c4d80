//! Node status route.
//!
//! ### `GET /status`
//! Returns the node status, stamped with the current Unix time in seconds.

use axum::{extract::State, routing::get, Router};
use chrono::Utc;
use sensornode_controller::NodeStatus;
use serde::Serialize;

use super::ApiResponse;
use crate::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct StatusData {
    pub timestamp: i64,
    #[serde(flatten)]
    pub node: NodeStatus,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/status", get(get_status))
}

/// GET /status
async fn get_status(State(hook): State<AppState>) -> ApiResponse<StatusData> {
    ApiResponse::ok(StatusData {
        timestamp: Utc::now().timestamp(),
        node: hook.status(),
    })
}
