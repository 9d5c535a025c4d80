//! HTTP route handlers of the configuration interface.
//!
//! Every response body uses the same envelope:
//!
//! ```json
//! { "data": { ... }, "status": 0, "status_text": "ok" }
//! ```
//!
//! `status` is 0 on success and the HTTP status code otherwise, in which case
//! `data` is `null`.

pub mod config;
pub mod measurement;
pub mod status;

use crate::AppState;
use axum::{http::StatusCode, response::IntoResponse, response::Json, Router};
use serde::Serialize;

/// Create the router with all configuration routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(config::routes())
        .merge(measurement::routes())
        .merge(status::routes())
        .with_state(state)
}

/// Response envelope of every endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: Option<T>,
    pub status: u16,
    pub status_text: String,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            data: Some(data),
            status: 0,
            status_text: "ok".to_string(),
        }
    }

    pub fn failed(status: StatusCode, status_text: impl Into<String>) -> Self {
        Self {
            data: None,
            status: status.as_u16(),
            status_text: status_text.into(),
        }
    }

    fn http_status(&self) -> StatusCode {
        if self.status == 0 {
            StatusCode::OK
        } else {
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> axum::response::Response {
        (self.http_status(), Json(self)).into_response()
    }
}
