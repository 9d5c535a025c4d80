//! Device configuration route.
//!
//! # Endpoints
//!
//! ### `POST /config`
//! Applies credentials and a cloud target. On success the node leaves
//! configuration mode and restarts its cycle after a minimal sleep.
//!
//! **Request:**
//! ```json
//! {
//!   "credentials": [{"ssid": "homewifi", "password": "secret"}],
//!   "cloud": {"provider": "thingsboard", "host": "demo.thingsboard.io", "access_token": "..."},
//!   "data_publishing_period_ms": 60000
//! }
//! ```
//!
//! **Response:**
//! ```json
//! { "data": {"result": "ok"}, "status": 0, "status_text": "ok" }
//! ```

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::Json,
    routing::post,
    Router,
};
use sensornode_controller::hook::{STATUS_BAD_REQUEST, STATUS_OK};
use sensornode_core::ConfigurationRequest;
use serde::Serialize;
use tracing::{info, warn};

use super::ApiResponse;
use crate::AppState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigResult {
    pub result: String,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/config", post(set_config))
}

/// POST /config
async fn set_config(
    State(hook): State<AppState>,
    payload: Result<Json<ConfigurationRequest>, JsonRejection>,
) -> ApiResponse<ConfigResult> {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!("Malformed configuration request: {}", rejection.body_text());
            return ApiResponse::failed(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    info!(
        "Configuration request for {} with {} networks",
        request.cloud.name(),
        request.credentials.len()
    );
    match hook.device_configuration(request) {
        STATUS_OK => ApiResponse::ok(ConfigResult {
            result: "ok".to_string(),
        }),
        STATUS_BAD_REQUEST => {
            ApiResponse::failed(StatusCode::BAD_REQUEST, "incomplete configuration")
        }
        _ => ApiResponse::failed(
            StatusCode::INTERNAL_SERVER_ERROR,
            "configuration could not be stored",
        ),
    }
}

#[cfg(test)]
mod tests {
    use crate::create_router;
    use crate::fixture::fixture;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use pretty_assertions::assert_eq;
    use sensornode_controller::EventKind;
    use sensornode_core::ConfigStorage;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn post(body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/config")
            .header("content-type", "application/json")
            .body(body.into())
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_valid_configuration_applied() {
        let fx = fixture();
        let request = json!({
            "credentials": [{"ssid": "homewifi", "password": "A"}],
            "cloud": {
                "provider": "thingsboard",
                "host": "demo.thingsboard.io",
                "access_token": "TOKEN"
            }
        });

        let response = create_router(fx.hook.clone())
            .oneshot(post(request.to_string()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"data": {"result": "ok"}, "status": 0, "status_text": "ok"})
        );

        let event = fx.queue.pop().unwrap();
        assert_eq!(event.kind, EventKind::GoToSleep);
        assert!(fx.storage.load_device_config().unwrap().ap_config_done);
    }

    #[tokio::test]
    async fn test_incomplete_configuration_rejected() {
        let fx = fixture();
        let request = json!({
            "credentials": [],
            "cloud": {"provider": "blynk", "auth_token": "TOKEN"}
        });

        let response = create_router(fx.hook.clone())
            .oneshot(post(request.to_string()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["status"], 400);
        assert_eq!(body["data"], Value::Null);
        assert!(fx.queue.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_body_rejected() {
        let fx = fixture();
        let response = create_router(fx.hook.clone())
            .oneshot(post("{not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["status"], 400);
        assert!(fx.queue.is_empty());
    }
}
