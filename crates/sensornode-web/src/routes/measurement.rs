//! On-demand sensor routes.
//!
//! # Endpoints
//!
//! ### `GET /measurement`
//! Reads the sensor once with the stored sensor settings. The cycle is not
//! affected.
//!
//! **Response:**
//! ```json
//! {
//!   "data": {
//!     "client_id": "a1b2c3d4e5f6",
//!     "publish_timestamp": 1700000000000,
//!     "payload": {"temperature": [[1700000000000, 21.5]]}
//!   },
//!   "status": 0,
//!   "status_text": "ok"
//! }
//! ```
//!
//! ### `POST /measurement/test`
//! Queues a test acquisition on the scheduler. Its outcome is reported as
//! `last_test` by `GET /status`.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Router,
};
use sensornode_controller::SensorError;
use sensornode_core::MeasurementEnvelope;
use serde::Serialize;
use tracing::warn;

use super::ApiResponse;
use crate::AppState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestStarted {
    pub result: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/measurement", get(get_measurement))
        .route("/measurement/test", post(start_test))
}

/// GET /measurement
async fn get_measurement(State(hook): State<AppState>) -> ApiResponse<MeasurementEnvelope> {
    // Sensor drivers block for the duration of a read.
    let result = tokio::task::spawn_blocking(move || hook.measurement()).await;
    match result {
        Ok(Ok(envelope)) => ApiResponse::ok(envelope),
        Ok(Err(e @ SensorError::Unavailable(_))) => {
            warn!("Measurement failed: {}", e);
            ApiResponse::failed(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
        Ok(Err(e)) => {
            warn!("Measurement failed: {}", e);
            ApiResponse::failed(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => ApiResponse::failed(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// POST /measurement/test
async fn start_test(State(hook): State<AppState>) -> ApiResponse<TestStarted> {
    hook.start_test_data_acquisition();
    ApiResponse::ok(TestStarted {
        result: "started".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use crate::create_router;
    use crate::fixture::{fixture, NOW_MS};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use pretty_assertions::assert_eq;
    use sensornode_controller::{EventKind, SensorError};
    use sensornode_core::{ConfigStorage, CycleState};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_measurement_returns_reading() {
        let fx = fixture();
        let response = create_router(fx.hook.clone())
            .oneshot(Request::get("/measurement").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], 0);
        assert_eq!(body["data"]["client_id"], "sensornode");
        assert_eq!(body["data"]["publish_timestamp"], NOW_MS);
        assert_eq!(body["data"]["payload"], json!({"temperature": [[NOW_MS, 21.5]]}));

        // A reading on demand neither queues work nor moves the cycle.
        assert!(fx.queue.is_empty());
        assert_eq!(
            fx.storage.load_device_config().unwrap().cycle,
            CycleState::default()
        );
    }

    #[tokio::test]
    async fn test_measurement_sensor_unavailable() {
        let fx = fixture();
        fx.readings
            .lock()
            .unwrap()
            .push_back(Err(SensorError::Unavailable("no GPIO".to_string())));

        let response = create_router(fx.hook.clone())
            .oneshot(Request::get("/measurement").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            body_json(response).await,
            json!({"data": null, "status": 503, "status_text": "sensor not available: no GPIO"})
        );
    }

    #[tokio::test]
    async fn test_measurement_read_failure() {
        let fx = fixture();
        fx.readings
            .lock()
            .unwrap()
            .push_back(Err(SensorError::Read("checksum mismatch".to_string())));

        let response = create_router(fx.hook.clone())
            .oneshot(Request::get("/measurement").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["status"], 500);
    }

    #[tokio::test]
    async fn test_start_test_queues_acquisition() {
        let fx = fixture();
        let response = create_router(fx.hook.clone())
            .oneshot(
                Request::post("/measurement/test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"data": {"result": "started"}, "status": 0, "status_text": "ok"})
        );

        let event = fx.queue.pop().unwrap();
        assert_eq!(event.kind, EventKind::TestDataAcquisition);
        assert!(fx.queue.is_empty());
    }
}
