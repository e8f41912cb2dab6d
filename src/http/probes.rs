//! Liveness and readiness probe endpoints.
//!
//! - `GET /livez`: 200 while the process serves requests
//! - `GET /readyz` (and `/healthz`): readiness snapshot, 200 when ready, 503 otherwise
//!
//! In orchestrated mode a successful `/readyz` is the orchestrator's
//! notification that traffic may now be routed here.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::readiness::{ReadinessCoordinator, TrafficMode};

pub fn router(readiness: ReadinessCoordinator) -> Router {
    Router::new()
        .route("/livez", get(livez))
        .route("/readyz", get(readyz))
        .route("/healthz", get(readyz))
        .with_state(readiness)
}

async fn livez() -> Json<serde_json::Value> {
    Json(json!({ "status": "alive" }))
}

async fn readyz(State(readiness): State<ReadinessCoordinator>) -> Response {
    if readiness.mode() == TrafficMode::Orchestrated && readiness.is_ready() {
        if let Err(e) = readiness.notify_traffic_ready() {
            tracing::debug!(error = %e, "Traffic readiness not recorded");
        }
    }
    readiness.status().into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::Request;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    async fn get_json(app: &Router, path: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn readyz_reflects_component_state() {
        let readiness = ReadinessCoordinator::new(TrafficMode::Standalone);
        readiness.add_component("db").unwrap();
        let app = router(readiness.clone());

        let (status, body) = get_json(&app, "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["ready"], false);
        assert_eq!(body["components"][0]["name"], "db");

        readiness.mark_ready("db").unwrap();
        let (status, body) = get_json(&app, "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ready"], true);
        assert!(body["traffic_notified_at"].is_string());
    }

    #[tokio::test]
    async fn orchestrated_probe_success_notifies_traffic_ready() {
        let readiness = ReadinessCoordinator::new(TrafficMode::Orchestrated);
        readiness.add_component("cache").unwrap();
        let app = router(readiness.clone());

        get_json(&app, "/readyz").await;
        assert!(!readiness.is_traffic_ready());

        readiness.mark_ready("cache").unwrap();
        assert!(!readiness.is_traffic_ready());

        let (status, body) = get_json(&app, "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        assert!(readiness.is_traffic_ready());
        assert!(body["traffic_notified_at"].is_string());
    }

    #[tokio::test]
    async fn livez_always_answers() {
        let readiness = ReadinessCoordinator::default();
        readiness.add_component("never-ready").unwrap();
        let (status, body) = get_json(&router(readiness), "/livez").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "alive");
    }
}
