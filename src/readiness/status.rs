//! Readiness snapshots exposed to probes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// State of one registered component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentStatus {
    pub name: String,
    pub ready: bool,
    pub started_at: DateTime<Utc>,
    pub ready_at: Option<DateTime<Utc>>,
}

/// Point-in-time view of the coordinator, taken under a single lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadinessStatus {
    /// True once every registered component reported ready.
    pub ready: bool,
    /// Components sorted by name.
    pub components: Vec<ComponentStatus>,
    /// Latest component `ready_at`.
    pub ready_at: Option<DateTime<Utc>>,
    /// When traffic readiness was recorded.
    pub traffic_notified_at: Option<DateTime<Utc>>,
}

impl IntoResponse for ReadinessStatus {
    /// 200 when ready, 503 otherwise; the snapshot is the body either way.
    fn into_response(self) -> Response {
        let status = if self.ready {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        (status, Json(self)).into_response()
    }
}
