//! Service Runtime (v1)
//!
//! Reference service built on the runtime: probes, admission control,
//! an outbound client, and a heartbeat worker.
//!
//! # Architecture Overview
//!
//! ```text
//!     Request ──▶ TraceLayer ──▶ AdmissionLayer ──────────────────▶ routes
//!                                 │ panic recovery                    │
//!                                 │ timeout                           ▼
//!                                 │ rate limit                  ResilientClient
//!                                 │ circuit breaker              (retry, lifetime)
//!                                 │ bulkhead
//!                                 │ request logging
//!
//!     ReadinessCoordinator ◀── http-server, outbound-client
//!            │
//!            ├──▶ /readyz, /healthz
//!            └──▶ workers (start once ready)
//!
//!     Shutdown ◀── SIGTERM/SIGINT, fatal worker errors
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, Request, State};
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use serde_json::{json, Value};

use service_runtime::config::{load_config, RuntimeConfig};
use service_runtime::http::{Failure, RequestIdExt};
use service_runtime::lifecycle::{Bootstrap, WorkerOptions};
use service_runtime::observability::init_logging;
use service_runtime::{BoxError, ResilientClient};

const OUTBOUND_COMPONENT: &str = "outbound-client";

#[derive(Parser)]
#[command(name = "service-runtime")]
#[command(about = "Resilient HTTP service runtime", long_about = None)]
struct Args {
    /// Path to a TOML config file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Clone)]
struct AppState {
    client: Arc<ResilientClient>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => RuntimeConfig::default(),
    };

    init_logging(&config.observability)?;
    tracing::info!(
        bind_address = %config.listener.bind_address,
        traffic_mode = ?config.readiness.traffic_mode,
        "service-runtime v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let bootstrap = Bootstrap::new(config)?;

    bootstrap.readiness().add_component(OUTBOUND_COMPONENT)?;
    let client = Arc::new(ResilientClient::new(&bootstrap.config().outbound));
    bootstrap.readiness().mark_ready(OUTBOUND_COMPONENT)?;

    let heartbeat = bootstrap
        .worker("heartbeat", |token| async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(30));
            loop {
                tokio::select! {
                    _ = token.cancelled() => return Ok::<(), BoxError>(()),
                    _ = ticker.tick() => tracing::debug!("Heartbeat"),
                }
            }
        })
        .with_options(WorkerOptions {
            wait_for_readiness: true,
            ..WorkerOptions::default()
        });

    let routes = Router::new()
        .route("/", get(index))
        .route("/fetch", get(fetch))
        .with_state(AppState { client });

    let exit_code = bootstrap
        .with_routes(routes)
        .with_worker(heartbeat)
        .run()
        .await?;

    std::process::exit(exit_code);
}

async fn index(request: Request) -> Json<Value> {
    Json(json!({
        "service": "service-runtime",
        "request_id": request.request_id().map(ToString::to_string),
    }))
}

#[derive(serde::Deserialize)]
struct FetchParams {
    url: String,
}

/// Fetch `url` through the outbound client and report the upstream status.
async fn fetch(
    State(state): State<AppState>,
    Query(params): Query<FetchParams>,
) -> Result<Json<Value>, Failure> {
    let response = state.client.get(&params.url).await.map_err(|e| {
        tracing::warn!(url = %params.url, error = %e, "Outbound request failed");
        Failure::unavailable(e.to_string())
    })?;
    Ok(Json(json!({
        "url": params.url,
        "status": response.status().as_u16(),
    })))
}
