//! HTTP health surface for the event bus.
//!
//! Requires the `http` feature. Uses axum for routing.
//!
//! ## Routes
//!
//! - `GET /status/queues`: queue info array, sorted by queue name.
//! - `GET /status/bus`: `{ "secondary": <state>, "queues": {...}, "ok": bool }`.
//!   Answers `503 Service Unavailable` when `ok` is false.
//!
//! ## Example
//!
//! ```ignore
//! let bus = Arc::new(EventBus::builder(config).start()?);
//!
//! // Compose with other axum routes
//! let app = audit_bus::http::router(bus.clone());
//!
//! // Or serve directly
//! audit_bus::http::serve(bus, "0.0.0.0:8080").await?;
//! ```

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::event_bus::EventBus;

/// Build an axum `Router` reporting on the given bus.
pub fn router(bus: Arc<EventBus>) -> Router {
    Router::new()
        .route("/status/queues", get(queues_handler))
        .route("/status/bus", get(bus_handler))
        .with_state(bus)
}

/// Serve the health routes at the given address (e.g. `"0.0.0.0:8080"`).
pub async fn serve(bus: Arc<EventBus>, addr: &str) -> Result<(), std::io::Error> {
    let app = router(bus);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

async fn queues_handler(State(bus): State<Arc<EventBus>>) -> impl IntoResponse {
    let queues = tokio::task::spawn_blocking(move || bus.manager().get_queue_info()).await;
    match queues {
        Ok(queues) => (StatusCode::OK, Json(queues)).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn bus_handler(State(bus): State<Arc<EventBus>>) -> impl IntoResponse {
    // Management queries block for up to the receive timeout.
    let status = tokio::task::spawn_blocking(move || bus.status()).await;
    match status {
        Ok(status) if status.ok => (StatusCode::OK, Json(status)).into_response(),
        Ok(status) => (StatusCode::SERVICE_UNAVAILABLE, Json(status)).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
