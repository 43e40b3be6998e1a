use crate::api::MgmtState;
use crate::api::dto::health::HealthResponse;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};

/// Liveness probe: returns 200 OK as long as the server is running.
pub async fn livez() -> impl IntoResponse {
    StatusCode::OK
}

/// Readiness probe: checks connectivity to the store and the pub/sub bus.
pub async fn readyz(State(state): State<MgmtState>) -> impl IntoResponse {
    let (store_res, pubsub_res) =
        tokio::join!(state.health_service.check_store(), state.health_service.check_pubsub());

    let mut status_code = StatusCode::OK;
    let store_status = if let Err(e) = store_res {
        tracing::warn!(error = %e, component = "store", "Readiness probe failed");
        status_code = StatusCode::SERVICE_UNAVAILABLE;
        "error"
    } else {
        "ok"
    };

    let pubsub_status = if let Err(e) = pubsub_res {
        tracing::warn!(error = %e, component = "pubsub", "Readiness probe failed");
        status_code = StatusCode::SERVICE_UNAVAILABLE;
        "error"
    } else {
        "ok"
    };

    let response = HealthResponse {
        status: if status_code == StatusCode::OK { "ok" } else { "error" }.to_string(),
        store: store_status.to_string(),
        pubsub: pubsub_status.to_string(),
    };

    (status_code, Json(response))
}
