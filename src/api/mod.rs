use crate::config::Config;
use crate::services::ServiceContainer;
use crate::services::assignment_service::AssignmentService;
use crate::services::conversation_service::ConversationService;
use crate::services::health_service::HealthService;
use crate::services::message_service::MessageService;
use crate::services::read_state_service::ReadStateService;
use crate::services::subscription::SubscriptionManager;
use axum::body::Body;
use axum::http::{HeaderName, Request};
use axum::{
    Router,
    routing::{get, post, put},
};
use std::sync::Arc;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

pub mod conversations;
pub mod dto;
pub mod health;
pub mod messages;
pub mod middleware;
pub mod stream;

const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone, Debug)]
pub struct AppState {
    pub config: Config,
    pub conversation_service: ConversationService,
    pub message_service: MessageService,
    pub read_state_service: ReadStateService,
    pub assignment_service: AssignmentService,
    pub subscription_manager: Arc<SubscriptionManager>,
    pub shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

#[derive(Clone, Debug)]
pub struct MgmtState {
    pub health_service: HealthService,
}

/// Configures and returns the primary application router.
pub fn app_router(config: Config, services: ServiceContainer, shutdown_rx: tokio::sync::watch::Receiver<bool>) -> Router {
    let state = AppState {
        config,
        conversation_service: services.conversation_service,
        message_service: services.message_service,
        read_state_service: services.read_state_service,
        assignment_service: services.assignment_service,
        subscription_manager: services.subscription_manager,
        shutdown_rx,
    };

    let api_routes = Router::new()
        .route("/conversations", post(conversations::create_conversation).get(conversations::list_conversations))
        .route("/conversations/{id}", get(conversations::get_conversation))
        .route("/conversations/{id}/messages", get(messages::list_messages).post(messages::send_message))
        .route("/conversations/{id}/read", post(messages::mark_read))
        .route("/conversations/{id}/assignment", post(conversations::assign_conversation))
        .route("/conversations/{id}/status", put(conversations::update_status))
        .route("/conversations/{id}/stream", get(stream::conversation_stream))
        .route("/unread", get(conversations::unread))
        .route("/stream", get(stream::directory_stream));

    Router::new()
        .nest("/v1", api_routes)
        .layer(PropagateRequestIdLayer::new(HeaderName::from_static(REQUEST_ID_HEADER)))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(move |request: &Request<Body>| {
                    let request_id = request
                        .extensions()
                        .get::<tower_http::request_id::RequestId>()
                        .map(|id| id.header_value().to_str().unwrap_or_default())
                        .unwrap_or_default()
                        .to_string();

                    tracing::info_span!(
                        "request",
                        "request_id" = %request_id,
                        "http.request.method" = %request.method(),
                        "url.path" = %request.uri().path(),
                        "http.response.status_code" = tracing::field::Empty,
                        "otel.kind" = "server",
                        "user_id" = tracing::field::Empty,
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>, latency: std::time::Duration, _span: &tracing::Span| {
                        let status = response.status();
                        tracing::Span::current().record("http.response.status_code", status.as_u16());

                        tracing::info!(
                            latency_ms = %latency.as_millis(),
                            status = %status.as_u16(),
                            "request completed"
                        );
                    },
                )
                .on_failure(|error, _latency, _span: &tracing::Span| {
                    tracing::error!(error = %error, "request failed");
                }),
        )
        .layer(SetRequestIdLayer::new(HeaderName::from_static(REQUEST_ID_HEADER), MakeRequestUuid))
        .with_state(state)
}

pub fn mgmt_router(state: MgmtState) -> Router {
    Router::new().route("/livez", get(health::livez)).route("/readyz", get(health::readyz)).with_state(state)
}
