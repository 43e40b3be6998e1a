use crate::api::AppState;
use crate::domain::event::{ConversationChange, SubscriptionEvent};
use crate::domain::message::Message;
use crate::domain::viewer::{Claims, Viewer};
use crate::error::Result;
use crate::services::subscription::SubscriptionHandle;
use async_trait::async_trait;
use axum::{
    extract::{
        Path, Query, State,
        ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade, close_code},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use opentelemetry::{KeyValue, global};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Notify, mpsc};
use tracing::Instrument;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct StreamParams {
    token: String,
}

impl std::fmt::Debug for StreamParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamParams").field("token", &"<redacted>").finish()
    }
}

/// Wire frame for both streams. `activated` tells the client to re-fetch its snapshot.
#[derive(Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum StreamFrame<T> {
    Activated,
    Event(T),
}

impl<T> From<SubscriptionEvent<T>> for StreamFrame<T> {
    fn from(event: SubscriptionEvent<T>) -> Self {
        match event {
            SubscriptionEvent::Activated => Self::Activated,
            SubscriptionEvent::Event(item) => Self::Event(item),
        }
    }
}

#[async_trait]
trait StreamItem: Serialize + Send + Sync + 'static {
    async fn visible_to(&self, state: &AppState, viewer: &Viewer) -> bool;
}

#[async_trait]
impl StreamItem for Message {
    // Access to the conversation was checked before the upgrade.
    async fn visible_to(&self, _state: &AppState, _viewer: &Viewer) -> bool {
        true
    }
}

#[async_trait]
impl StreamItem for ConversationChange {
    async fn visible_to(&self, state: &AppState, viewer: &Viewer) -> bool {
        if !self.concerns(viewer.id) {
            return false;
        }
        viewer.is_admin || state.conversation_service.get(self.conversation_id, viewer).await.is_ok()
    }
}

type Outbound<T> = (mpsc::Sender<SubscriptionEvent<T>>, mpsc::Receiver<SubscriptionEvent<T>>, Arc<Notify>);

fn outbound<T>(capacity: usize) -> Outbound<T> {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (tx, rx, Arc::new(Notify::new()))
}

// A full buffer means the client fell behind; it is disconnected and re-syncs on reconnect.
fn forward<T: Send + 'static>(
    tx: mpsc::Sender<SubscriptionEvent<T>>,
    overflow: Arc<Notify>,
) -> impl FnMut(SubscriptionEvent<T>) + Send + 'static {
    move |event| {
        if tx.try_send(event).is_err() {
            overflow.notify_one();
        }
    }
}

/// Streams one conversation's messages over a WebSocket.
///
/// # Errors
/// Returns `AppError::AuthError` for a bad token, `AppError::NotFound`/`AppError::Forbidden` if the
/// conversation cannot be viewed, and `AppError::Subscription` if the channel cannot be established.
pub async fn conversation_stream(
    ws: WebSocketUpgrade,
    Path(conversation_id): Path<Uuid>,
    Query(params): Query<StreamParams>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse> {
    let viewer = Claims::decode(&params.token, &state.config.auth.jwt_secret)?.viewer();
    state.conversation_service.get(conversation_id, &viewer).await?;

    let (tx, rx, overflow) = outbound(state.config.notifications.route_capacity);
    let handle =
        state.subscription_manager.subscribe_messages(conversation_id, forward(tx, Arc::clone(&overflow))).await?;

    Ok(ws.on_upgrade(move |socket| pump(socket, state, viewer, handle, rx, overflow)))
}

/// Streams conversation-list change signals over a WebSocket.
///
/// # Errors
/// Returns `AppError::AuthError` for a bad token and `AppError::Subscription` if the channel cannot
/// be established.
pub async fn directory_stream(
    ws: WebSocketUpgrade,
    Query(params): Query<StreamParams>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse> {
    let viewer = Claims::decode(&params.token, &state.config.auth.jwt_secret)?.viewer();

    let (tx, rx, overflow) = outbound(state.config.notifications.route_capacity);
    let handle = state.subscription_manager.subscribe_conversations(forward(tx, Arc::clone(&overflow))).await?;

    Ok(ws.on_upgrade(move |socket| pump(socket, state, viewer, handle, rx, overflow)))
}

async fn pump<T: StreamItem>(
    socket: WebSocket,
    state: AppState,
    viewer: Viewer,
    handle: SubscriptionHandle,
    mut events: mpsc::Receiver<SubscriptionEvent<T>>,
    overflow: Arc<Notify>,
) {
    let span = tracing::info_span!(
        "websocket_session",
        viewer_id = %viewer.id,
        channel = %handle.channel(),
        otel.kind = "server",
        ws.session_id = %Uuid::new_v4()
    );

    async move {
        let meter = global::meter("parley-server");
        let active_connections = meter
            .i64_up_down_counter("websocket_active_connections")
            .with_description("Number of active WebSocket connections")
            .build();
        active_connections.add(1, &[]);
        tracing::info!("WebSocket connected");

        let (mut ws_sink, mut ws_stream) = socket.split();
        let mut shutdown_rx = state.shutdown_rx.clone();

        loop {
            if *shutdown_rx.borrow() {
                tracing::info!("Shutdown signal received, closing WebSocket");
                let _ = ws_sink
                    .send(WsMessage::Close(Some(CloseFrame {
                        code: close_code::AWAY,
                        reason: "Server shutting down".into(),
                    })))
                    .await;
                break;
            }

            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {}
                () = overflow.notified() => {
                    tracing::warn!("Outbound buffer full, disconnecting slow client");
                    let dropped = meter
                        .u64_counter("websocket_outbound_dropped_total")
                        .with_description("Connections closed because the outbound buffer filled")
                        .build();
                    dropped.add(1, &[KeyValue::new("reason", "buffer_full")]);
                    let _ = ws_sink
                        .send(WsMessage::Close(Some(CloseFrame { code: close_code::AGAIN, reason: "Too slow".into() })))
                        .await;
                    break;
                }
                msg = ws_stream.next() => {
                    match msg {
                        Some(Ok(WsMessage::Close(_))) | None => break,
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "WebSocket error");
                            break;
                        }
                        // Inbound frames carry nothing on these streams.
                        Some(Ok(_)) => {}
                    }
                }
                event = events.recv() => {
                    let Some(event) = event else { break };
                    if let SubscriptionEvent::Event(item) = &event
                        && !item.visible_to(&state, &viewer).await
                    {
                        continue;
                    }

                    match serde_json::to_string(&StreamFrame::from(event)) {
                        Ok(text) => {
                            if ws_sink.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::error!(error = %e, "Failed to encode stream frame"),
                    }
                }
            }
        }

        handle.unsubscribe();
        active_connections.add(-1, &[]);
        tracing::info!("WebSocket disconnected");
    }
    .instrument(span)
    .await;
}
