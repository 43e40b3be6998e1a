#![allow(clippy::unwrap_used, clippy::panic, clippy::missing_panics_doc, clippy::clone_on_ref_ptr, unreachable_pub)]
mod common;

use common::{TIMEOUT, TestApp, TestUser};
use parley_server::domain::event::SubscriptionEvent;
use parley_server::error::AppError;
use parley_server::services::subscription::SubscriptionState;
use parley_server::session::ViewerSession;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
async fn test_conversation_view_merges_history_and_pushes() {
    let app = TestApp::spawn().await;
    let client = TestUser::client();
    let admin = TestUser::admin();
    let conversation = app.create_conversation(&client, None, "Inquiry about unit 4B").await;
    app.send_ok(&client, conversation.id, "is 4B still available?").await;

    let session = ViewerSession::start(app.services.clone(), admin.viewer).await.unwrap();
    let view = session.open(conversation.id).await.unwrap();
    assert_eq!(view.messages().len(), 1);

    app.send_ok(&client, conversation.id, "also, are pets allowed?").await;
    assert!(view.wait_until(|timeline| timeline.len() == 2, TIMEOUT).await);

    let mut draft = String::from("Yes, 4B is available and cats are fine.");
    let sent = view.send(&mut draft).await.unwrap();
    assert!(draft.is_empty());

    // The pushed copy of our own message must not duplicate the one merged locally.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let messages = view.messages();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages.last().unwrap().id, sent.id);
    assert!(messages.windows(2).all(|w| w[0].key() < w[1].key()));

    // Opening marks everything read for the admin, and pushed client messages keep it that way.
    let unread = app.services.read_state_service.unread_count(conversation.id, &admin.viewer).await.unwrap();
    assert_eq!(unread, 0);

    view.close();
    assert!(view.is_closed());
    session.close();
}

#[tokio::test]
async fn test_failed_send_keeps_draft() {
    let app = TestApp::spawn().await;
    let client = TestUser::client();
    let conversation = app.create_conversation(&client, None, "Drafts").await;

    let session = ViewerSession::start(app.services.clone(), client.viewer).await.unwrap();
    let view = session.open(conversation.id).await.unwrap();

    let mut draft = String::from("   ");
    let err = view.send(&mut draft).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidArgument(_)));
    assert_eq!(draft, "   ");
    assert!(view.messages().is_empty());
    assert!(view.wait_until(|timeline| timeline.is_empty(), TIMEOUT).await);
}

#[tokio::test]
async fn test_directory_tracks_new_conversations_and_unread() {
    let app = TestApp::spawn().await;
    let client = TestUser::client();
    let admin = TestUser::admin();

    let session = ViewerSession::start(app.services.clone(), client.viewer).await.unwrap();
    assert!(session.directory().summaries().is_empty());

    let conversation = app.create_conversation(&client, None, "Parking spot").await;
    assert!(session.directory().wait_until(|list| list.len() == 1, TIMEOUT).await);

    app.send_ok(&admin, conversation.id, "spot 12 is yours").await;
    assert!(session.directory().wait_until(|list| list.first().is_some_and(|s| s.unread_count == 1), TIMEOUT).await);
    assert_eq!(session.directory().unread_total(), 1);

    let view = session.open(conversation.id).await.unwrap();
    assert!(session.directory().wait_until(|list| list.iter().all(|s| s.unread_count == 0), TIMEOUT).await);
    drop(view);
}

#[tokio::test]
async fn test_session_create_is_visible_immediately() {
    let app = TestApp::spawn().await;
    let client = TestUser::client();
    let session = ViewerSession::start(app.services.clone(), client.viewer).await.unwrap();

    let conversation = session.create_conversation(client.id(), Some("  Window repair ".into())).await.unwrap();
    assert_eq!(conversation.subject.as_deref(), Some("Window repair"));
    assert!(session.directory().get(conversation.id).is_some());
}

#[tokio::test]
async fn test_unsubscribe_is_idempotent_and_stops_delivery() {
    let app = TestApp::spawn().await;
    let client = TestUser::client();
    let conversation = app.create_conversation(&client, None, "Quiet").await;

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let handle = app
        .services
        .subscription_manager
        .subscribe_messages(conversation.id, move |event| {
            if let SubscriptionEvent::Event(message) = event {
                sink.lock().unwrap().push(message.id);
            }
        })
        .await
        .unwrap();
    assert_eq!(handle.state(), SubscriptionState::Active);

    app.send_ok(&client, conversation.id, "one").await;
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while received.lock().unwrap().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(received.lock().unwrap().len(), 1);

    handle.unsubscribe();
    handle.unsubscribe();
    assert_eq!(handle.state(), SubscriptionState::Unsubscribed);

    app.send_ok(&client, conversation.id, "two").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(received.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_reconnect_triggers_resync() {
    let app = TestApp::spawn().await;
    let client = TestUser::client();
    let conversation = app.create_conversation(&client, None, "Flaky").await;

    let activations = Arc::new(Mutex::new(0_u32));
    let counter = activations.clone();
    let _handle = app
        .services
        .subscription_manager
        .subscribe_messages(conversation.id, move |event| {
            if matches!(event, SubscriptionEvent::Activated) {
                *counter.lock().unwrap() += 1;
            }
        })
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while *activations.lock().unwrap() < 1 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    app.pubsub.announce_reconnect();
    while *activations.lock().unwrap() < 2 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(*activations.lock().unwrap() >= 2);
}

#[tokio::test]
async fn test_conversation_view_survives_lost_upstream() {
    let app = TestApp::spawn().await;
    let client = TestUser::client();
    let admin = TestUser::admin();
    let conversation = app.create_conversation(&client, None, "Elevator").await;

    let session = ViewerSession::start(app.services.clone(), client.viewer).await.unwrap();
    let view = session.open(conversation.id).await.unwrap();

    app.pubsub.disconnect();
    // Whether this lands before or after re-establishment, the view must end up with it.
    app.send_ok(&admin, conversation.id, "the elevator is being serviced").await;
    assert!(view.wait_until(|timeline| timeline.len() == 1, TIMEOUT).await);

    app.send_ok(&admin, conversation.id, "back in service").await;
    assert!(view.wait_until(|timeline| timeline.len() == 2, TIMEOUT).await);
}

#[tokio::test]
async fn test_subscribe_fails_when_bus_is_down() {
    let app = TestApp::spawn().await;
    app.pubsub.set_available(false);

    let err = app.services.subscription_manager.subscribe_messages(Uuid::new_v4(), |_| {}).await.unwrap_err();
    assert!(matches!(err, AppError::Subscription(_)));
}

#[tokio::test]
async fn test_websocket_conversation_stream() {
    let app = TestApp::spawn().await;
    let client = TestUser::client();
    let conversation = app.create_conversation(&client, None, "Stream me").await;

    let mut ws = app.connect_ws(&format!("conversations/{}/stream", conversation.id), &client.token).await;
    let first = ws.receive_frame().await.expect("No activation frame");
    assert_eq!(first["type"], "activated");

    let sent = app.send_ok(&client, conversation.id, "over the wire").await;
    let pushed = ws.receive_event().await.expect("No message frame");
    assert_eq!(pushed["id"], sent["id"]);
    assert_eq!(pushed["content"], "over the wire");
}

#[tokio::test]
async fn test_websocket_directory_stream_filters_foreign_read_state() {
    let app = TestApp::spawn().await;
    let alice = TestUser::client();
    let bob = TestUser::client();
    let admin = TestUser::admin();
    let conversation = app.create_conversation(&alice, None, "Alice only").await;
    app.send_ok(&admin, conversation.id, "hello alice").await;

    let mut bob_ws = app.connect_ws("stream", &bob.token).await;
    assert_eq!(bob_ws.receive_frame().await.unwrap()["type"], "activated");
    let mut admin_ws = app.connect_ws("stream", &admin.token).await;
    assert_eq!(admin_ws.receive_frame().await.unwrap()["type"], "activated");

    app.mark_read(&alice, conversation.id).await;

    let frame = admin_ws.receive_frame_timeout(Duration::from_millis(200)).await;
    assert!(frame.is_none(), "Alice's read state is not the admin's concern: {frame:?}");
    assert!(bob_ws.receive_frame_timeout(Duration::from_millis(200)).await.is_none());

    app.services.assignment_service.assign(conversation.id, &admin.viewer).await.unwrap();
    let change = admin_ws.receive_event().await.expect("No assignment frame");
    assert_eq!(change["conversation_id"], conversation.id.to_string());
    assert_eq!(change["kind"], "assigned");
    // Bob cannot see Alice's conversation, so its changes never reach him.
    assert!(bob_ws.receive_frame_timeout(Duration::from_millis(200)).await.is_none());
}

#[tokio::test]
async fn test_websocket_rejects_bad_token() {
    let app = TestApp::spawn().await;
    let url = format!("{}/v1/stream?token=not-a-jwt", app.ws_url);
    assert!(tokio_tungstenite::connect_async(url).await.is_err());
}
