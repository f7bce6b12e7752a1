use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use quiz_room_back::{
    build_router,
    config::AppConfig,
    dao::room_store::{RoomStore, memory::InMemoryRoomStore},
    state::{AppState, clock::ManualClock},
};

fn app() -> Router {
    let store: Arc<dyn RoomStore> = Arc::new(InMemoryRoomStore::new());
    let config = AppConfig {
        auto_advance: false,
        ..AppConfig::default()
    };
    let state = AppState::with_store(config, Arc::new(ManualClock::new(1_000_000)), store);
    build_router(state)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request");

    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, value)
}

async fn seed_deck(app: &Router) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/decks",
        Some(json!({
            "name": "Capitals",
            "questions": [
                { "prompt": "Capital of France?", "choices": ["Paris", "Lyon"], "correctIndex": 0 },
                { "prompt": "Capital of Japan?", "choices": ["Osaka", "Tokyo"], "correctIndex": 1 }
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["questionCount"], 2);
    body["id"].as_str().expect("deck id").to_owned()
}

#[tokio::test]
async fn healthcheck_reports_ok_with_memory_store() {
    let app = app();
    let (status, body) = send(&app, "GET", "/healthcheck", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn decks_are_listed_after_creation() {
    let app = app();
    seed_deck(&app).await;

    let (status, body) = send(&app, "GET", "/decks", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn empty_deck_is_rejected() {
    let app = app();
    let (status, body) = send(
        &app,
        "POST",
        "/decks",
        Some(json!({ "name": "Empty", "questions": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_INPUT");
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn host_and_guest_reach_a_scheduled_start() {
    let app = app();
    let deck_id = seed_deck(&app).await;

    let (status, host) = send(
        &app,
        "POST",
        "/rooms",
        Some(json!({ "deckId": deck_id, "nickname": "Host", "guestKey": "host-key-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{host}");
    assert_eq!(host["isHost"], true);
    assert_eq!(host["room"]["status"], "lobby");
    let room_id = host["roomId"].as_str().expect("room id").to_owned();
    let code = host["code"].as_str().expect("code").to_owned();

    let (status, guest) = send(
        &app,
        "POST",
        "/rooms/join",
        Some(json!({ "code": code.to_lowercase(), "nickname": "Guest", "guestKey": "guest-key-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{guest}");
    assert_eq!(guest["isHost"], false);
    assert_eq!(guest["roomId"], room_id.as_str());

    let (status, view) = send(&app, "GET", &format!("/rooms/code/{code}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["participants"].as_array().map(Vec::len), Some(2));

    let (status, body) = send(
        &app,
        "POST",
        "/actions",
        Some(json!({
            "action": "setReady",
            "roomId": room_id,
            "participantId": guest["participantId"],
            "guestKey": "guest-key-1",
            "ready": true
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["ok"], true);

    let (status, body) = send(
        &app,
        "POST",
        "/actions",
        Some(json!({
            "action": "start",
            "roomId": room_id,
            "participantId": host["participantId"],
            "guestKey": "host-key-1"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["data"]["pendingActionId"].is_string());
    assert!(body["data"]["executeAt"].as_i64().expect("executeAt") > 1_000_000);

    let (status, view) = send(&app, "GET", &format!("/rooms/{room_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["pendingAction"]["kind"], "start");
}

#[tokio::test]
async fn acting_for_someone_else_is_forbidden() {
    let app = app();
    let deck_id = seed_deck(&app).await;
    let (_, host) = send(
        &app,
        "POST",
        "/rooms",
        Some(json!({ "deckId": deck_id, "nickname": "Host", "guestKey": "host-key-1" })),
    )
    .await;

    let (status, body) = send(
        &app,
        "POST",
        "/actions",
        Some(json!({
            "action": "heartbeat",
            "roomId": host["roomId"],
            "participantId": host["participantId"],
            "guestKey": "intruder-key"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "NOT_AUTHORIZED");
}

#[tokio::test]
async fn unknown_action_is_rejected() {
    let app = app();
    let (status, body) = send(
        &app,
        "POST",
        "/actions",
        Some(json!({
            "action": "selfDestruct",
            "roomId": "00000000-0000-0000-0000-000000000000",
            "participantId": "00000000-0000-0000-0000-000000000000",
            "guestKey": "guest-key-1"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_ACTION");
}

#[tokio::test]
async fn missing_identity_is_unauthenticated() {
    let app = app();
    let deck_id = seed_deck(&app).await;
    let (status, body) = send(
        &app,
        "POST",
        "/rooms",
        Some(json!({ "deckId": deck_id, "nickname": "Host" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn missing_room_is_not_found() {
    let app = app();
    let (status, body) = send(
        &app,
        "GET",
        "/rooms/00000000-0000-0000-0000-000000000000",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "ROOM_NOT_FOUND");
    assert_eq!(body["retryable"], false);

    let (status, body) = send(&app, "GET", "/rooms/code/ZZZZZZ", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "ROOM_NOT_FOUND");
}

#[tokio::test]
async fn malformed_code_is_invalid_input() {
    let app = app();
    let (status, body) = send(&app, "GET", "/rooms/code/AB", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_INPUT");
}
