//! HTTP transport integration tests.
//!
//! Starts an axum server speaking `POST /:command` and drives it through
//! [`HttpRemote`].

use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use offline_mirror::{
    HttpRemote, MemoryBackend, MutationOutcome, RemoteApi, RemoteCall, RemoteError, SchemaRegistry,
    SyncConfig, SyncEngine, VerifyRead,
};
use serde_json::{json, Value};

#[derive(Clone, Default)]
struct Backend {
    notifications: Arc<Mutex<Option<Value>>>,
    seen_users: Arc<Mutex<Vec<String>>>,
}

async fn handle(
    State(backend): State<Backend>,
    Path(command): Path<String>,
    headers: HeaderMap,
    Json(input): Json<Value>,
) -> Response {
    if let Some(user) = headers.get("x-user-id").and_then(|v| v.to_str().ok()) {
        backend.seen_users.lock().unwrap().push(user.to_string());
    }
    match command.as_str() {
        "follows.follow" => {
            let mut record = input;
            record["followed_at"] = json!(1700000000000i64);
            Json(record).into_response()
        }
        "follows.unfollow" => StatusCode::NO_CONTENT.into_response(),
        "preferences.notifications.set" => {
            *backend.notifications.lock().unwrap() = Some(input);
            Json(Value::Null).into_response()
        }
        "preferences.notifications.get" => {
            Json(backend.notifications.lock().unwrap().clone().unwrap_or(Value::Null)).into_response()
        }
        "sync.snapshot" => Json(json!({
            "channel_follows": [
                { "user_id": input["user_id"], "channel_username": "alice", "_version": 3 }
            ],
            "stickers": [{ "id": "s1" }]
        }))
        .into_response(),
        "busy" => (StatusCode::SERVICE_UNAVAILABLE, "try later").into_response(),
        "forbidden" => (StatusCode::FORBIDDEN, Json(json!({ "error": "not your channel" }))).into_response(),
        _ => (StatusCode::NOT_FOUND, Json(json!({ "error": format!("unknown command {}", command) })))
            .into_response(),
    }
}

/// Bind to port 0 and return the actual address.
async fn start_server(backend: Backend) -> String {
    let app = Router::new()
        .route("/:command", post(handle))
        .with_state(backend);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn execute_returns_canonical_record() {
    let backend = Backend::default();
    let remote = HttpRemote::new(start_server(backend.clone()).await).with_user("u1");

    let record = remote
        .execute(&RemoteCall::new(
            "follows.follow",
            json!({ "user_id": "u1", "channel_username": "alice" }),
        ))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record["followed_at"], json!(1700000000000i64));

    let none = remote
        .execute(&RemoteCall::new("follows.unfollow", json!({ "channel_username": "alice" })))
        .await
        .unwrap();
    assert_eq!(none, None);
    assert_eq!(*backend.seen_users.lock().unwrap(), vec!["u1", "u1"]);
}

#[tokio::test]
async fn status_codes_map_to_remote_errors() {
    let remote = HttpRemote::new(start_server(Backend::default()).await);

    let busy = remote.execute(&RemoteCall::new("busy", json!({}))).await.unwrap_err();
    assert!(matches!(busy, RemoteError::Network(ref m) if m.contains("try later")));
    assert!(busy.is_retryable());

    let forbidden = remote.execute(&RemoteCall::new("forbidden", json!({}))).await.unwrap_err();
    assert_eq!(
        forbidden,
        RemoteError::Rejected {
            status: 403,
            message: "not your channel".into()
        }
    );
    assert!(!forbidden.is_retryable());
}

#[tokio::test]
async fn unreachable_backend_is_a_network_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let remote = HttpRemote::new(format!("http://{addr}/"));
    let err = remote
        .execute(&RemoteCall::new("follows.follow", json!({})))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn read_back_reports_backend_state() {
    let remote = HttpRemote::new(start_server(Backend::default()).await);
    let verify = VerifyRead::new("preferences.notifications.get").fields(["enabled"]);

    assert_eq!(remote.read_back(&verify, &json!({ "user_id": "u1" })).await.unwrap(), None);
    remote
        .execute(&RemoteCall::new(
            "preferences.notifications.set",
            json!({ "user_id": "u1", "enabled": true }),
        ))
        .await
        .unwrap();
    assert_eq!(
        remote.read_back(&verify, &json!({ "user_id": "u1" })).await.unwrap(),
        Some(json!({ "user_id": "u1", "enabled": true }))
    );
}

#[tokio::test]
async fn engine_syncs_over_http() {
    let base = start_server(Backend::default()).await;
    let remote = HttpRemote::new(base).with_user("u1");
    let engine = SyncEngine::open(MemoryBackend::new(), SchemaRegistry::social(), remote, SyncConfig::default())
        .await
        .unwrap();

    let report = engine.pull("u1").await.unwrap();
    assert_eq!(report.ignored, vec!["stickers".to_string()]);
    assert!(engine.follows().is_following("u1", "alice").await.unwrap());

    let outcome = engine.follows().follow("u1", "bob").await.unwrap();
    let MutationOutcome::Confirmed(Some(record)) = outcome else {
        panic!("expected a confirmed follow, got {:?}", outcome);
    };
    assert_eq!(record["followed_at"], json!(1700000000000i64));

    // verification read goes through the same transport
    let outcome = engine.preferences().set_notifications("u1", true).await.unwrap();
    assert!(matches!(outcome, MutationOutcome::Confirmed(_)));
    assert_eq!(
        engine.preferences().notifications_enabled("u1").await.unwrap(),
        Some(true)
    );
}
