use std::sync::{Arc, Mutex};

use offline_mirror::{
    ChangeCause, Key, MemoryBackend, MutationTarget, Snapshot, SyncConfig,
};
use serde_json::json;

use crate::support::{follow, offline_engine, online_engine, open_engine, rejected, ScriptedRemote};

fn snapshot() -> Snapshot {
    Snapshot::new()
        .with_store(
            "channel_follows",
            vec![follow("u1", "alice"), follow("u1", "bob")],
        )
        .with_store(
            "channel_activity",
            vec![json!({ "channel_username": "alice", "message_count": 12, "_version": 7 })],
        )
}

#[tokio::test]
async fn import_replaces_declared_stores() {
    let engine = online_engine(ScriptedRemote::new()).await;

    let report = engine.import_snapshot("u1", &snapshot()).await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.imported.get("channel_follows"), Some(&2));
    assert_eq!(report.imported.get("channel_activity"), Some(&1));

    let follows = engine.follows().followed_channels("u1").await.unwrap();
    assert_eq!(follows, vec!["alice".to_string(), "bob".to_string()]);

    let activity = engine
        .store()
        .get("channel_activity", &Key::simple("alice"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(activity.version, 7);
    assert!(activity.value.get("_version").is_none());
}

#[tokio::test]
async fn import_is_idempotent() {
    let engine = online_engine(ScriptedRemote::new()).await;
    engine.import_snapshot("u1", &snapshot()).await.unwrap();
    let first = engine.store().get_all("channel_follows").await.unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&events);
    engine
        .subscribers()
        .on_any(move |event| seen.lock().unwrap().push(event.clone()));

    engine.import_snapshot("u1", &snapshot()).await.unwrap();
    assert_eq!(engine.store().get_all("channel_follows").await.unwrap(), first);
    assert!(events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn import_emits_one_event_per_changed_key() {
    let engine = online_engine(ScriptedRemote::new()).await;
    engine.import_snapshot("u1", &snapshot()).await.unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&events);
    engine
        .subscribers()
        .on("channel_follows", move |event| seen.lock().unwrap().push(event.clone()));

    let next = Snapshot::new().with_store(
        "channel_follows",
        vec![follow("u1", "alice"), follow("u1", "carol")],
    );
    engine.import_snapshot("u1", &next).await.unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.cause == ChangeCause::Imported));
    let carol = events.iter().find(|e| e.key == Key::from(("u1", "carol"))).unwrap();
    assert!(carol.value.is_some());
    let bob = events.iter().find(|e| e.key == Key::from(("u1", "bob"))).unwrap();
    assert!(bob.value.is_none());
}

#[tokio::test]
async fn unknown_stores_are_ignored_and_missing_stores_kept() {
    let engine = online_engine(ScriptedRemote::new()).await;
    engine
        .store()
        .put(
            "language_preferences",
            Key::simple("u1"),
            json!({ "user_id": "u1", "language": "pt-BR" }),
        )
        .await
        .unwrap();

    let snapshot = snapshot().with_store("stickers", vec![json!({ "id": "s1" })]);
    let report = engine.import_snapshot("u1", &snapshot).await.unwrap();

    assert_eq!(report.ignored, vec!["stickers".to_string()]);
    assert_eq!(
        engine.preferences().language("u1").await.unwrap().as_deref(),
        Some("pt-BR")
    );
}

#[tokio::test]
async fn invalid_records_are_skipped() {
    let engine = online_engine(ScriptedRemote::new()).await;
    let snapshot = Snapshot::new()
        .with_store(
            "channel_follows",
            vec![
                follow("u1", "alice"),
                // another user's follow
                follow("u2", "bob"),
                json!({ "user_id": "u1" }),
                json!("carol"),
            ],
        )
        .with_store(
            "tenant_requests",
            vec![json!({ "id": "r1", "channel_username": "alice", "user_id": "u1", "status": null })],
        );

    let report = engine.import_snapshot("u1", &snapshot).await.unwrap();
    assert_eq!(report.rejected.len(), 4);
    assert_eq!(
        report
            .rejected
            .iter()
            .filter(|r| r.store == "channel_follows")
            .map(|r| r.index)
            .collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(report.imported.get("channel_follows"), Some(&1));
    assert_eq!(report.imported.get("tenant_requests"), Some(&0));
}

#[tokio::test]
async fn later_duplicates_win() {
    let engine = online_engine(ScriptedRemote::new()).await;
    let snapshot = Snapshot::new().with_store(
        "notification_preferences",
        vec![
            json!({ "user_id": "u1", "enabled": true }),
            json!({ "user_id": "u1", "enabled": false }),
        ],
    );
    let report = engine.import_snapshot("u1", &snapshot).await.unwrap();
    assert_eq!(report.imported.get("notification_preferences"), Some(&1));
    assert_eq!(
        engine.preferences().notifications_enabled("u1").await.unwrap(),
        Some(false)
    );
}

#[tokio::test]
async fn pull_fetches_snapshot_from_backend() {
    let remote = ScriptedRemote::new();
    remote.set_snapshot(snapshot());
    let engine = online_engine(remote).await;

    let report = engine.pull("u1").await.unwrap();
    assert_eq!(report.imported.len(), 2);
    assert!(engine.follows().is_following("u1", "bob").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn queued_intents_survive_import() {
    let remote = ScriptedRemote::new();
    let engine = offline_engine(remote.clone()).await;
    engine.follows().follow("u1", "carol").await.unwrap();

    let report = engine.import_snapshot("u1", &snapshot()).await.unwrap();
    assert_eq!(report.replayed, 1);

    let carol = engine
        .store()
        .get("channel_follows", &Key::from(("u1", "carol")))
        .await
        .unwrap()
        .unwrap();
    assert!(carol.pending);
    assert_eq!(
        engine.follows().followed_channels("u1").await.unwrap(),
        vec!["alice".to_string(), "bob".to_string(), "carol".to_string()]
    );

    let drained = engine.set_online(true).await.unwrap().unwrap();
    assert_eq!(drained.confirmed, 1);
    assert_eq!(remote.count("follows.follow"), 1);
}

#[tokio::test(start_paused = true)]
async fn import_rebases_rollback_onto_server_value() {
    let remote = ScriptedRemote::new();
    remote.always("follows.unfollow", Err(rejected()));
    let backend = MemoryBackend::new();
    let engine = open_engine(backend, remote, SyncConfig::default().starting_offline()).await;

    // unfollow queued before the server's view of alice arrives
    engine.follows().unfollow("u1", "alice").await.unwrap();
    engine.import_snapshot("u1", &snapshot()).await.unwrap();

    let target = MutationTarget::new("channel_follows", ("u1", "alice"));
    let queued = engine.queue().pending_for(&target).await.unwrap().unwrap();
    assert_eq!(queued.rollback_to, Some(follow("u1", "alice")));
    assert!(!engine.follows().is_following("u1", "alice").await.unwrap());

    let report = engine.set_online(true).await.unwrap().unwrap();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].previous, Some(follow("u1", "alice")));
    assert!(engine.follows().is_following("u1", "alice").await.unwrap());
}
