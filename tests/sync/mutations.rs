use std::sync::{Arc, Mutex};
use std::time::Duration;

use offline_mirror::{
    ChangeCause, Key, MemoryBackend, Mutation, MutationOutcome, MutationState, MutationTarget,
    RemoteCall, RetryPolicy, SchemaError, SyncConfig, SyncError,
};
use serde_json::json;

use crate::support::{network, online_engine, open_engine, rejected, ScriptedRemote};

fn alice() -> MutationTarget {
    MutationTarget::new("channel_follows", ("u1", "alice"))
}

#[tokio::test(start_paused = true)]
async fn online_follow_is_confirmed() {
    let remote = ScriptedRemote::new();
    let engine = online_engine(remote.clone()).await;

    let outcome = engine.follows().follow("u1", "alice").await.unwrap();
    assert!(matches!(outcome, MutationOutcome::Confirmed(Some(_))));
    // settled mutations leave nothing tracked for the target
    assert_eq!(engine.controller().state(&alice()), MutationState::Idle);

    let calls = remote.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].command, "follows.follow");
    assert_eq!(
        calls[0].input,
        json!({ "user_id": "u1", "channel_username": "alice" })
    );
    let stored = engine
        .store()
        .get("channel_follows", &Key::from(("u1", "alice")))
        .await
        .unwrap()
        .unwrap();
    assert!(!stored.pending);
    assert!(engine.queue().is_empty().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn subscribers_see_optimistic_then_confirmed() {
    let remote = ScriptedRemote::new();
    remote.then("follows.follow", Err(network()));
    let engine = online_engine(remote).await;

    let causes = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&causes);
    engine
        .subscribers()
        .on("channel_follows", move |event| seen.lock().unwrap().push((event.cause, event.pending)));

    engine.follows().follow("u1", "alice").await.unwrap();
    assert_eq!(
        *causes.lock().unwrap(),
        vec![(ChangeCause::Optimistic, true), (ChangeCause::Confirmed, false)]
    );
}

#[tokio::test(start_paused = true)]
async fn failure_rolls_back_and_notifies() {
    let remote = ScriptedRemote::new();
    remote.always("follows.follow", Err(network()));
    let engine = online_engine(remote.clone()).await;

    let causes = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&causes);
    engine
        .subscribers()
        .on("channel_follows", move |event| seen.lock().unwrap().push(event.cause));

    let err = engine.follows().follow("u1", "alice").await.unwrap_err();
    let SyncError::MutationFailed(failed) = err else {
        panic!("expected MutationFailed, got {:?}", err);
    };
    assert_eq!(failed.target, alice());
    assert_eq!(failed.previous, None);
    assert_eq!(failed.attempts, 4);
    assert_eq!(remote.count("follows.follow"), 4);

    assert!(!engine.follows().is_following("u1", "alice").await.unwrap());
    assert_eq!(engine.controller().state(&alice()), MutationState::Idle);
    assert_eq!(
        *causes.lock().unwrap(),
        vec![ChangeCause::Optimistic, ChangeCause::RolledBack]
    );
}

#[tokio::test(start_paused = true)]
async fn rejection_is_not_retried() {
    let remote = ScriptedRemote::new();
    remote.always("preferences.language.set", Err(rejected()));
    let engine = online_engine(remote.clone()).await;

    let err = engine.preferences().set_language("u1", "de").await.unwrap_err();
    assert!(matches!(err, SyncError::MutationFailed(ref f) if f.attempts == 1));
    assert_eq!(remote.count("preferences.language.set"), 1);
    assert_eq!(engine.preferences().language("u1").await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn timeout_counts_as_failed_attempt() {
    let remote = ScriptedRemote::new();
    remote.then_after("locations.upsert", Duration::from_secs(60), Ok(None));
    let engine = online_engine(remote.clone()).await;

    let location = offline_mirror::UserLocation {
        user_id: "u1".into(),
        latitude: -23.55,
        longitude: -46.63,
        address: None,
    };
    let started = tokio::time::Instant::now();
    let outcome = engine.locations().save(&location).await.unwrap();
    assert!(matches!(outcome, MutationOutcome::Confirmed(_)));
    assert_eq!(remote.count("locations.upsert"), 2);
    // 10s timeout, then 1s backoff
    assert!(started.elapsed() >= Duration::from_secs(11));
}

#[tokio::test(start_paused = true)]
async fn backoff_grows_between_retries() {
    let remote = ScriptedRemote::new();
    remote
        .then("follows.follow", Err(network()))
        .then("follows.follow", Err(network()))
        .then("follows.follow", Err(network()));
    let engine = online_engine(remote.clone()).await;

    let started = tokio::time::Instant::now();
    engine.follows().follow("u1", "alice").await.unwrap();
    assert_eq!(remote.count("follows.follow"), 4);
    // 1s + 2s + 4s
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(7));
    assert!(elapsed < Duration::from_secs(8));
}

#[tokio::test(start_paused = true)]
async fn verification_confirms_once_backend_catches_up() {
    let remote = ScriptedRemote::new();
    remote
        .read_back("preferences.notifications.get", Ok(Some(json!({ "user_id": "u1", "enabled": false }))))
        .read_back("preferences.notifications.get", Ok(Some(json!({ "user_id": "u1", "enabled": true }))));
    let engine = online_engine(remote.clone()).await;

    let outcome = engine.preferences().set_notifications("u1", true).await.unwrap();
    assert!(matches!(outcome, MutationOutcome::Confirmed(_)));
    assert_eq!(remote.count("preferences.notifications.set"), 1);
    assert_eq!(remote.read_back_count(), 2);
    assert_eq!(
        engine.preferences().notifications_enabled("u1").await.unwrap(),
        Some(true)
    );
}

#[tokio::test(start_paused = true)]
async fn verification_that_keeps_disagreeing_rolls_back() {
    let remote = ScriptedRemote::new();
    remote.read_back_always(
        "preferences.notifications.get",
        Ok(Some(json!({ "user_id": "u1", "enabled": false }))),
    );
    let config = SyncConfig::default().with_retry(RetryPolicy::default().with_max_retries(1));
    let engine = open_engine(MemoryBackend::new(), remote.clone(), config).await;

    let err = engine.preferences().set_notifications("u1", true).await.unwrap_err();
    let SyncError::MutationFailed(failed) = err else {
        panic!("expected MutationFailed, got {:?}", err);
    };
    assert_eq!(failed.attempts, 2);
    assert!(failed.reason.contains("verification failed"));
    assert_eq!(remote.count("preferences.notifications.set"), 2);
    assert_eq!(remote.read_back_count(), 6);
    assert_eq!(engine.preferences().notifications_enabled("u1").await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn unavailable_read_back_trusts_acknowledged_write() {
    let remote = ScriptedRemote::new();
    remote.read_back_always("preferences.notifications.get", Err(network()));
    let engine = online_engine(remote.clone()).await;

    let outcome = engine.preferences().set_notifications("u1", false).await.unwrap();
    assert!(matches!(outcome, MutationOutcome::Confirmed(_)));
    assert_eq!(remote.count("preferences.notifications.set"), 1);
    assert_eq!(remote.read_back_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn newer_intent_supersedes_retrying_one() {
    let remote = ScriptedRemote::new();
    remote.then("follows.follow", Err(network()));
    let engine = Arc::new(online_engine(remote.clone()).await);

    let first = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.follows().follow("u1", "alice").await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    let second = engine.follows().unfollow("u1", "alice").await.unwrap();

    assert_eq!(second, MutationOutcome::Confirmed(None));
    assert_eq!(first.await.unwrap().unwrap(), MutationOutcome::Superseded);
    assert_eq!(remote.commands(), vec!["follows.follow", "follows.unfollow"]);
    assert!(!engine.follows().is_following("u1", "alice").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn superseding_failure_restores_value_before_first_intent() {
    let remote = ScriptedRemote::new();
    remote
        .always("follows.follow", Err(network()))
        .always("follows.unfollow", Err(network()));
    let engine = Arc::new(online_engine(remote).await);

    let first = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.follows().follow("u1", "alice").await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    let err = engine.follows().unfollow("u1", "alice").await.unwrap_err();

    let SyncError::MutationFailed(failed) = err else {
        panic!("expected MutationFailed, got {:?}", err);
    };
    // not the intermediate follow
    assert_eq!(failed.previous, None);
    assert_eq!(first.await.unwrap().unwrap(), MutationOutcome::Superseded);
    assert!(!engine.follows().is_following("u1", "alice").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn intent_issued_during_a_call_waits_for_it_to_land() {
    let remote = ScriptedRemote::new();
    remote.then_after("follows.follow", Duration::from_secs(5), Ok(None));
    let engine = Arc::new(online_engine(remote.clone()).await);

    let first = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.follows().follow("u1", "alice").await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    let started = tokio::time::Instant::now();
    let second = engine.follows().unfollow("u1", "alice").await.unwrap();

    assert!(matches!(second, MutationOutcome::Deferred { .. }));
    assert!(started.elapsed() >= Duration::from_millis(4900));
    assert_eq!(first.await.unwrap().unwrap(), MutationOutcome::Superseded);
    // the unfollow went out after the follow, never alongside it
    assert_eq!(remote.commands(), vec!["follows.follow", "follows.unfollow"]);
    assert_eq!(remote.max_concurrent_calls(), 1);
    assert!(!engine.follows().is_following("u1", "alice").await.unwrap());
    assert!(engine.queue().is_empty().await.unwrap());
    assert_eq!(engine.controller().state(&alice()), MutationState::Idle);
}

#[tokio::test(start_paused = true)]
async fn rapid_online_toggles_collapse_behind_the_running_call() {
    let remote = ScriptedRemote::new();
    remote.then_after("follows.follow", Duration::from_secs(5), Ok(None));
    let engine = Arc::new(online_engine(remote.clone()).await);

    let first = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.follows().follow("u1", "alice").await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.follows().unfollow("u1", "alice").await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    let third = engine.follows().follow("u1", "alice").await.unwrap();
    assert!(matches!(third, MutationOutcome::Deferred { .. }));

    let queued = engine.queue().peek_all().await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].call.command, "follows.follow");
    assert_eq!(queued[0].rollback_to, None);

    assert_eq!(first.await.unwrap().unwrap(), MutationOutcome::Superseded);
    assert!(matches!(second.await.unwrap().unwrap(), MutationOutcome::Deferred { .. }));

    // the call already in the air, then one for the collapsed intents
    assert_eq!(remote.commands(), vec!["follows.follow", "follows.follow"]);
    assert_eq!(remote.count("follows.unfollow"), 0);
    assert_eq!(remote.max_concurrent_calls(), 1);
    let alice = engine
        .store()
        .get("channel_follows", &Key::from(("u1", "alice")))
        .await
        .unwrap()
        .unwrap();
    assert!(!alice.pending);
    assert!(engine.queue().is_empty().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn going_offline_between_retries_moves_mutation_to_queue() {
    let remote = ScriptedRemote::new();
    remote.then("follows.follow", Err(network()));
    let engine = Arc::new(online_engine(remote.clone()).await);

    let follow = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.follows().follow("u1", "alice").await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    engine.set_online(false).await.unwrap();

    let outcome = follow.await.unwrap().unwrap();
    assert!(matches!(outcome, MutationOutcome::Deferred { .. }));
    assert_eq!(remote.count("follows.follow"), 1);

    let queued = engine.queue().pending_for(&alice()).await.unwrap().unwrap();
    assert_eq!(queued.rollback_to, None);
    assert_eq!(queued.attempts, 0);
    assert_eq!(queued.last_error.as_deref(), Some("network error: connection refused"));
    assert!(engine.follows().is_following("u1", "alice").await.unwrap());

    let report = engine.set_online(true).await.unwrap().unwrap();
    assert_eq!(report.confirmed, 1);
    assert_eq!(remote.count("follows.follow"), 2);
}

#[tokio::test]
async fn contract_violations_fail_fast() {
    let remote = ScriptedRemote::new();
    let engine = online_engine(remote.clone()).await;

    let activity = Mutation::put(
        "channel_activity",
        "alice",
        json!({ "channel_username": "alice", "message_count": 1 }),
        RemoteCall::new("channels.activity.set", json!({})),
    );
    assert!(matches!(
        engine.mutate(activity).await,
        Err(SyncError::Schema(SchemaError::SyncOnly(_)))
    ));

    let unknown = Mutation::delete("stickers", "s1", RemoteCall::new("stickers.delete", json!({})));
    assert!(matches!(
        engine.mutate(unknown).await,
        Err(SyncError::Schema(SchemaError::UnknownStore(_)))
    ));

    let missing = Mutation::put(
        "user_locations",
        "u1",
        json!({ "user_id": "u1", "latitude": 1.0 }),
        RemoteCall::new("locations.upsert", json!({})),
    );
    assert!(matches!(
        engine.mutate(missing).await,
        Err(SyncError::Schema(SchemaError::InvalidRecord { .. }))
    ));
    assert!(remote.calls().is_empty());
}
