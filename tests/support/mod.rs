//! Shared fixtures: a scripted backend double and engine constructors.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use offline_mirror::{
    MemoryBackend, RemoteApi, RemoteCall, RemoteError, SchemaRegistry, Snapshot, SyncConfig,
    SyncEngine, VerifyRead,
};
use serde_json::{json, Value};

pub type Outcome = Result<Option<Value>, RemoteError>;

pub fn network() -> RemoteError {
    RemoteError::Network("connection refused".into())
}

pub fn rejected() -> RemoteError {
    RemoteError::Rejected {
        status: 422,
        message: "not allowed".into(),
    }
}

struct Step {
    delay: Duration,
    outcome: Outcome,
}

#[derive(Default)]
struct Script {
    steps: HashMap<String, VecDeque<Step>>,
    fallback: HashMap<String, Outcome>,
    read_backs: HashMap<String, VecDeque<Outcome>>,
    read_back_fallback: HashMap<String, Outcome>,
    calls: Vec<RemoteCall>,
    read_back_calls: Vec<String>,
    snapshot: Option<Snapshot>,
    in_the_air: usize,
    most_in_the_air: usize,
}

/// Counts a call as in the air until dropped, even if the caller gives up
/// on it.
struct InTheAir(Arc<Mutex<Script>>);

impl Drop for InTheAir {
    fn drop(&mut self) {
        self.0.lock().unwrap().in_the_air -= 1;
    }
}

/// Backend double answering each command from a script.
///
/// Scripted steps are consumed in order; once a command's steps run out its
/// fallback (`always`) answers, and without one the call succeeds with no
/// canonical record. Clones share the script and the call log.
#[derive(Clone, Default)]
pub struct ScriptedRemote {
    script: Arc<Mutex<Script>>,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(&self, command: &str, outcome: Outcome) -> &Self {
        self.then_after(command, Duration::ZERO, outcome)
    }

    pub fn then_after(&self, command: &str, delay: Duration, outcome: Outcome) -> &Self {
        self.lock()
            .steps
            .entry(command.to_string())
            .or_default()
            .push_back(Step { delay, outcome });
        self
    }

    pub fn always(&self, command: &str, outcome: Outcome) -> &Self {
        self.lock().fallback.insert(command.to_string(), outcome);
        self
    }

    pub fn read_back(&self, command: &str, outcome: Outcome) -> &Self {
        self.lock()
            .read_backs
            .entry(command.to_string())
            .or_default()
            .push_back(outcome);
        self
    }

    pub fn read_back_always(&self, command: &str, outcome: Outcome) -> &Self {
        self.lock()
            .read_back_fallback
            .insert(command.to_string(), outcome);
        self
    }

    pub fn set_snapshot(&self, snapshot: Snapshot) {
        self.lock().snapshot = Some(snapshot);
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.lock().calls.iter().map(|c| c.command.clone()).collect()
    }

    pub fn count(&self, command: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.command == command)
            .count()
    }

    /// Most `execute` calls that were ever running at the same time.
    pub fn max_concurrent_calls(&self) -> usize {
        self.lock().most_in_the_air
    }

    pub fn read_back_count(&self) -> usize {
        self.lock().read_back_calls.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }
}

#[async_trait]
impl RemoteApi for ScriptedRemote {
    async fn execute(&self, call: &RemoteCall) -> Result<Option<Value>, RemoteError> {
        let (delay, outcome) = {
            let mut script = self.lock();
            script.calls.push(call.clone());
            script.in_the_air += 1;
            script.most_in_the_air = script.most_in_the_air.max(script.in_the_air);
            match script.steps.get_mut(&call.command).and_then(VecDeque::pop_front) {
                Some(step) => (step.delay, step.outcome),
                None => (
                    Duration::ZERO,
                    script.fallback.get(&call.command).cloned().unwrap_or(Ok(None)),
                ),
            }
        };
        let _call = InTheAir(Arc::clone(&self.script));
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        outcome
    }

    async fn read_back(&self, verify: &VerifyRead, _input: &Value) -> Result<Option<Value>, RemoteError> {
        let mut script = self.lock();
        script.read_back_calls.push(verify.command.clone());
        match script.read_backs.get_mut(&verify.command).and_then(VecDeque::pop_front) {
            Some(outcome) => outcome,
            None => script
                .read_back_fallback
                .get(&verify.command)
                .cloned()
                .unwrap_or_else(|| Err(RemoteError::Unsupported(verify.command.clone()))),
        }
    }

    async fn fetch_snapshot(&self, _user_id: &str) -> Result<Snapshot, RemoteError> {
        self.lock()
            .snapshot
            .clone()
            .ok_or_else(|| RemoteError::Unsupported("snapshot".into()))
    }
}

pub async fn open_engine(
    backend: MemoryBackend,
    remote: ScriptedRemote,
    config: SyncConfig,
) -> SyncEngine<ScriptedRemote> {
    SyncEngine::open(backend, SchemaRegistry::social(), remote, config)
        .await
        .unwrap()
}

pub async fn online_engine(remote: ScriptedRemote) -> SyncEngine<ScriptedRemote> {
    open_engine(MemoryBackend::new(), remote, SyncConfig::default()).await
}

pub async fn offline_engine(remote: ScriptedRemote) -> SyncEngine<ScriptedRemote> {
    open_engine(MemoryBackend::new(), remote, SyncConfig::default().starting_offline()).await
}

pub fn follow(user_id: &str, channel: &str) -> Value {
    json!({ "user_id": user_id, "channel_username": channel })
}
