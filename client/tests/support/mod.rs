//! Shared fixtures for client integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sitesync_client::db::{self, Pool};
use sitesync_client::{
    EngineConfig, SyncScheduler, Transport, TransportError, TransportFuture,
};
use sitesync_engine::{
    ItemResult, MutationId, ServerEntity, SyncRequest, SyncResponse, Version,
};
use tempfile::TempDir;
use tokio::time::Instant;

// ============================================================================
// Scripted transport
// ============================================================================

/// What the mock does with the next submit.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Apply per-item rules and answer
    Serve,
    /// Fail the whole request
    Fail(TransportError),
    /// Never answer
    Hang,
    /// Apply, then answer without results for these keys
    Omit(Vec<MutationId>),
    /// Crash the sending task
    Panic,
}

#[derive(Debug, Default)]
struct Ledger {
    script: VecDeque<Reply>,
    /// idempotency key -> (server id, version)
    receipts: HashMap<MutationId, (String, Version)>,
    /// entity id -> current version
    versions: HashMap<String, Version>,
    /// Times each key was applied (not merely received)
    applied: HashMap<MutationId, usize>,
    submissions: Vec<Vec<MutationId>>,
    sent_at: Vec<Instant>,
    tokens: Vec<Option<String>>,
    invalid: HashMap<String, String>,
    conflicts: HashMap<String, (String, ServerEntity)>,
    retry_once: HashSet<MutationId>,
}

/// In-process stand-in for the project service.
#[derive(Debug, Default)]
pub struct MockTransport {
    ledger: Mutex<Ledger>,
    delay: Mutex<Option<Duration>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    probes_fail: std::sync::atomic::AtomicBool,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue replies for the next submits; once exhausted every submit is served.
    pub fn script(&self, replies: impl IntoIterator<Item = Reply>) {
        self.ledger.lock().unwrap().script.extend(replies);
    }

    /// Hold every response for `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Reject every mutation on this entity as invalid.
    pub fn reject_entity(&self, entity_id: &str, reason: &str) {
        self.ledger
            .lock()
            .unwrap()
            .invalid
            .insert(entity_id.to_string(), reason.to_string());
    }

    /// Answer every mutation on this entity with a conflict.
    pub fn conflict_entity(&self, entity_id: &str, reason: &str, server: ServerEntity) {
        self.ledger
            .lock()
            .unwrap()
            .conflicts
            .insert(entity_id.to_string(), (reason.to_string(), server));
    }

    /// Refuse this key once with a retryable rejection.
    pub fn retry_once(&self, key: &str) {
        self.ledger
            .lock()
            .unwrap()
            .retry_once
            .insert(key.to_string());
    }

    pub fn submissions(&self) -> Vec<Vec<MutationId>> {
        self.ledger.lock().unwrap().submissions.clone()
    }

    /// When each submit arrived.
    pub fn sent_at(&self) -> Vec<Instant> {
        self.ledger.lock().unwrap().sent_at.clone()
    }

    pub fn tokens(&self) -> Vec<Option<String>> {
        self.ledger.lock().unwrap().tokens.clone()
    }

    /// How many times a key changed server state.
    pub fn applied(&self, key: &str) -> usize {
        self.ledger
            .lock()
            .unwrap()
            .applied
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Most submits ever outstanding at once.
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn serve(&self, request: &SyncRequest, omit: &[MutationId]) -> SyncResponse {
        let mut ledger = self.ledger.lock().unwrap();
        let mut results = Vec::new();

        for item in &request.mutations {
            let key = item.idempotency_key.clone();

            if let Some((server_id, version)) = ledger.receipts.get(&key) {
                results.push(ItemResult::duplicate(key, server_id.clone(), *version));
                continue;
            }
            if ledger.retry_once.remove(&key) {
                results.push(ItemResult::retry_later(key, "service busy"));
                continue;
            }
            if let Some(reason) = ledger.invalid.get(&item.entity_id) {
                results.push(ItemResult::rejected(key, reason.clone()));
                continue;
            }
            if let Some((reason, server)) = ledger.conflicts.get(&item.entity_id) {
                results.push(ItemResult::conflict(key, reason.clone(), server.clone()));
                continue;
            }

            let version = ledger.versions.get(&item.entity_id).copied().unwrap_or(0) + 1;
            ledger.versions.insert(item.entity_id.clone(), version);
            let server_id = format!("srv-{}", item.entity_id);
            ledger
                .receipts
                .insert(key.clone(), (server_id.clone(), version));
            *ledger.applied.entry(key.clone()).or_default() += 1;

            if !omit.contains(&key) {
                results.push(ItemResult::accepted(key, server_id, version));
            }
        }

        SyncResponse { results }
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Transport for MockTransport {
    fn submit(&self, request: SyncRequest) -> TransportFuture<'_, SyncResponse> {
        Box::pin(async move {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            let _guard = ActiveGuard(&self.active);

            let reply = {
                let mut ledger = self.ledger.lock().unwrap();
                ledger.submissions.push(request.keys());
                ledger.sent_at.push(Instant::now());
                ledger.tokens.push(request.session_token.clone());
                ledger.script.pop_front().unwrap_or(Reply::Serve)
            };

            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            match reply {
                Reply::Serve => Ok(self.serve(&request, &[])),
                Reply::Omit(keys) => Ok(self.serve(&request, &keys)),
                Reply::Fail(e) => Err(e),
                Reply::Hang => std::future::pending().await,
                Reply::Panic => panic!("transport crashed mid-batch"),
            }
        })
    }

    fn probe(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if self.probes_fail.load(Ordering::SeqCst) {
                Err(TransportError::Network("unreachable".into()))
            } else {
                Ok(())
            }
        })
    }
}

// ============================================================================
// Engine fixtures
// ============================================================================

/// Config for tests driven through `sync_once`.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        client_id: Some("field-client-1".into()),
        batch_size: 20,
        max_retries: 5,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(2_000),
        jitter: 0.0,
        tick: Duration::from_secs(3_600),
        batch_timeout: Duration::from_millis(200),
        sync_on_enqueue: false,
        ..Default::default()
    }
}

/// A database file that outlives scheduler restarts within one test.
pub struct TestDb {
    _dir: TempDir,
    pub url: String,
}

impl TestDb {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("sitesync.db").display());
        Self { _dir: dir, url }
    }

    pub async fn pool(&self) -> Pool {
        db::create_pool(&self.url).await.unwrap()
    }
}

pub async fn open(
    db: &TestDb,
    config: EngineConfig,
    transport: Arc<MockTransport>,
) -> SyncScheduler {
    let config = EngineConfig {
        database: db.url.clone(),
        ..config
    };
    SyncScheduler::open(config, transport, db.pool().await)
        .await
        .unwrap()
}
