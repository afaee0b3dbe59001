//! The sync scheduler.
//!
//! A single owner holds the queue, the reconciliation store and every piece
//! of delivery state. UI calls reach it as [`Command`]s, connectivity as a
//! watch channel, and it drains the queue one batch at a time:
//!
//! ```text
//!   ONLINE / tick / manual / retry timer
//!                 │
//!                 ▼
//!   peek_batch ──► mark_in_flight ──► spawn submit (with timeout)
//!                                            │
//!        ┌───────────────────────────────────┘
//!        ▼
//!   per-item: ack │ conflict │ discard │ mark_failed ──► backoff
//! ```
//!
//! Only the submit runs outside the owner, so enqueues keep flowing while a
//! batch is in flight, and there is never more than one batch outstanding.

use std::sync::Arc;
use std::time::Duration;

use sitesync_engine::{
    ClientClock, Connectivity, DomainEntity, EntityId, Error as EngineError, FailOutcome,
    FailureKind, IdempotencyKeyGenerator, Mutation, MutationError, MutationId, MutationKind,
    MutationPayload, MutationQueue, ReconciliationStore, Resolution, SyncPhase, SyncRequest,
    SyncResponse, SyncSession, Timestamp,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::config::EngineConfig;
use crate::db::{self, Changeset, Pool, StoredSession};
use crate::error::{ClientError, Result};
use crate::status::{Notice, StatusPublisher};
use crate::transport::{Transport, TransportError, TransportResult};

/// What woke the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Connectivity came back
    Online,
    /// Periodic tick
    Tick,
    /// User asked for a sync
    Manual,
    /// Backoff delay elapsed
    Retry,
    /// A mutation was just enqueued
    Enqueue,
    /// A response arrived and work remains
    Drain,
}

/// Target entity of a new mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// An entity that already has a local id
    Entity(EntityId),
    /// A new entity; its id is derived from the mutation id
    New,
}

/// A change the UI wants recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub target: Target,
    pub payload: MutationPayload,
}

/// What one batch did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SyncReport {
    pub submitted: Vec<MutationId>,
    pub acked: Vec<MutationId>,
    /// Failed transiently; back to PENDING
    pub retrying: Vec<MutationId>,
    /// Given up on (validation, or retries exhausted)
    pub discarded: Vec<MutationId>,
    /// Overwritten by newer server state
    pub conflicts: Vec<MutationId>,
    /// Outcome unknown; back to PENDING without an attempt counted
    pub reverted: Vec<MutationId>,
    pub error: Option<TransportError>,
    /// Wait before the next automatic attempt
    pub retry_in: Option<Duration>,
}

impl SyncReport {
    /// Whether a batch was sent at all.
    pub fn is_skipped(&self) -> bool {
        self.submitted.is_empty()
    }
}

/// Requests from [`crate::EngineHandle`].
pub(crate) enum Command {
    Submit {
        draft: Draft,
        reply: oneshot::Sender<Result<Mutation>>,
    },
    SyncNow {
        reply: oneshot::Sender<Result<bool>>,
    },
    Dismiss {
        ids: Vec<MutationId>,
        reply: oneshot::Sender<Result<Vec<MutationId>>>,
    },
    ResumeSession {
        token: String,
        reply: oneshot::Sender<Result<bool>>,
    },
    ClearSuperseded {
        entity_id: EntityId,
        reply: oneshot::Sender<Result<DomainEntity>>,
    },
    ReadEntity {
        entity_id: EntityId,
        reply: oneshot::Sender<Option<DomainEntity>>,
    },
    Entities {
        reply: oneshot::Sender<Vec<DomainEntity>>,
    },
    Mutations {
        reply: oneshot::Sender<Vec<Mutation>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// The batch currently awaiting a response.
struct InFlight {
    batch: Vec<Mutation>,
    task: JoinHandle<TransportResult<SyncResponse>>,
}

/// Owner of the queue, the store and delivery state.
pub struct SyncScheduler {
    config: EngineConfig,
    client_id: String,
    pool: Pool,
    transport: Arc<dyn Transport>,
    queue: MutationQueue,
    store: ReconciliationStore,
    clock: ClientClock,
    keys: IdempotencyKeyGenerator,
    backoff: Backoff,
    publisher: StatusPublisher,
    connectivity: Connectivity,
    in_flight: Option<InFlight>,
    retry_at: Option<Instant>,
    paused: bool,
    session_token: Option<String>,
    last_synced_at: Option<Timestamp>,
}

impl SyncScheduler {
    /// Open the local database and restore queue and entity state.
    ///
    /// Mutations left IN_FLIGHT by a previous run go back to PENDING.
    pub async fn open(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        pool: Pool,
    ) -> Result<Self> {
        db::run_migrations(&pool).await?;

        let stored = db::load_session(&pool).await?;
        let client_id = config
            .client_id
            .clone()
            .or_else(|| stored.as_ref().map(|s| s.client_id.clone()))
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mutations = db::load_mutations(&pool).await?;
        let newest = mutations.iter().map(|m| m.created_at).max().unwrap_or(0);
        let (queue, reverted) = MutationQueue::restore(config.queue_limits(), mutations);
        let store = ReconciliationStore::restore(db::load_entities(&pool).await?);

        let clock_mark = stored.as_ref().map(|s| s.clock_mark).unwrap_or(0).max(newest);
        let last_synced_at = stored.as_ref().and_then(|s| s.last_synced_at);

        if !reverted.is_empty() {
            info!(
                "Restored {} in-flight mutations to pending after restart",
                reverted.len()
            );
        }

        let publisher = StatusPublisher::new(SyncSession {
            last_synced_at,
            queue_depth: queue.depth(),
            ..Default::default()
        });

        let scheduler = Self {
            backoff: Backoff::new(config.backoff_policy()),
            session_token: config.session_token.clone(),
            config,
            client_id,
            pool,
            transport,
            queue,
            store,
            clock: ClientClock::resume(clock_mark),
            keys: IdempotencyKeyGenerator::new(),
            publisher,
            connectivity: Connectivity::Offline,
            in_flight: None,
            retry_at: None,
            paused: false,
            last_synced_at,
        };

        let mut changes = Changeset {
            session: Some(scheduler.stored_session()),
            ..Default::default()
        };
        changes.updated = scheduler.snapshot_of(&reverted);
        db::commit(&scheduler.pool, &changes).await?;

        scheduler.publish();
        Ok(scheduler)
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn publisher(&self) -> &StatusPublisher {
        &self.publisher
    }

    /// Current session snapshot.
    pub fn session(&self) -> SyncSession {
        self.publisher.snapshot()
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    pub fn store(&self) -> &ReconciliationStore {
        &self.store
    }

    /// Record a new mutation: validate, persist, apply optimistically.
    pub async fn submit(&mut self, draft: Draft) -> Result<Mutation> {
        if self.paused {
            return Err(ClientError::SessionExpired);
        }

        draft.payload.validate()?;
        if let MutationPayload::Dpr(report) = &draft.payload {
            if !self.store.attendance_present(&report.date) {
                return Err(EngineError::MissingAttendance(report.date.clone()).into());
            }
        }

        let id = self.keys.next_key();
        let entity_id = match draft.target {
            Target::Entity(entity_id) => entity_id,
            Target::New => format!("{}-{}", entity_prefix(draft.payload.kind()), id),
        };
        let base_version = self.store.base_version(&entity_id);
        let created_at = self.clock.stamp(now_ms());
        let mutation = Mutation::new(id, entity_id, draft.payload, base_version, created_at);

        self.queue.check(&mutation)?;

        let mut session = self.stored_session();
        session.queue_depth += 1;
        let changes = Changeset {
            inserted: vec![mutation.clone()],
            upserted_entities: vec![self.store.preview_local(&mutation)],
            session: Some(session),
            ..Default::default()
        };
        db::commit(&self.pool, &changes).await?;

        self.queue.enqueue(mutation.clone())?;
        self.store.apply_local(&mutation);
        debug!("Enqueued {} {}", mutation.kind(), mutation.id);
        self.publish();

        if self.config.sync_on_enqueue {
            if let Err(e) = self.activate(Trigger::Enqueue).await {
                warn!("Failed to start batch after enqueue: {}", e);
            }
        }

        Ok(mutation)
    }

    /// Apply a debounced connectivity change.
    pub async fn set_connectivity(&mut self, connectivity: Connectivity) -> Result<bool> {
        let previous = self.connectivity;
        self.connectivity = connectivity;

        if previous == connectivity {
            return Ok(false);
        }

        info!("Connectivity {} -> {}", previous, connectivity);
        match connectivity {
            Connectivity::Online => {
                // Fresh ONLINE starts over at the base delay
                self.backoff.reset();
                self.retry_at = None;
                self.publish();
                self.activate(Trigger::Online).await
            }
            Connectivity::Offline => {
                self.publish();
                Ok(false)
            }
        }
    }

    /// Send one batch and process its response.
    ///
    /// Acts as a manual trigger: skips any pending backoff wait. If a batch
    /// is already in flight, waits for that one instead.
    pub async fn sync_once(&mut self) -> Result<SyncReport> {
        if self.in_flight.is_none() && !self.activate(Trigger::Manual).await? {
            return Ok(SyncReport::default());
        }
        let joined = wait_batch(&mut self.in_flight).await;
        self.finish_batch(joined).await
    }

    /// Remove terminal mutations the UI has shown.
    pub async fn dismiss(&mut self, ids: &[MutationId]) -> Result<Vec<MutationId>> {
        let removed = self.queue.dismiss(ids);
        let changes = Changeset {
            removed: removed.clone(),
            ..Default::default()
        };
        db::commit(&self.pool, &changes).await?;
        Ok(removed)
    }

    /// Accept a renewed session token and unpause.
    pub async fn resume_session(&mut self, token: String) -> Result<bool> {
        self.session_token = Some(token);
        if self.paused {
            info!("Session renewed, resuming sync");
        }
        self.paused = false;
        self.publish();
        self.activate(Trigger::Manual).await
    }

    /// Clear the superseded flag once the user has seen the overwrite.
    pub async fn clear_superseded(&mut self, entity_id: &str) -> Result<DomainEntity> {
        let entity = self.store.clear_superseded(entity_id)?.clone();
        let changes = Changeset {
            upserted_entities: vec![entity.clone()],
            ..Default::default()
        };
        db::commit(&self.pool, &changes).await?;
        Ok(entity)
    }

    /// Drive the scheduler until shutdown or until every handle is dropped.
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut connectivity: watch::Receiver<Connectivity>,
    ) {
        let initial = *connectivity.borrow_and_update();
        log_err("connectivity", self.set_connectivity(initial).await);

        let mut tick = tokio::time::interval(self.config.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        tick.tick().await;

        let mut watching = true;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle(command).await,
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                changed = connectivity.changed(), if watching => match changed {
                    Ok(()) => {
                        let state = *connectivity.borrow_and_update();
                        log_err("connectivity", self.set_connectivity(state).await);
                    }
                    Err(_) => {
                        warn!("Connectivity source closed; staying {}", self.connectivity);
                        watching = false;
                    }
                },
                _ = tick.tick() => {
                    if self.queue.has_pending() {
                        log_err("tick", self.activate(Trigger::Tick).await);
                    }
                }
                _ = wait_retry(self.retry_at) => {
                    self.retry_at = None;
                    self.publish();
                    log_err("retry", self.activate(Trigger::Retry).await);
                }
                joined = wait_batch(&mut self.in_flight) => {
                    match self.finish_batch(joined).await {
                        Ok(report) => debug!(
                            "Batch done: {} acked, {} retrying, {} discarded, {} conflicts",
                            report.acked.len(),
                            report.retrying.len(),
                            report.discarded.len(),
                            report.conflicts.len()
                        ),
                        Err(e) => error!("Failed to record batch outcome: {}", e),
                    }
                    log_err("drain", self.activate(Trigger::Drain).await);
                }
            }
        }

        debug!("Sync scheduler stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Submit { draft, reply } => {
                let _ = reply.send(self.submit(draft).await);
            }
            Command::SyncNow { reply } => {
                let _ = reply.send(self.activate(Trigger::Manual).await);
            }
            Command::Dismiss { ids, reply } => {
                let _ = reply.send(self.dismiss(&ids).await);
            }
            Command::ResumeSession { token, reply } => {
                let _ = reply.send(self.resume_session(token).await);
            }
            Command::ClearSuperseded { entity_id, reply } => {
                let _ = reply.send(self.clear_superseded(&entity_id).await);
            }
            Command::ReadEntity { entity_id, reply } => {
                let _ = reply.send(self.store.read(&entity_id).cloned());
            }
            Command::Entities { reply } => {
                let _ = reply.send(self.store.iter().cloned().collect());
            }
            Command::Mutations { reply } => {
                let _ = reply.send(self.queue.iter().cloned().collect());
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    /// Start a batch if the trigger allows it. Returns whether one started.
    async fn activate(&mut self, trigger: Trigger) -> Result<bool> {
        if self.paused || self.connectivity == Connectivity::Offline || self.in_flight.is_some() {
            return Ok(false);
        }

        match trigger {
            Trigger::Tick | Trigger::Enqueue | Trigger::Drain if self.retry_at.is_some() => {
                return Ok(false);
            }
            Trigger::Manual | Trigger::Online => self.retry_at = None,
            _ => {}
        }

        let batch = self.queue.peek_batch(self.config.batch_size);
        if batch.is_empty() {
            self.publish();
            return Ok(false);
        }

        let ids: Vec<MutationId> = batch.iter().map(|m| m.id.clone()).collect();
        self.queue.mark_in_flight(&ids)?;

        let changes = Changeset {
            updated: self.snapshot_of(&ids),
            ..Default::default()
        };
        if let Err(e) = db::commit(&self.pool, &changes).await {
            self.queue.revert_in_flight();
            return Err(e.into());
        }

        info!("Sending batch of {} mutations ({:?})", ids.len(), trigger);

        let request = SyncRequest::new(self.client_id.clone(), &batch)
            .with_token(self.session_token.clone());
        let transport = Arc::clone(&self.transport);
        let deadline = self.config.batch_timeout;

        let task = tokio::spawn(async move {
            match tokio::time::timeout(deadline, transport.submit(request)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout),
            }
        });

        self.in_flight = Some(InFlight { batch, task });
        self.publish();
        Ok(true)
    }

    /// Apply the outcome of the in-flight batch.
    async fn finish_batch(
        &mut self,
        joined: std::result::Result<TransportResult<SyncResponse>, JoinError>,
    ) -> Result<SyncReport> {
        let Some(flight) = self.in_flight.take() else {
            return Ok(SyncReport::default());
        };

        let ids: Vec<MutationId> = flight.batch.iter().map(|m| m.id.clone()).collect();
        let mut report = SyncReport {
            submitted: ids.clone(),
            ..Default::default()
        };
        let mut changes = Changeset::default();

        match joined {
            Ok(Ok(response)) => {
                self.apply_response(&flight.batch, &response, &mut report, &mut changes);
            }
            Ok(Err(TransportError::Unauthorized)) => {
                report.reverted = self.queue.revert_in_flight();
                report.error = Some(TransportError::Unauthorized);
                self.paused = true;
                self.retry_at = None;
                error!("Session rejected by server; sync paused until the session is renewed");
                self.publisher.notify(Notice::SessionExpired);
            }
            Ok(Err(e)) if self.connectivity == Connectivity::Offline => {
                // Went offline mid-flight: the outcome is unknown, not failed
                report.reverted = self.queue.revert_in_flight();
                info!(
                    "Batch ended while offline ({}); {} mutations back to pending",
                    e,
                    report.reverted.len()
                );
                report.error = Some(e);
            }
            Ok(Err(e)) => {
                for m in &flight.batch {
                    self.fail_transient(m, &e.to_string(), &mut report, &mut changes);
                }
                let delay = self.schedule_retry();
                warn!("Batch failed ({}); retrying in {:?}", e, delay);
                report.retry_in = Some(delay);
                report.error = Some(e);
            }
            Err(e) => {
                report.reverted = self.queue.revert_in_flight();
                let delay = self.schedule_retry();
                warn!("Batch task ended abnormally ({}); retrying in {:?}", e, delay);
                report.retry_in = Some(delay);
            }
        }

        changes.updated.extend(self.snapshot_of(&ids));
        changes.session = Some(self.stored_session());
        let committed = db::commit(&self.pool, &changes).await;

        self.publish();
        committed?;
        Ok(report)
    }

    fn apply_response(
        &mut self,
        batch: &[Mutation],
        response: &SyncResponse,
        report: &mut SyncReport,
        changes: &mut Changeset,
    ) {
        let mut transient = false;

        for m in batch {
            let resolution = match response.get(&m.id) {
                Some(result) => result.resolution(),
                None => Resolution::Retry("no result returned for mutation".to_string()),
            };

            match resolution {
                Resolution::Acked(server) => {
                    if let Err(e) = self.queue.mark_acked(std::slice::from_ref(&m.id)) {
                        warn!("Cannot ack {}: {}", m.id, e);
                        continue;
                    }
                    let entity = self.store.apply_ack(m, &server);
                    changes.entity(&m.entity_id, Some(entity));
                    report.acked.push(m.id.clone());
                }
                Resolution::Conflict { reason, entity } => {
                    if let Err(e) = self.queue.discard(&m.id, MutationError::conflict(&reason)) {
                        warn!("Cannot discard {}: {}", m.id, e);
                        continue;
                    }
                    let merged = self.store.apply_conflict(m, entity.as_ref(), &reason);
                    changes.entity(&m.entity_id, merged);
                    warn!("Conflict on {} ({}): {}", m.entity_id, m.id, reason);
                    self.publisher.notify(Notice::Superseded {
                        entity_id: m.entity_id.clone(),
                        mutation_id: m.id.clone(),
                        reason,
                    });
                    report.conflicts.push(m.id.clone());
                }
                Resolution::Invalid(reason) => {
                    if let Err(e) = self.queue.discard(&m.id, MutationError::validation(&reason)) {
                        warn!("Cannot discard {}: {}", m.id, e);
                        continue;
                    }
                    self.surface_discard(m, FailureKind::Validation, reason, changes);
                    report.discarded.push(m.id.clone());
                }
                Resolution::Retry(reason) => {
                    transient = true;
                    self.fail_transient(m, &reason, report, changes);
                }
            }
        }

        self.last_synced_at = Some(now_ms());

        if transient {
            let delay = self.schedule_retry();
            warn!("Some mutations were not applied; retrying in {:?}", delay);
            report.retry_in = Some(delay);
        } else {
            self.backoff.reset();
            self.retry_at = None;
        }
    }

    fn fail_transient(
        &mut self,
        m: &Mutation,
        reason: &str,
        report: &mut SyncReport,
        changes: &mut Changeset,
    ) {
        match self.queue.mark_failed(&m.id, MutationError::transient(reason)) {
            Ok(FailOutcome::Retry { attempts }) => {
                debug!("{} failed (attempt {}): {}", m.id, attempts, reason);
                report.retrying.push(m.id.clone());
            }
            Ok(FailOutcome::Discarded { attempts }) => {
                self.surface_discard(
                    m,
                    FailureKind::Transient,
                    format!("gave up after {} attempts: {}", attempts, reason),
                    changes,
                );
                report.discarded.push(m.id.clone());
            }
            Err(e) => warn!("Cannot record failure for {}: {}", m.id, e),
        }
    }

    fn surface_discard(
        &mut self,
        m: &Mutation,
        failure: FailureKind,
        reason: String,
        changes: &mut Changeset,
    ) {
        let remaining = self.store.apply_discard(m);
        changes.entity(&m.entity_id, remaining);
        warn!("Discarded {} {}: {}", m.kind(), m.id, reason);
        self.publisher.notify(Notice::Discarded {
            mutation_id: m.id.clone(),
            kind: m.kind(),
            failure,
            reason,
        });
    }

    fn schedule_retry(&mut self) -> Duration {
        let delay = self.backoff.next_delay();
        self.retry_at = Some(Instant::now() + delay);
        delay
    }

    fn shutdown(&mut self) {
        if let Some(flight) = self.in_flight.take() {
            // Rows stay IN_FLIGHT on disk and revert on the next open
            flight.task.abort();
            info!("Abandoned in-flight batch of {}", flight.batch.len());
        }
    }

    fn publish(&self) {
        let retry_delay_ms = self
            .retry_at
            .and(self.backoff.nominal())
            .map(|d| d.as_millis() as u64);

        self.publisher.publish(SyncSession {
            connectivity: self.connectivity,
            phase: if self.in_flight.is_some() {
                SyncPhase::Syncing
            } else {
                SyncPhase::Idle
            },
            last_synced_at: self.last_synced_at,
            queue_depth: self.queue.depth(),
            paused: self.paused,
            retry_delay_ms,
        });
    }

    fn stored_session(&self) -> StoredSession {
        StoredSession {
            client_id: self.client_id.clone(),
            last_synced_at: self.last_synced_at,
            queue_depth: self.queue.depth(),
            clock_mark: self.clock.last(),
        }
    }

    fn snapshot_of(&self, ids: &[MutationId]) -> Vec<Mutation> {
        ids.iter()
            .filter_map(|id| self.queue.get(id).cloned())
            .collect()
    }
}

fn entity_prefix(kind: MutationKind) -> &'static str {
    match kind {
        MutationKind::Attendance => "attendance",
        MutationKind::TaskUpdate => "task",
        MutationKind::MaterialRequest => "material",
        MutationKind::Dpr => "dpr",
        MutationKind::ChatMessage => "chat",
    }
}

fn now_ms() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

fn log_err(context: &str, result: Result<bool>) {
    if let Err(e) = result {
        error!("Sync {} failed: {}", context, e);
    }
}

async fn wait_batch(
    in_flight: &mut Option<InFlight>,
) -> std::result::Result<TransportResult<SyncResponse>, JoinError> {
    match in_flight {
        Some(flight) => (&mut flight.task).await,
        None => std::future::pending().await,
    }
}

async fn wait_retry(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
