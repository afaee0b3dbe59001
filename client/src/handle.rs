//! Cloneable front door to a running scheduler.

use std::sync::Arc;

use sitesync_engine::{
    attendance_entity_id, Attendance, ChatMessage, Connectivity, DailyProgressReport,
    DomainEntity, EntityId, MaterialRequest, Mutation, MutationId, MutationPayload, SyncSession,
    TaskUpdate,
};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;

use crate::config::EngineConfig;
use crate::db;
use crate::error::{ClientError, Result};
use crate::scheduler::{Command, Draft, SyncScheduler, Target};
use crate::status::Notice;
use crate::transport::Transport;

const COMMAND_CAPACITY: usize = 64;

/// Handle used by UI code. Every call is answered by the scheduler task.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    session: watch::Receiver<SyncSession>,
    notices: broadcast::Sender<Notice>,
}

impl EngineHandle {
    /// Open local storage and spawn the scheduler.
    pub async fn start(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        connectivity: watch::Receiver<Connectivity>,
    ) -> Result<(Self, JoinHandle<()>)> {
        let pool = db::create_pool(&config.database).await?;
        let scheduler = SyncScheduler::open(config, transport, pool).await?;
        Ok(Self::spawn(scheduler, connectivity))
    }

    /// Spawn an already opened scheduler.
    pub fn spawn(
        scheduler: SyncScheduler,
        connectivity: watch::Receiver<Connectivity>,
    ) -> (Self, JoinHandle<()>) {
        let (commands, rx) = mpsc::channel(COMMAND_CAPACITY);
        let handle = Self {
            commands,
            session: scheduler.publisher().receiver(),
            notices: scheduler.publisher().notice_sender(),
        };
        let task = tokio::spawn(scheduler.run(rx, connectivity));
        (handle, task)
    }

    // ------------------------------------------------------------------
    // Domain actions
    // ------------------------------------------------------------------

    /// Mark attendance for a site day. One record per day; re-marking updates it.
    pub async fn mark_attendance(&self, attendance: Attendance) -> Result<Mutation> {
        let target = Target::Entity(attendance_entity_id(&attendance.date));
        self.submit(target, MutationPayload::Attendance(attendance)).await
    }

    pub async fn update_task(
        &self,
        task_id: impl Into<EntityId>,
        update: TaskUpdate,
    ) -> Result<Mutation> {
        self.submit(Target::Entity(task_id.into()), MutationPayload::TaskUpdate(update))
            .await
    }

    pub async fn request_material(&self, request: MaterialRequest) -> Result<Mutation> {
        self.submit(Target::New, MutationPayload::MaterialRequest(request))
            .await
    }

    /// Submit a daily progress report. Attendance for its date must be
    /// marked present first.
    pub async fn submit_dpr(&self, report: DailyProgressReport) -> Result<Mutation> {
        self.submit(Target::New, MutationPayload::Dpr(report)).await
    }

    pub async fn send_chat_message(&self, message: ChatMessage) -> Result<Mutation> {
        self.submit(Target::New, MutationPayload::ChatMessage(message))
            .await
    }

    /// Enqueue an arbitrary payload against a target.
    pub async fn submit(&self, target: Target, payload: MutationPayload) -> Result<Mutation> {
        let draft = Draft { target, payload };
        self.call(|reply| Command::Submit { draft, reply }).await?
    }

    // ------------------------------------------------------------------
    // Sync control
    // ------------------------------------------------------------------

    /// Start a batch now, skipping any backoff wait. Returns whether one started.
    pub async fn sync_now(&self) -> Result<bool> {
        self.call(|reply| Command::SyncNow { reply }).await?
    }

    /// Remove terminal mutations from the queue.
    pub async fn dismiss(&self, ids: Vec<MutationId>) -> Result<Vec<MutationId>> {
        self.call(|reply| Command::Dismiss { ids, reply }).await?
    }

    /// Supply a renewed session token after [`Notice::SessionExpired`].
    pub async fn resume_session(&self, token: impl Into<String>) -> Result<bool> {
        let token = token.into();
        self.call(|reply| Command::ResumeSession { token, reply })
            .await?
    }

    pub async fn clear_superseded(&self, entity_id: impl Into<EntityId>) -> Result<DomainEntity> {
        let entity_id = entity_id.into();
        self.call(|reply| Command::ClearSuperseded { entity_id, reply })
            .await?
    }

    /// Stop the scheduler. Queued work stays on disk.
    pub async fn shutdown(&self) -> Result<()> {
        self.call(|reply| Command::Shutdown { reply }).await
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn read_entity(
        &self,
        entity_id: impl Into<EntityId>,
    ) -> Result<Option<DomainEntity>> {
        let entity_id = entity_id.into();
        self.call(|reply| Command::ReadEntity { entity_id, reply })
            .await
    }

    pub async fn entities(&self) -> Result<Vec<DomainEntity>> {
        self.call(|reply| Command::Entities { reply }).await
    }

    /// Every queued mutation, including terminal ones not yet dismissed.
    pub async fn mutations(&self) -> Result<Vec<Mutation>> {
        self.call(|reply| Command::Mutations { reply }).await
    }

    /// Latest session snapshot.
    pub fn session(&self) -> SyncSession {
        self.session.borrow().clone()
    }

    /// Stream of session snapshots, starting with the current one.
    pub fn subscribe(&self) -> WatchStream<SyncSession> {
        WatchStream::new(self.session.clone())
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    async fn call<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)
    }
}
