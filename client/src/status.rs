//! Sync status publishing.
//!
//! Session snapshots go out over a watch channel and are only emitted when
//! they change. User-facing notices (discards, conflict overwrites, session
//! expiry) go out over a broadcast channel.

use serde::Serialize;
use sitesync_engine::{EntityId, FailureKind, MutationId, MutationKind, SyncSession};
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::WatchStream;

/// Capacity of the notice channel; slow receivers lag rather than block.
const NOTICE_CAPACITY: usize = 64;

/// Something the user should be told about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "notice", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Notice {
    /// A mutation was given up on
    #[serde(rename_all = "camelCase")]
    Discarded {
        mutation_id: MutationId,
        kind: MutationKind,
        failure: FailureKind,
        reason: String,
    },
    /// The server overwrote a local change
    #[serde(rename_all = "camelCase")]
    Superseded {
        entity_id: EntityId,
        mutation_id: MutationId,
        reason: String,
    },
    /// The session token was rejected; sync is paused
    SessionExpired,
}

/// Owner of the published [`SyncSession`].
#[derive(Debug)]
pub struct StatusPublisher {
    session: watch::Sender<SyncSession>,
    notices: broadcast::Sender<Notice>,
}

impl StatusPublisher {
    pub fn new(initial: SyncSession) -> Self {
        let (session, _) = watch::channel(initial);
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self { session, notices }
    }

    /// Replace the session; subscribers only wake if it changed.
    pub fn publish(&self, next: SyncSession) -> bool {
        self.session.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        })
    }

    /// Emit a notice. Notices without listeners are dropped.
    pub fn notify(&self, notice: Notice) {
        let _ = self.notices.send(notice);
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> SyncSession {
        self.session.borrow().clone()
    }

    /// Stream of snapshots, starting with the current one.
    pub fn subscribe(&self) -> WatchStream<SyncSession> {
        WatchStream::new(self.session.subscribe())
    }

    pub fn receiver(&self) -> watch::Receiver<SyncSession> {
        self.session.subscribe()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    pub(crate) fn notice_sender(&self) -> broadcast::Sender<Notice> {
        self.notices.clone()
    }
}
