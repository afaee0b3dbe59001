//! # SiteSync Engine
//!
//! Offline mutation queue and reconciliation logic for field-site clients.
//!
//! Every user action (attendance, task updates, material requests, daily
//! progress reports, chat) becomes a [`Mutation`] that is held locally until
//! the project service acknowledges it. This crate holds the pure parts of
//! that pipeline; the runtime around it lives in `sitesync-client`.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine knows nothing about files, network, or timers
//! - **Deterministic**: state only changes through explicit transitions
//! - **Testable**: pure logic, no mocks needed
//!
//! ## Core Concepts
//!
//! ### Mutations
//!
//! A mutation carries a typed [`MutationPayload`], a client-generated id from
//! [`IdempotencyKeyGenerator`] that the server uses to collapse redeliveries,
//! and a creation timestamp from the monotonic [`ClientClock`].
//!
//! ### Queue
//!
//! [`MutationQueue`] keeps mutations in creation order and owns the
//! `PENDING -> IN_FLIGHT -> ACKED | DISCARDED` lifecycle.
//!
//! ### Reconciliation
//!
//! [`ReconciliationStore`] shows the latest optimistic write for an entity
//! until its mutation is answered; after that the server wins.
//!
//! ## Quick Start
//!
//! ```rust
//! use sitesync_engine::{
//!     ChatMessage, ClientClock, IdempotencyKeyGenerator, Mutation, MutationPayload,
//!     MutationQueue, QueueLimits, ReconciliationStore, ServerEntity,
//! };
//!
//! let mut keys = IdempotencyKeyGenerator::new();
//! let mut clock = ClientClock::new();
//! let mut queue = MutationQueue::new(QueueLimits::default());
//! let mut store = ReconciliationStore::new();
//!
//! let mutation = Mutation::new(
//!     keys.next_key(),
//!     "chat-1",
//!     MutationPayload::ChatMessage(ChatMessage {
//!         channel: "site".into(),
//!         body: "Slab pour at 7am".into(),
//!     }),
//!     None,
//!     clock.stamp(1_706_745_600_000),
//! );
//!
//! store.apply_local(&mutation);
//! queue.enqueue(mutation.clone()).unwrap();
//!
//! let batch = queue.peek_batch(20);
//! let ids: Vec<_> = batch.iter().map(|m| m.id.clone()).collect();
//! queue.mark_in_flight(&ids).unwrap();
//! queue.mark_acked(&ids).unwrap();
//! store.apply_ack(&mutation, &ServerEntity::new("srv-1", 1));
//!
//! assert_eq!(queue.depth(), 0);
//! assert_eq!(store.read("chat-1").unwrap().server_id(), Some("srv-1"));
//! ```

pub mod clock;
pub mod entity;
pub mod error;
pub mod idempotency;
pub mod mutation;
pub mod protocol;
pub mod queue;
pub mod reconcile;
pub mod session;

// Re-export main types at crate root
pub use clock::ClientClock;
pub use entity::{
    attendance_entity_id, Confirmed, DomainEntity, EntityKind, EntityState, ServerEntity,
};
pub use error::Error;
pub use idempotency::IdempotencyKeyGenerator;
pub use mutation::{
    Attendance, ChatMessage, DailyProgressReport, FailureKind, MaterialRequest, Mutation,
    MutationError, MutationKind, MutationPayload, MutationStatus, TaskStatus, TaskUpdate, Urgency,
    MAX_CREW_SIZE, MAX_TEXT_LEN,
};
pub use protocol::{ItemResult, Outcome, Resolution, SyncItem, SyncRequest, SyncResponse};
pub use queue::{FailOutcome, MutationQueue, QueueLimits};
pub use reconcile::ReconciliationStore;
pub use session::{Connectivity, SyncPhase, SyncSession, SyncStatus};

/// Type aliases for clarity
pub type MutationId = String;
pub type EntityId = String;
pub type ServerId = String;
pub type ClientId = String;
pub type Version = u64;
pub type Timestamp = u64;
