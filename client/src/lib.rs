//! # SiteSync Client
//!
//! Offline-first runtime for field clients. Changes are recorded as durable
//! mutations in a local SQLite queue, applied optimistically to local
//! entities, and delivered to the project service in ordered batches
//! whenever connectivity allows.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use sitesync_client::{ConnectivityMonitor, EngineConfig, EngineHandle, HttpTransport};
//! use sitesync_engine::{Attendance, TaskStatus, TaskUpdate};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::from_env()?;
//! let transport = Arc::new(HttpTransport::new(&config.server_url, config.batch_timeout)?);
//! let monitor =
//!     ConnectivityMonitor::with_probe(transport.clone(), config.probe_interval, config.dwell);
//!
//! let (engine, _task) = EngineHandle::start(config, transport, monitor.receiver()).await?;
//!
//! engine
//!     .mark_attendance(Attendance {
//!         date: "2026-03-02".into(),
//!         present: true,
//!         workers: 14,
//!         absent: 2,
//!     })
//!     .await?;
//! engine
//!     .update_task("task-17", TaskUpdate { status: TaskStatus::Completed, note: None })
//!     .await?;
//!
//! println!("pending: {}", engine.session().queue_depth);
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod handle;
pub mod scheduler;
pub mod status;
pub mod transport;

pub use backoff::{Backoff, BackoffPolicy};
pub use config::{ConfigError, EngineConfig};
pub use connectivity::{ConnectivityMonitor, Debouncer};
pub use error::{ClientError, Result};
pub use handle::EngineHandle;
pub use scheduler::{Draft, SyncReport, SyncScheduler, Target, Trigger};
pub use status::{Notice, StatusPublisher};
pub use transport::{HttpTransport, Transport, TransportError, TransportFuture, TransportResult};
