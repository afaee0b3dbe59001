//! SiteSync Server - reference project service for field clients.
//!
//! Implements the Sync API: `POST /sync` applies a batch of mutations,
//! collapsing redeliveries by idempotency key, rejecting invalid payloads
//! and reporting version conflicts with the current server state.
//! `GET /health` answers reachability probes.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod routes;

pub use config::Config;
pub use db::Ledger;
pub use error::AppError;
pub use routes::app;

use std::sync::Arc;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Ledger>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(ledger: Ledger, config: Config) -> Self {
        Self {
            ledger: Arc::new(ledger),
            config: Arc::new(config),
        }
    }

    /// In-memory ledger with the given config.
    pub fn in_memory(config: Config) -> Self {
        Self::new(Ledger::Memory(db::MemoryLedger::default()), config)
    }
}
