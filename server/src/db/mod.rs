//! The server ledger: idempotency receipts plus current entity state.
//!
//! Two backends share one decision function: an in-memory ledger for
//! development and tests, and PostgreSQL.

mod memory;
mod records;

pub use memory::MemoryLedger;
pub use records::{Receipt, StoredEntity};

use serde_json::{Map, Value};
use sqlx::postgres::PgPoolOptions;
use sitesync_engine::{
    attendance_entity_id, ItemResult, MutationPayload, ServerEntity, SyncItem, Version,
};

use crate::error::Result;

/// Type alias for the database pool.
pub type Pool = sqlx::PgPool;

/// Where receipts and entities live.
#[derive(Debug)]
pub enum Ledger {
    Memory(MemoryLedger),
    Postgres(Pool),
}

impl Ledger {
    /// Connect to PostgreSQL and migrate, or fall back to memory.
    pub async fn connect(database_url: Option<&str>) -> Result<Self> {
        match database_url {
            Some(url) => {
                let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
                tracing::info!("Running database migrations...");
                sqlx::migrate!("./migrations").run(&pool).await?;
                Ok(Ledger::Postgres(pool))
            }
            None => {
                tracing::warn!("DATABASE_URL not set; using in-memory ledger");
                Ok(Ledger::Memory(MemoryLedger::default()))
            }
        }
    }

    /// Receipt of an already applied mutation.
    pub async fn receipt(&self, key: &str) -> Result<Option<Receipt>> {
        match self {
            Ledger::Memory(m) => Ok(m.receipt(key)),
            Ledger::Postgres(pool) => Ok(records::get_receipt(pool, key).await?),
        }
    }

    pub async fn entity(&self, entity_id: &str) -> Result<Option<StoredEntity>> {
        match self {
            Ledger::Memory(m) => Ok(m.entity(entity_id)),
            Ledger::Postgres(pool) => Ok(records::get_entity(pool, entity_id).await?),
        }
    }

    /// Whether attendance for a site day is marked present.
    pub async fn attendance_present(&self, date: &str) -> Result<bool> {
        let entity = self.entity(&attendance_entity_id(date)).await?;
        Ok(entity
            .map(|e| e.fields.get("present") == Some(&Value::Bool(true)))
            .unwrap_or(false))
    }

    /// Apply one validated mutation exactly once.
    pub async fn apply(
        &self,
        client_id: &str,
        item: &SyncItem,
        payload: &MutationPayload,
    ) -> Result<ItemResult> {
        match self {
            Ledger::Memory(m) => Ok(m.apply(client_id, item, payload)),
            Ledger::Postgres(pool) => records::apply(pool, client_id, item, payload).await,
        }
    }
}

/// Next state of the target entity, or the conflict that prevents it.
///
/// A change based on version `b` conflicts when another client moved the
/// entity past `b`. Versions written by the same client since `b` are that
/// client's own queued changes and do not conflict. A change without a base
/// version is a blind write.
pub(crate) fn next_state(
    current: Option<&StoredEntity>,
    client_id: &str,
    item: &SyncItem,
    payload: &MutationPayload,
) -> std::result::Result<StoredEntity, ItemResult> {
    if let (Some(current), Some(base)) = (current, item.base_version) {
        if current.version > base && !current.written_by(client_id, base) {
            return Err(ItemResult::conflict(
                item.idempotency_key.clone(),
                format!(
                    "{} is at version {}, change was based on {}",
                    item.entity_id, current.version, base
                ),
                ServerEntity::new(current.server_id.clone(), current.version)
                    .with_fields(current.fields.clone()),
            ));
        }
    }

    let (server_id, version, fields, writer_since): (String, Version, Value, Version) =
        match current {
            Some(c) => (
                c.server_id.clone(),
                c.version + 1,
                merge(&c.fields, &payload.fields()),
                if c.last_writer == client_id {
                    c.writer_since
                } else {
                    c.version
                },
            ),
            None => (uuid::Uuid::new_v4().to_string(), 1, payload.fields(), 0),
        };

    Ok(StoredEntity {
        entity_id: item.entity_id.clone(),
        kind: item.kind.entity_kind(),
        server_id,
        version,
        fields,
        last_writer: client_id.to_string(),
        writer_since,
    })
}

/// Shallow merge; keys in `change` win.
fn merge(base: &Value, change: &Value) -> Value {
    let mut merged = match base {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    if let Value::Object(change) = change {
        for (k, v) in change {
            merged.insert(k.clone(), v.clone());
        }
    }
    Value::Object(merged)
}
