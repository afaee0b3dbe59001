//! Database operations for the entities table.

use sitesync_engine::{Confirmed, DomainEntity, EntityKind, EntityState};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::Pool;
use crate::error::Result;

/// A stored entity row from the database.
#[derive(Debug)]
pub struct StoredEntity {
    pub local_id: String,
    pub kind: String,
    pub server_id: Option<String>,
    pub version: i64,
    pub pending_mutation_id: Option<String>,
    pub fields: String,
    pub confirmed: Option<String>,
    pub superseded: Option<String>,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for StoredEntity {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(StoredEntity {
            local_id: row.try_get("local_id")?,
            kind: row.try_get("kind")?,
            server_id: row.try_get("server_id")?,
            version: row.try_get("version")?,
            pending_mutation_id: row.try_get("pending_mutation_id")?,
            fields: row.try_get("fields")?,
            confirmed: row.try_get("confirmed")?,
            superseded: row.try_get("superseded")?,
        })
    }
}

impl StoredEntity {
    /// Convert database row to a domain entity.
    pub fn to_entity(&self) -> Result<DomainEntity> {
        let fields: serde_json::Value = serde_json::from_str(&self.fields)?;
        let confirmed = self
            .confirmed
            .as_deref()
            .map(serde_json::from_str::<Confirmed>)
            .transpose()?;

        let state = match &self.pending_mutation_id {
            Some(pending) => EntityState::Optimistic {
                fields,
                pending_mutation_id: pending.clone(),
                confirmed,
            },
            None => EntityState::Confirmed(confirmed.unwrap_or(Confirmed {
                server_id: self.server_id.clone(),
                version: self.version as u64,
                fields,
            })),
        };

        Ok(DomainEntity {
            local_id: self.local_id.clone(),
            kind: EntityKind::parse(&self.kind)?,
            state,
            superseded: self.superseded.clone(),
        })
    }
}

/// Load every entity.
pub async fn load_entities(pool: &Pool) -> Result<Vec<DomainEntity>> {
    let rows = sqlx::query_as::<_, StoredEntity>(
        r#"
        SELECT local_id, kind, server_id, version, pending_mutation_id,
               fields, confirmed, superseded
        FROM entities
        ORDER BY local_id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(StoredEntity::to_entity).collect()
}

/// Upsert an entity (insert or replace).
pub async fn upsert_entity(
    conn: &mut SqliteConnection,
    entity: &DomainEntity,
) -> std::result::Result<(), sqlx::Error> {
    let confirmed = entity
        .confirmed()
        .and_then(|c| serde_json::to_string(c).ok());

    sqlx::query(
        r#"
        INSERT INTO entities (
            local_id, kind, server_id, version, pending_mutation_id,
            fields, confirmed, superseded
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (local_id) DO UPDATE SET
            kind = excluded.kind,
            server_id = excluded.server_id,
            version = excluded.version,
            pending_mutation_id = excluded.pending_mutation_id,
            fields = excluded.fields,
            confirmed = excluded.confirmed,
            superseded = excluded.superseded
        "#,
    )
    .bind(&entity.local_id)
    .bind(entity.kind.as_str())
    .bind(entity.server_id())
    .bind(entity.version() as i64)
    .bind(entity.pending_mutation_id())
    .bind(entity.fields().to_string())
    .bind(confirmed)
    .bind(&entity.superseded)
    .execute(conn)
    .await?;

    Ok(())
}

/// Delete an entity the server never confirmed.
pub async fn delete_entity(
    conn: &mut SqliteConnection,
    local_id: &str,
) -> std::result::Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM entities WHERE local_id = $1")
        .bind(local_id)
        .execute(conn)
        .await?;
    Ok(())
}
