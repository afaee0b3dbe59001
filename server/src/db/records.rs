//! PostgreSQL storage for receipts and entities.

use serde::Serialize;
use sitesync_engine::{EntityKind, ItemResult, MutationPayload, SyncItem, Version};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};

use crate::error::{AppError, Result};

/// Proof that a mutation was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub server_id: String,
    pub version: Version,
}

/// Current server state of an entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEntity {
    pub entity_id: String,
    pub kind: EntityKind,
    pub server_id: String,
    pub version: Version,
    pub fields: serde_json::Value,
    /// Client that wrote the current version
    pub last_writer: String,
    /// Version that client's run of consecutive writes started from
    #[serde(skip)]
    pub writer_since: Version,
}

impl StoredEntity {
    /// Whether every version after `base` was written by `client_id`.
    pub fn written_by(&self, client_id: &str, base: Version) -> bool {
        self.last_writer == client_id && base >= self.writer_since
    }
}

impl<'r> sqlx::FromRow<'r, PgRow> for Receipt {
    fn from_row(row: &'r PgRow) -> std::result::Result<Self, sqlx::Error> {
        let version: i64 = row.try_get("version")?;
        Ok(Receipt {
            server_id: row.try_get("server_id")?,
            version: version as Version,
        })
    }
}

impl<'r> sqlx::FromRow<'r, PgRow> for StoredEntity {
    fn from_row(row: &'r PgRow) -> std::result::Result<Self, sqlx::Error> {
        let kind: String = row.try_get("kind")?;
        let version: i64 = row.try_get("version")?;
        let writer_since: i64 = row.try_get("writer_since")?;
        Ok(StoredEntity {
            entity_id: row.try_get("entity_id")?,
            kind: EntityKind::parse(&kind).map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
            server_id: row.try_get("server_id")?,
            version: version as Version,
            fields: row.try_get("fields")?,
            last_writer: row.try_get("last_writer")?,
            writer_since: writer_since as Version,
        })
    }
}

/// Get the receipt for an idempotency key.
pub async fn get_receipt(
    pool: &PgPool,
    key: &str,
) -> std::result::Result<Option<Receipt>, sqlx::Error> {
    sqlx::query_as::<_, Receipt>(
        "SELECT server_id, version FROM receipts WHERE idempotency_key = $1",
    )
    .bind(key)
    .fetch_optional(pool)
    .await
}

/// Get an entity by its client-assigned id.
pub async fn get_entity(
    pool: &PgPool,
    entity_id: &str,
) -> std::result::Result<Option<StoredEntity>, sqlx::Error> {
    sqlx::query_as::<_, StoredEntity>(
        "SELECT entity_id, kind, server_id, version, fields, last_writer, writer_since \
         FROM entities WHERE entity_id = $1",
    )
    .bind(entity_id)
    .fetch_optional(pool)
    .await
}

/// Apply a mutation in one transaction.
///
/// The entity row is locked first; the receipt insert then serializes
/// concurrent deliveries of the same key.
pub async fn apply(
    pool: &PgPool,
    client_id: &str,
    item: &SyncItem,
    payload: &MutationPayload,
) -> Result<ItemResult> {
    let key = &item.idempotency_key;
    let mut tx = pool.begin().await?;

    if let Some(r) = receipt_in(&mut tx, key).await? {
        return Ok(ItemResult::duplicate(key.clone(), r.server_id, r.version));
    }

    let current = sqlx::query_as::<_, StoredEntity>(
        r#"
        SELECT entity_id, kind, server_id, version, fields, last_writer, writer_since
        FROM entities
        WHERE entity_id = $1
        FOR UPDATE
        "#,
    )
    .bind(&item.entity_id)
    .fetch_optional(&mut *tx)
    .await?;

    let next = match super::next_state(current.as_ref(), client_id, item, payload) {
        Ok(next) => next,
        Err(conflict) => return Ok(conflict),
    };

    let inserted = sqlx::query(
        r#"
        INSERT INTO receipts
            (idempotency_key, client_id, entity_id, server_id, version, received_at)
        VALUES ($1, $2, $3, $4, $5, NOW())
        "#,
    )
    .bind(key)
    .bind(client_id)
    .bind(&next.entity_id)
    .bind(&next.server_id)
    .bind(next.version as i64)
    .execute(&mut *tx)
    .await;

    if let Err(e) = inserted {
        if is_unique_violation(&e) {
            // Lost the race to a concurrent delivery of the same key
            drop(tx);
            return match get_receipt(pool, key).await? {
                Some(r) => Ok(ItemResult::duplicate(key.clone(), r.server_id, r.version)),
                None => Err(AppError::Inconsistent(format!("receipt for {} vanished", key))),
            };
        }
        return Err(e.into());
    }

    sqlx::query(
        r#"
        INSERT INTO entities
            (entity_id, kind, server_id, version, fields, last_writer, writer_since, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
        ON CONFLICT (entity_id) DO UPDATE SET
            version = EXCLUDED.version,
            fields = EXCLUDED.fields,
            last_writer = EXCLUDED.last_writer,
            writer_since = EXCLUDED.writer_since,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(&next.entity_id)
    .bind(next.kind.as_str())
    .bind(&next.server_id)
    .bind(next.version as i64)
    .bind(&next.fields)
    .bind(&next.last_writer)
    .bind(next.writer_since as i64)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(ItemResult::accepted(key.clone(), next.server_id, next.version))
}

async fn receipt_in(
    conn: &mut PgConnection,
    key: &str,
) -> std::result::Result<Option<Receipt>, sqlx::Error> {
    sqlx::query_as::<_, Receipt>(
        "SELECT server_id, version FROM receipts WHERE idempotency_key = $1",
    )
    .bind(key)
    .fetch_optional(conn)
    .await
}

/// Check if a SQL error is a unique constraint violation.
fn is_unique_violation(e: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = e {
        // PostgreSQL unique violation code is "23505"
        db_err.code().map(|c| c == "23505").unwrap_or(false)
    } else {
        false
    }
}
