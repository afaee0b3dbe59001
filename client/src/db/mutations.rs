//! Database operations for the mutations table.

use sitesync_engine::{Mutation, MutationError, MutationKind, MutationPayload, MutationStatus};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::Pool;
use crate::error::{ClientError, Result};

/// A stored mutation row from the database.
#[derive(Debug)]
pub struct StoredMutation {
    pub id: String,
    pub kind: String,
    pub entity_id: String,
    pub base_version: Option<i64>,
    pub payload: String,
    pub created_at: i64,
    pub status: String,
    pub attempts: i64,
    pub last_error: Option<String>,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for StoredMutation {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(StoredMutation {
            id: row.try_get("id")?,
            kind: row.try_get("kind")?,
            entity_id: row.try_get("entity_id")?,
            base_version: row.try_get("base_version")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
            status: row.try_get("status")?,
            attempts: row.try_get("attempts")?,
            last_error: row.try_get("last_error")?,
        })
    }
}

impl StoredMutation {
    /// Convert database row to an engine Mutation.
    pub fn to_mutation(&self) -> Result<Mutation> {
        let kind = MutationKind::parse(&self.kind)?;
        let body: serde_json::Value = serde_json::from_str(&self.payload)?;
        let last_error = self
            .last_error
            .as_deref()
            .map(serde_json::from_str::<MutationError>)
            .transpose()?;

        Ok(Mutation {
            id: self.id.clone(),
            entity_id: self.entity_id.clone(),
            payload: MutationPayload::from_parts(kind, body)?,
            base_version: self.base_version.map(|v| v as u64),
            created_at: self.created_at as u64,
            status: MutationStatus::parse(&self.status)?,
            attempts: u32::try_from(self.attempts)
                .map_err(|_| ClientError::Corrupt(format!("attempts for {}", self.id)))?,
            last_error,
        })
    }
}

/// Load every mutation in creation order.
pub async fn load_mutations(pool: &Pool) -> Result<Vec<Mutation>> {
    let rows = sqlx::query_as::<_, StoredMutation>(
        r#"
        SELECT id, kind, entity_id, base_version, payload, created_at,
               status, attempts, last_error
        FROM mutations
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(StoredMutation::to_mutation).collect()
}

/// Insert a new mutation.
pub async fn insert_mutation(
    conn: &mut SqliteConnection,
    m: &Mutation,
) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO mutations (
            id, kind, entity_id, base_version, payload, created_at,
            status, attempts, last_error
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(&m.id)
    .bind(m.kind().as_str())
    .bind(&m.entity_id)
    .bind(m.base_version.map(|v| v as i64))
    .bind(m.payload.fields().to_string())
    .bind(m.created_at as i64)
    .bind(m.status.as_str())
    .bind(m.attempts as i64)
    .bind(error_json(m))
    .execute(conn)
    .await?;

    Ok(())
}

/// Persist lifecycle fields of an existing mutation.
pub async fn update_mutation(
    conn: &mut SqliteConnection,
    m: &Mutation,
) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE mutations
        SET status = $2, attempts = $3, last_error = $4
        WHERE id = $1
        "#,
    )
    .bind(&m.id)
    .bind(m.status.as_str())
    .bind(m.attempts as i64)
    .bind(error_json(m))
    .execute(conn)
    .await?;

    Ok(())
}

/// Delete dismissed mutations.
pub async fn delete_mutations(
    conn: &mut SqliteConnection,
    ids: &[String],
) -> std::result::Result<(), sqlx::Error> {
    for id in ids {
        sqlx::query("DELETE FROM mutations WHERE id = $1")
            .bind(id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

fn error_json(m: &Mutation) -> Option<String> {
    m.last_error
        .as_ref()
        .and_then(|e| serde_json::to_string(e).ok())
}
