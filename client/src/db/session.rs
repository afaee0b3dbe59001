//! Database operations for the sync_session singleton.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::Pool;

/// The persisted part of the sync session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSession {
    pub client_id: String,
    pub last_synced_at: Option<u64>,
    pub queue_depth: usize,
    /// Highest timestamp the client clock has handed out
    pub clock_mark: u64,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for StoredSession {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let last_synced_at: Option<i64> = row.try_get("last_synced_at")?;
        let queue_depth: i64 = row.try_get("queue_depth")?;
        let clock_mark: i64 = row.try_get("clock_mark")?;
        Ok(StoredSession {
            client_id: row.try_get("client_id")?,
            last_synced_at: last_synced_at.map(|t| t as u64),
            queue_depth: queue_depth.max(0) as usize,
            clock_mark: clock_mark.max(0) as u64,
        })
    }
}

/// Load the session row, if the database has been used before.
pub async fn load_session(pool: &Pool) -> Result<Option<StoredSession>, sqlx::Error> {
    sqlx::query_as::<_, StoredSession>(
        r#"
        SELECT client_id, last_synced_at, queue_depth, clock_mark
        FROM sync_session
        WHERE id = 1
        "#,
    )
    .fetch_optional(pool)
    .await
}

/// Write the session row.
pub async fn save_session(
    conn: &mut SqliteConnection,
    session: &StoredSession,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO sync_session (id, client_id, last_synced_at, queue_depth, clock_mark)
        VALUES (1, $1, $2, $3, $4)
        ON CONFLICT (id) DO UPDATE SET
            client_id = excluded.client_id,
            last_synced_at = excluded.last_synced_at,
            queue_depth = excluded.queue_depth,
            clock_mark = excluded.clock_mark
        "#,
    )
    .bind(&session.client_id)
    .bind(session.last_synced_at.map(|t| t as i64))
    .bind(session.queue_depth as i64)
    .bind(session.clock_mark as i64)
    .execute(conn)
    .await?;

    Ok(())
}
