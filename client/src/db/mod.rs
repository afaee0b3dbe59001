//! SQLite persistence for the offline queue.
//!
//! Every state transition the engine makes is written as one [`Changeset`]
//! inside a single transaction, so the on-disk queue is never half-updated.

mod entities;
mod mutations;
mod pool;
mod session;

pub use entities::*;
pub use mutations::*;
pub use pool::*;
pub use session::*;

use sitesync_engine::{DomainEntity, EntityId, Mutation, MutationId};

/// Pending writes for one engine step.
#[derive(Debug, Default)]
pub struct Changeset {
    /// New mutations to insert
    pub inserted: Vec<Mutation>,
    /// Mutations whose status, attempts or error changed
    pub updated: Vec<Mutation>,
    /// Dismissed terminal mutations
    pub removed: Vec<MutationId>,
    pub upserted_entities: Vec<DomainEntity>,
    pub removed_entities: Vec<EntityId>,
    pub session: Option<StoredSession>,
}

impl Changeset {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty()
            && self.updated.is_empty()
            && self.removed.is_empty()
            && self.upserted_entities.is_empty()
            && self.removed_entities.is_empty()
            && self.session.is_none()
    }

    /// Record the post-change state of an entity: upsert it, or delete it
    /// if it no longer exists.
    pub fn entity(&mut self, id: &str, entity: Option<&DomainEntity>) {
        match entity {
            Some(e) => {
                self.removed_entities.retain(|r| r != id);
                self.upserted_entities.retain(|u| u.local_id != id);
                self.upserted_entities.push(e.clone());
            }
            None => {
                self.upserted_entities.retain(|u| u.local_id != id);
                if !self.removed_entities.iter().any(|r| r == id) {
                    self.removed_entities.push(id.to_string());
                }
            }
        }
    }
}

/// Apply a changeset atomically.
pub async fn commit(pool: &Pool, changes: &Changeset) -> Result<(), sqlx::Error> {
    if changes.is_empty() {
        return Ok(());
    }

    let mut tx = pool.begin().await?;

    for m in &changes.inserted {
        insert_mutation(&mut tx, m).await?;
    }
    for m in &changes.updated {
        update_mutation(&mut tx, m).await?;
    }
    if !changes.removed.is_empty() {
        delete_mutations(&mut tx, &changes.removed).await?;
    }
    for e in &changes.upserted_entities {
        upsert_entity(&mut tx, e).await?;
    }
    for id in &changes.removed_entities {
        delete_entity(&mut tx, id).await?;
    }
    if let Some(session) = &changes.session {
        save_session(&mut tx, session).await?;
    }

    tx.commit().await
}
