//! Reconciliation of optimistic local writes with server responses.
//!
//! The store is a pure merge: it never talks to the network. Every method
//! takes the mutation that caused the change so that acks and discards for
//! stale mutations never clobber a newer optimistic value.
//!
//! # Rules
//!
//! 1. `apply_local` shallow-merges the payload into the current view and
//!    records the mutation as pending.
//! 2. `apply_ack` confirms. If the acked mutation is the pending one the
//!    entity becomes confirmed, otherwise only the confirmed base moves.
//! 3. `apply_conflict` lets the server win and flags the entity.
//! 4. `apply_discard` rolls back to the confirmed base, or removes an entity
//!    the server never saw.
//! 5. Confirmed versions never decrease.

use crate::entity::{Confirmed, DomainEntity, EntityKind, EntityState, ServerEntity};
use crate::{error::Result, EntityId, Error, Mutation, Version};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Canonical domain state, keyed by local entity id.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationStore {
    entities: BTreeMap<EntityId, DomainEntity>,
}

impl ReconciliationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted entities.
    pub fn restore(entities: impl IntoIterator<Item = DomainEntity>) -> Self {
        Self {
            entities: entities
                .into_iter()
                .map(|e| (e.local_id.clone(), e))
                .collect(),
        }
    }

    /// Seed a server-confirmed entity (e.g. tasks assigned to the site).
    ///
    /// Leaves an existing entity alone.
    pub fn seed(&mut self, local_id: impl Into<EntityId>, kind: EntityKind, confirmed: Confirmed) {
        let local_id = local_id.into();
        self.entities
            .entry(local_id.clone())
            .or_insert_with(|| DomainEntity {
                local_id,
                kind,
                state: EntityState::Confirmed(confirmed),
                superseded: None,
            });
    }

    /// Optimistic write at enqueue time.
    pub fn apply_local(&mut self, mutation: &Mutation) -> &DomainEntity {
        let entity = self.preview_local(mutation);
        self.entities.insert(mutation.entity_id.clone(), entity);
        &self.entities[&mutation.entity_id]
    }

    /// The entity `apply_local` would produce, without storing it.
    pub fn preview_local(&self, mutation: &Mutation) -> DomainEntity {
        let patch = mutation.payload.fields();
        let empty = Value::Object(Map::new());

        let (kind, base, confirmed, superseded) = match self.entities.get(&mutation.entity_id) {
            Some(e) => (e.kind, e.fields(), e.confirmed().cloned(), e.superseded.clone()),
            None => (mutation.kind().entity_kind(), &empty, None, None),
        };

        DomainEntity {
            local_id: mutation.entity_id.clone(),
            kind,
            state: EntityState::Optimistic {
                fields: merge(base, &patch),
                pending_mutation_id: mutation.id.clone(),
                confirmed,
            },
            superseded,
        }
    }

    /// Merge a server acknowledgement.
    pub fn apply_ack(&mut self, mutation: &Mutation, server: &ServerEntity) -> &DomainEntity {
        let entity = self.entry_for(mutation);

        // What the server now holds: its fields if sent, otherwise the base
        // with this mutation applied
        let previous = entity.confirmed().cloned();
        let fields = match &server.fields {
            Some(fields) => fields.clone(),
            None => {
                let base = previous
                    .as_ref()
                    .map(|c| c.fields.clone())
                    .unwrap_or_else(|| Value::Object(Map::new()));
                merge(&base, &mutation.payload.fields())
            }
        };
        let confirmed = confirm(previous.as_ref(), server, fields);

        entity.state = match std::mem::replace(&mut entity.state, placeholder()) {
            EntityState::Optimistic {
                fields,
                pending_mutation_id,
                ..
            } if pending_mutation_id != mutation.id => EntityState::Optimistic {
                fields,
                pending_mutation_id,
                confirmed: Some(confirmed),
            },
            _ => EntityState::Confirmed(confirmed),
        };
        entity
    }

    /// Server state replaces the local change; the entity is flagged.
    ///
    /// Without server state the entity rolls back to its confirmed base.
    pub fn apply_conflict(
        &mut self,
        mutation: &Mutation,
        server: Option<&ServerEntity>,
        reason: &str,
    ) -> Option<&DomainEntity> {
        let entity = self.entities.get_mut(&mutation.entity_id)?;
        let previous = entity.confirmed().cloned();

        let confirmed = match server {
            Some(server) => {
                let fields = server.fields.clone().unwrap_or_else(|| {
                    previous
                        .as_ref()
                        .map(|c| c.fields.clone())
                        .unwrap_or_else(|| Value::Object(Map::new()))
                });
                Some(confirm(previous.as_ref(), server, fields))
            }
            None => previous,
        };

        entity.superseded = Some(reason.to_string());

        let next = match std::mem::replace(&mut entity.state, placeholder()) {
            EntityState::Optimistic {
                fields,
                pending_mutation_id,
                ..
            } if pending_mutation_id != mutation.id => Some(EntityState::Optimistic {
                fields,
                pending_mutation_id,
                confirmed,
            }),
            _ => confirmed.map(EntityState::Confirmed),
        };

        match next {
            Some(state) => {
                entity.state = state;
                self.entities.get(&mutation.entity_id)
            }
            None => {
                self.entities.remove(&mutation.entity_id);
                None
            }
        }
    }

    /// Roll back a discarded mutation.
    ///
    /// Returns the entity if it still exists afterwards.
    pub fn apply_discard(&mut self, mutation: &Mutation) -> Option<&DomainEntity> {
        let entity = self.entities.get_mut(&mutation.entity_id)?;

        if entity.pending_mutation_id() != Some(mutation.id.as_str()) {
            return self.entities.get(&mutation.entity_id);
        }

        match entity.confirmed().cloned() {
            Some(confirmed) => {
                entity.state = EntityState::Confirmed(confirmed);
                self.entities.get(&mutation.entity_id)
            }
            None => {
                self.entities.remove(&mutation.entity_id);
                None
            }
        }
    }

    /// Latest merged view of an entity.
    pub fn read(&self, entity_id: &str) -> Option<&DomainEntity> {
        self.entities.get(entity_id)
    }

    /// Confirmed version a new change to this entity is based on.
    pub fn base_version(&self, entity_id: &str) -> Option<Version> {
        self.read(entity_id)
            .and_then(|e| e.confirmed())
            .map(|c| c.version)
    }

    /// Whether attendance for `date` is recorded as present.
    pub fn attendance_present(&self, date: &str) -> bool {
        self.read(&crate::attendance_entity_id(date))
            .map(|e| e.fields().get("present") == Some(&Value::Bool(true)))
            .unwrap_or(false)
    }

    /// Clear the superseded flag after the user has been notified.
    pub fn clear_superseded(&mut self, entity_id: &str) -> Result<&DomainEntity> {
        let entity = self
            .entities
            .get_mut(entity_id)
            .ok_or_else(|| Error::EntityNotFound(entity_id.to_string()))?;
        entity.superseded = None;
        Ok(entity)
    }

    /// All entities in id order.
    pub fn iter(&self) -> impl Iterator<Item = &DomainEntity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    fn entry_for(&mut self, mutation: &Mutation) -> &mut DomainEntity {
        self.entities
            .entry(mutation.entity_id.clone())
            .or_insert_with(|| DomainEntity {
                local_id: mutation.entity_id.clone(),
                kind: mutation.kind().entity_kind(),
                state: placeholder(),
                superseded: None,
            })
    }
}

/// Shallow merge: top-level keys of `patch` replace those of `base`.
fn merge(base: &Value, patch: &Value) -> Value {
    let mut out = match base {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    if let Value::Object(patch) = patch {
        for (k, v) in patch {
            out.insert(k.clone(), v.clone());
        }
    }
    Value::Object(out)
}

fn confirm(previous: Option<&Confirmed>, server: &ServerEntity, fields: Value) -> Confirmed {
    let prev_version = previous.map(|c| c.version).unwrap_or(0);
    Confirmed {
        server_id: server
            .server_id
            .clone()
            .or_else(|| previous.and_then(|c| c.server_id.clone())),
        version: server.version.unwrap_or(prev_version).max(prev_version),
        fields,
    }
}

fn placeholder() -> EntityState {
    EntityState::Confirmed(Confirmed {
        server_id: None,
        version: 0,
        fields: Value::Object(Map::new()),
    })
}
