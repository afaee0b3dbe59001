//! In-memory ledger.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sitesync_engine::{ItemResult, MutationPayload, SyncItem};

use super::{next_state, Receipt, StoredEntity};

/// Receipts and entities held in concurrent maps.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    receipts: DashMap<String, Receipt>,
    entities: DashMap<String, StoredEntity>,
}

impl MemoryLedger {
    pub fn receipt(&self, key: &str) -> Option<Receipt> {
        self.receipts.get(key).map(|r| r.clone())
    }

    pub fn entity(&self, entity_id: &str) -> Option<StoredEntity> {
        self.entities.get(entity_id).map(|e| e.clone())
    }

    pub fn apply(&self, client_id: &str, item: &SyncItem, payload: &MutationPayload) -> ItemResult {
        let key = item.idempotency_key.clone();

        // Receipt slot first, entity second: the same lock order for every caller
        let slot = match self.receipts.entry(key.clone()) {
            Entry::Occupied(r) => {
                let r = r.get();
                return ItemResult::duplicate(key, r.server_id.clone(), r.version);
            }
            Entry::Vacant(slot) => slot,
        };

        let entity = self.entities.entry(item.entity_id.clone());
        let current = match &entity {
            Entry::Occupied(e) => Some(e.get().clone()),
            Entry::Vacant(_) => None,
        };

        match next_state(current.as_ref(), client_id, item, payload) {
            Ok(next) => {
                tracing::debug!(
                    "Applied {} from {} to {} (v{})",
                    key,
                    client_id,
                    next.entity_id,
                    next.version
                );
                slot.insert(Receipt {
                    server_id: next.server_id.clone(),
                    version: next.version,
                });
                let result = ItemResult::accepted(key, next.server_id.clone(), next.version);
                entity.insert(next);
                result
            }
            Err(conflict) => conflict,
        }
    }
}
