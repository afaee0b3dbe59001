//! Sync API wire types.
//!
//! A request carries a batch of mutations in queue order; the response has
//! one result per idempotency key. Keys the server has already applied come
//! back as `DUPLICATE` and are treated like `ACCEPTED`.

use crate::entity::ServerEntity;
use crate::{
    error::Result, ClientId, EntityId, Mutation, MutationId, MutationKind, MutationPayload,
    ServerId, Timestamp, Version,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Batch submitted to `POST /sync`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub client_id: ClientId,
    pub mutations: Vec<SyncItem>,
    /// Bearer token; travels in the Authorization header, never the body
    #[serde(skip)]
    pub session_token: Option<String>,
}

impl SyncRequest {
    pub fn new(client_id: impl Into<ClientId>, batch: &[Mutation]) -> Self {
        Self {
            client_id: client_id.into(),
            mutations: batch.iter().map(SyncItem::from_mutation).collect(),
            session_token: None,
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.session_token = token;
        self
    }

    /// Idempotency keys in batch order.
    pub fn keys(&self) -> Vec<MutationId> {
        self.mutations
            .iter()
            .map(|m| m.idempotency_key.clone())
            .collect()
    }
}

/// One mutation on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncItem {
    pub idempotency_key: MutationId,
    #[serde(rename = "type")]
    pub kind: MutationKind,
    pub payload: Value,
    pub client_timestamp: Timestamp,
    pub entity_id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_version: Option<Version>,
}

impl SyncItem {
    pub fn from_mutation(mutation: &Mutation) -> Self {
        Self {
            idempotency_key: mutation.id.clone(),
            kind: mutation.kind(),
            payload: mutation.payload.fields(),
            client_timestamp: mutation.created_at,
            entity_id: mutation.entity_id.clone(),
            base_version: mutation.base_version,
        }
    }

    /// Decode the typed payload.
    pub fn to_payload(&self) -> Result<MutationPayload> {
        MutationPayload::from_parts(self.kind, self.payload.clone())
    }
}

/// Per-item outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Accepted,
    Rejected,
    Duplicate,
}

/// Server verdict for one idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemResult {
    pub idempotency_key: MutationId,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<ServerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<ServerEntity>,
}

/// How the client acts on an [`ItemResult`].
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Applied (or already applied) by the server
    Acked(ServerEntity),
    /// Server holds a newer version; its state wins
    Conflict {
        reason: String,
        entity: Option<ServerEntity>,
    },
    /// Structurally invalid; never retried
    Invalid(String),
    /// Temporarily refused; counts as a failed attempt
    Retry(String),
}

impl ItemResult {
    fn bare(key: impl Into<MutationId>, outcome: Outcome) -> Self {
        Self {
            idempotency_key: key.into(),
            outcome,
            server_id: None,
            version: None,
            conflict_reason: None,
            reason: None,
            retryable: false,
            entity: None,
        }
    }

    pub fn accepted(
        key: impl Into<MutationId>,
        server_id: impl Into<ServerId>,
        version: Version,
    ) -> Self {
        Self {
            server_id: Some(server_id.into()),
            version: Some(version),
            ..Self::bare(key, Outcome::Accepted)
        }
    }

    pub fn duplicate(
        key: impl Into<MutationId>,
        server_id: impl Into<ServerId>,
        version: Version,
    ) -> Self {
        Self {
            server_id: Some(server_id.into()),
            version: Some(version),
            ..Self::bare(key, Outcome::Duplicate)
        }
    }

    pub fn rejected(key: impl Into<MutationId>, reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::bare(key, Outcome::Rejected)
        }
    }

    pub fn retry_later(key: impl Into<MutationId>, reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            retryable: true,
            ..Self::bare(key, Outcome::Rejected)
        }
    }

    pub fn conflict(
        key: impl Into<MutationId>,
        reason: impl Into<String>,
        entity: ServerEntity,
    ) -> Self {
        Self {
            conflict_reason: Some(reason.into()),
            entity: Some(entity),
            ..Self::bare(key, Outcome::Rejected)
        }
    }

    /// Classify this result.
    pub fn resolution(&self) -> Resolution {
        match self.outcome {
            Outcome::Accepted | Outcome::Duplicate => {
                let entity = self.entity.clone().unwrap_or_default();
                Resolution::Acked(ServerEntity {
                    server_id: self.server_id.clone().or(entity.server_id),
                    version: self.version.or(entity.version),
                    fields: entity.fields,
                })
            }
            Outcome::Rejected if self.conflict_reason.is_some() || self.entity.is_some() => {
                Resolution::Conflict {
                    reason: self
                        .conflict_reason
                        .clone()
                        .or_else(|| self.reason.clone())
                        .unwrap_or_else(|| "server holds a newer version".to_string()),
                    entity: self.entity.clone(),
                }
            }
            Outcome::Rejected => {
                let reason = self
                    .reason
                    .clone()
                    .unwrap_or_else(|| "rejected by server".to_string());
                if self.retryable {
                    Resolution::Retry(reason)
                } else {
                    Resolution::Invalid(reason)
                }
            }
        }
    }
}

/// Response to `POST /sync`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub results: Vec<ItemResult>,
}

impl SyncResponse {
    /// Result for a key, if the server returned one.
    pub fn get(&self, key: &str) -> Option<&ItemResult> {
        self.results.iter().find(|r| r.idempotency_key == key)
    }

    /// Whether every key of the request was accepted or duplicate.
    pub fn all_accepted(&self, keys: &[MutationId]) -> bool {
        keys.iter().all(|k| {
            self.get(k)
                .map(|r| matches!(r.outcome, Outcome::Accepted | Outcome::Duplicate))
                .unwrap_or(false)
        })
    }
}
