//! Domain entities as the UI sees them.
//!
//! An entity is either confirmed by the server or carries an optimistic local
//! value on top of (optionally) a confirmed base.

use crate::{EntityId, MutationId, ServerId, Version};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Kinds of domain entity a mutation can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    AttendanceRecord,
    Task,
    MaterialRequest,
    DailyProgressReport,
    ChatMessage,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::AttendanceRecord => "ATTENDANCE_RECORD",
            EntityKind::Task => "TASK",
            EntityKind::MaterialRequest => "MATERIAL_REQUEST",
            EntityKind::DailyProgressReport => "DAILY_PROGRESS_REPORT",
            EntityKind::ChatMessage => "CHAT_MESSAGE",
        }
    }

    pub fn parse(s: &str) -> crate::error::Result<Self> {
        match s {
            "ATTENDANCE_RECORD" => Ok(EntityKind::AttendanceRecord),
            "TASK" => Ok(EntityKind::Task),
            "MATERIAL_REQUEST" => Ok(EntityKind::MaterialRequest),
            "DAILY_PROGRESS_REPORT" => Ok(EntityKind::DailyProgressReport),
            "CHAT_MESSAGE" => Ok(EntityKind::ChatMessage),
            other => Err(crate::Error::InvalidRecord(format!(
                "unknown entity kind: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local id of the attendance record for a site day.
///
/// Attendance is one entity per date, so re-marking the same day updates it.
pub fn attendance_entity_id(date: &str) -> EntityId {
    format!("attendance-{}", date)
}

/// Server-authoritative state of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Confirmed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<ServerId>,
    pub version: Version,
    pub fields: Value,
}

/// Entity state as reported by the server in a sync result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEntity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<ServerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    /// Full field values, when the server sends them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Value>,
}

impl ServerEntity {
    pub fn new(server_id: impl Into<ServerId>, version: Version) -> Self {
        Self {
            server_id: Some(server_id.into()),
            version: Some(version),
            fields: None,
        }
    }

    pub fn with_fields(mut self, fields: Value) -> Self {
        self.fields = Some(fields);
        self
    }
}

/// Confirmed or optimistic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityState {
    /// A local write is outstanding
    #[serde(rename_all = "camelCase")]
    Optimistic {
        fields: Value,
        pending_mutation_id: MutationId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confirmed: Option<Confirmed>,
    },
    /// Server state, no local write outstanding
    Confirmed(Confirmed),
}

/// A domain entity with its merged view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEntity {
    pub local_id: EntityId,
    pub kind: EntityKind,
    pub state: EntityState,
    /// Set when the server overwrote a local change; holds the reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded: Option<String>,
}

impl DomainEntity {
    /// The latest merged field values.
    pub fn fields(&self) -> &Value {
        match &self.state {
            EntityState::Optimistic { fields, .. } => fields,
            EntityState::Confirmed(c) => &c.fields,
        }
    }

    /// The last confirmed server state, if any.
    pub fn confirmed(&self) -> Option<&Confirmed> {
        match &self.state {
            EntityState::Optimistic { confirmed, .. } => confirmed.as_ref(),
            EntityState::Confirmed(c) => Some(c),
        }
    }

    pub fn server_id(&self) -> Option<&str> {
        self.confirmed().and_then(|c| c.server_id.as_deref())
    }

    /// Confirmed version, 0 if the server has never seen the entity.
    pub fn version(&self) -> Version {
        self.confirmed().map(|c| c.version).unwrap_or(0)
    }

    pub fn pending_mutation_id(&self) -> Option<&str> {
        match &self.state {
            EntityState::Optimistic {
                pending_mutation_id,
                ..
            } => Some(pending_mutation_id),
            EntityState::Confirmed(_) => None,
        }
    }

    pub fn is_optimistic(&self) -> bool {
        matches!(self.state, EntityState::Optimistic { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entity_accessors() {
        let entity = DomainEntity {
            local_id: "t1".into(),
            kind: EntityKind::Task,
            state: EntityState::Optimistic {
                fields: json!({"status": "COMPLETED"}),
                pending_mutation_id: "m1".into(),
                confirmed: Some(Confirmed {
                    server_id: Some("srv-t1".into()),
                    version: 3,
                    fields: json!({"status": "PENDING"}),
                }),
            },
            superseded: None,
        };

        assert_eq!(entity.fields()["status"], "COMPLETED");
        assert_eq!(entity.server_id(), Some("srv-t1"));
        assert_eq!(entity.version(), 3);
        assert_eq!(entity.pending_mutation_id(), Some("m1"));
        assert!(entity.is_optimistic());
    }

    #[test]
    fn state_serialization() {
        let state = EntityState::Confirmed(Confirmed {
            server_id: None,
            version: 1,
            fields: json!({"body": "hi"}),
        });
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["state"], "CONFIRMED");
        assert_eq!(json["version"], 1);

        let parsed: EntityState = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, state);
    }

    #[test]
    fn kind_storage_names() {
        for kind in [
            EntityKind::AttendanceRecord,
            EntityKind::Task,
            EntityKind::MaterialRequest,
            EntityKind::DailyProgressReport,
            EntityKind::ChatMessage,
        ] {
            assert_eq!(EntityKind::parse(kind.as_str()).unwrap(), kind);
        }
        assert_eq!(attendance_entity_id("2026-10-18"), "attendance-2026-10-18");
    }
}
