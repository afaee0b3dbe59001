//! Mutation types for expressing user-initiated changes.
//!
//! Every field action (attendance mark, task update, material request, daily
//! progress report, chat message) is captured as a [`Mutation`] with a typed
//! payload. The mutation id doubles as the idempotency key the server uses to
//! collapse redeliveries.

use crate::{error::Result, EntityId, Error, MutationId, Timestamp, Version};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound for head counts on attendance and progress reports.
pub const MAX_CREW_SIZE: u32 = 10_000;

/// Upper bound (in characters) for free-text fields.
pub const MAX_TEXT_LEN: usize = 4_000;

/// The type of a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutationKind {
    Attendance,
    TaskUpdate,
    MaterialRequest,
    Dpr,
    ChatMessage,
}

impl MutationKind {
    /// Stable wire/storage name.
    pub fn as_str(self) -> &'static str {
        match self {
            MutationKind::Attendance => "ATTENDANCE",
            MutationKind::TaskUpdate => "TASK_UPDATE",
            MutationKind::MaterialRequest => "MATERIAL_REQUEST",
            MutationKind::Dpr => "DPR",
            MutationKind::ChatMessage => "CHAT_MESSAGE",
        }
    }

    /// Parse a storage name back into a kind.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "ATTENDANCE" => Ok(MutationKind::Attendance),
            "TASK_UPDATE" => Ok(MutationKind::TaskUpdate),
            "MATERIAL_REQUEST" => Ok(MutationKind::MaterialRequest),
            "DPR" => Ok(MutationKind::Dpr),
            "CHAT_MESSAGE" => Ok(MutationKind::ChatMessage),
            other => Err(Error::InvalidRecord(format!("unknown mutation kind: {}", other))),
        }
    }

    /// The kind of domain entity this mutation targets.
    pub fn entity_kind(self) -> crate::EntityKind {
        use crate::EntityKind;
        match self {
            MutationKind::Attendance => EntityKind::AttendanceRecord,
            MutationKind::TaskUpdate => EntityKind::Task,
            MutationKind::MaterialRequest => EntityKind::MaterialRequest,
            MutationKind::Dpr => EntityKind::DailyProgressReport,
            MutationKind::ChatMessage => EntityKind::ChatMessage,
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attendance mark for one site day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attendance {
    /// Site day, `YYYY-MM-DD`
    pub date: String,
    /// Whether the engineer marked themselves present
    pub present: bool,
    /// Workers on site
    pub workers: u32,
    /// Workers absent
    pub absent: u32,
}

/// Task progress states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

/// Status change on an existing task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdate {
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Delivery urgency for a material request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Urgency {
    #[default]
    Normal,
    Urgent,
}

/// Request for site material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialRequest {
    pub item: String,
    /// Free-form quantity with unit, e.g. "200 bags"
    pub quantity: String,
    #[serde(default)]
    pub urgency: Urgency,
    /// Reason or site area
    pub reason: String,
}

/// Daily progress report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyProgressReport {
    pub date: String,
    /// Local id of the attendance record this report builds on
    pub attendance_ref: EntityId,
    pub summary: String,
    pub labor_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<String>,
}

/// Site communication message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub channel: String,
    pub body: String,
}

/// Type-specific, immutable snapshot of a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutationPayload {
    Attendance(Attendance),
    TaskUpdate(TaskUpdate),
    MaterialRequest(MaterialRequest),
    Dpr(DailyProgressReport),
    ChatMessage(ChatMessage),
}

impl MutationPayload {
    /// Get the mutation kind.
    pub fn kind(&self) -> MutationKind {
        match self {
            MutationPayload::Attendance(_) => MutationKind::Attendance,
            MutationPayload::TaskUpdate(_) => MutationKind::TaskUpdate,
            MutationPayload::MaterialRequest(_) => MutationKind::MaterialRequest,
            MutationPayload::Dpr(_) => MutationKind::Dpr,
            MutationPayload::ChatMessage(_) => MutationKind::ChatMessage,
        }
    }

    /// The payload body as entity field values.
    pub fn fields(&self) -> serde_json::Value {
        let value = match self {
            MutationPayload::Attendance(p) => serde_json::to_value(p),
            MutationPayload::TaskUpdate(p) => serde_json::to_value(p),
            MutationPayload::MaterialRequest(p) => serde_json::to_value(p),
            MutationPayload::Dpr(p) => serde_json::to_value(p),
            MutationPayload::ChatMessage(p) => serde_json::to_value(p),
        };
        // Plain structs of strings and integers always serialize
        value.unwrap_or(serde_json::Value::Null)
    }

    /// Rebuild a payload from its kind and body, as stored or sent on the wire.
    pub fn from_parts(kind: MutationKind, body: serde_json::Value) -> Result<Self> {
        let parsed = match kind {
            MutationKind::Attendance => serde_json::from_value(body).map(Self::Attendance),
            MutationKind::TaskUpdate => serde_json::from_value(body).map(Self::TaskUpdate),
            MutationKind::MaterialRequest => {
                serde_json::from_value(body).map(Self::MaterialRequest)
            }
            MutationKind::Dpr => serde_json::from_value(body).map(Self::Dpr),
            MutationKind::ChatMessage => serde_json::from_value(body).map(Self::ChatMessage),
        };
        parsed.map_err(|e| Error::InvalidPayload(format!("{}: {}", kind, e)))
    }

    /// Structural validation, shared by the client (before enqueue) and the
    /// server (before applying).
    pub fn validate(&self) -> Result<()> {
        match self {
            MutationPayload::Attendance(p) => {
                require_text("date", &p.date)?;
                require_crew("workers", p.workers)?;
                require_crew("absent", p.absent)
            }
            MutationPayload::TaskUpdate(p) => match &p.note {
                Some(note) => limit_text("note", note),
                None => Ok(()),
            },
            MutationPayload::MaterialRequest(p) => {
                require_text("item", &p.item)?;
                require_text("quantity", &p.quantity)?;
                require_text("reason", &p.reason)
            }
            MutationPayload::Dpr(p) => {
                require_text("date", &p.date)?;
                require_text("attendanceRef", &p.attendance_ref)?;
                require_text("summary", &p.summary)?;
                require_crew("laborCount", p.labor_count)
            }
            MutationPayload::ChatMessage(p) => {
                require_text("channel", &p.channel)?;
                require_text("body", &p.body)
            }
        }
    }
}

fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidPayload(format!("{} must not be empty", field)));
    }
    limit_text(field, value)
}

fn limit_text(field: &str, value: &str) -> Result<()> {
    if value.chars().count() > MAX_TEXT_LEN {
        return Err(Error::InvalidPayload(format!(
            "{} exceeds {} characters",
            field, MAX_TEXT_LEN
        )));
    }
    Ok(())
}

fn require_crew(field: &str, count: u32) -> Result<()> {
    if count > MAX_CREW_SIZE {
        return Err(Error::InvalidPayload(format!(
            "{} exceeds {}",
            field, MAX_CREW_SIZE
        )));
    }
    Ok(())
}

/// Lifecycle state of a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutationStatus {
    /// Waiting for delivery
    Pending,
    /// Part of the batch currently awaiting a response
    InFlight,
    /// Applied by the server (terminal)
    Acked,
    /// Given up on (terminal)
    #[serde(alias = "FAILED")]
    Discarded,
}

impl MutationStatus {
    /// Stable storage name.
    pub fn as_str(self) -> &'static str {
        match self {
            MutationStatus::Pending => "PENDING",
            MutationStatus::InFlight => "IN_FLIGHT",
            MutationStatus::Acked => "ACKED",
            MutationStatus::Discarded => "DISCARDED",
        }
    }

    /// Parse a storage name back into a status.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(MutationStatus::Pending),
            "IN_FLIGHT" => Ok(MutationStatus::InFlight),
            "ACKED" => Ok(MutationStatus::Acked),
            "DISCARDED" | "FAILED" => Ok(MutationStatus::Discarded),
            other => Err(Error::InvalidRecord(format!("unknown mutation status: {}", other))),
        }
    }

    /// Whether the mutation still counts toward queue depth.
    pub fn is_live(self) -> bool {
        matches!(self, MutationStatus::Pending | MutationStatus::InFlight)
    }

    /// Whether the mutation has reached ACKED or DISCARDED.
    pub fn is_terminal(self) -> bool {
        !self.is_live()
    }
}

impl fmt::Display for MutationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a delivery failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// No response, timeout, or a rejection the server marked retryable
    Transient,
    /// Server rejected the payload as structurally invalid
    Validation,
    /// Server holds a newer version of the target entity
    Conflict,
}

/// Last failure recorded on a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationError {
    pub kind: FailureKind,
    pub reason: String,
}

impl MutationError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            reason: reason.into(),
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Validation,
            reason: reason.into(),
        }
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Conflict,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for MutationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            FailureKind::Transient => "transient",
            FailureKind::Validation => "validation",
            FailureKind::Conflict => "conflict",
        };
        write!(f, "{}: {}", kind, self.reason)
    }
}

/// A durable, idempotent-keyed record of one change awaiting delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mutation {
    /// Client-generated id, reused as the idempotency key on every retry
    pub id: MutationId,
    /// Local id of the targeted domain entity
    pub entity_id: EntityId,
    /// The change itself
    #[serde(rename = "change")]
    pub payload: MutationPayload,
    /// Server version the change was based on, if the entity was confirmed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_version: Option<Version>,
    /// Client timestamp (milliseconds), strictly increasing per client
    pub created_at: Timestamp,
    pub status: MutationStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<MutationError>,
}

impl Mutation {
    /// Create a new pending mutation.
    pub fn new(
        id: impl Into<MutationId>,
        entity_id: impl Into<EntityId>,
        payload: MutationPayload,
        base_version: Option<Version>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            entity_id: entity_id.into(),
            payload,
            base_version,
            created_at,
            status: MutationStatus::Pending,
            attempts: 0,
            last_error: None,
        }
    }

    /// Get the mutation kind.
    pub fn kind(&self) -> MutationKind {
        self.payload.kind()
    }

    /// Whether the mutation counts toward queue depth.
    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn material(item: &str) -> MutationPayload {
        MutationPayload::MaterialRequest(MaterialRequest {
            item: item.into(),
            quantity: "200 bags".into(),
            urgency: Urgency::Urgent,
            reason: "Slab work".into(),
        })
    }

    #[test]
    fn payload_wire_shape() {
        let payload = MutationPayload::TaskUpdate(TaskUpdate {
            status: TaskStatus::Completed,
            note: None,
        });
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            json,
            json!({"type": "TASK_UPDATE", "payload": {"status": "COMPLETED"}})
        );
    }

    #[test]
    fn from_parts_round_trips_fields() {
        let payload = material("OPC 53 Cement");
        let rebuilt =
            MutationPayload::from_parts(MutationKind::MaterialRequest, payload.fields()).unwrap();
        assert_eq!(rebuilt, payload);
    }

    #[test]
    fn from_parts_rejects_wrong_shape() {
        let err = MutationPayload::from_parts(MutationKind::ChatMessage, json!({"text": "hi"}))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPayload(_)));
    }

    #[test]
    fn validation_catches_blank_text() {
        assert!(material("Sand (fine)").validate().is_ok());
        assert_eq!(
            material("   ").validate(),
            Err(Error::InvalidPayload("item must not be empty".into()))
        );

        let chat = MutationPayload::ChatMessage(ChatMessage {
            channel: "site".into(),
            body: "x".repeat(MAX_TEXT_LEN + 1),
        });
        assert!(chat.validate().is_err());
    }

    #[test]
    fn validation_bounds_crew_counts() {
        let attendance = MutationPayload::Attendance(Attendance {
            date: "2026-10-18".into(),
            present: true,
            workers: MAX_CREW_SIZE + 1,
            absent: 0,
        });
        assert!(attendance.validate().is_err());
    }

    #[test]
    fn status_storage_names() {
        for status in [
            MutationStatus::Pending,
            MutationStatus::InFlight,
            MutationStatus::Acked,
            MutationStatus::Discarded,
        ] {
            assert_eq!(MutationStatus::parse(status.as_str()).unwrap(), status);
        }
        assert_eq!(
            MutationStatus::parse("FAILED").unwrap(),
            MutationStatus::Discarded
        );
        assert!(MutationStatus::parse("LOST").is_err());
    }

    #[test]
    fn mutation_serialization() {
        let m = Mutation::new("m1", "e1", material("Bricks"), None, 42);
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["change"]["type"], "MATERIAL_REQUEST");
        assert_eq!(json["change"]["payload"]["item"], "Bricks");
        assert_eq!(json["status"], "PENDING");
        assert!(json.get("baseVersion").is_none());

        let parsed: Mutation = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, m);
    }
}
