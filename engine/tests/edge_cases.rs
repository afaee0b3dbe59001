//! Edge case tests for sitesync-engine
//!
//! These tests cover boundary conditions and unusual inputs.

use serde_json::json;
use sitesync_engine::{
    attendance_entity_id, Attendance, ChatMessage, ClientClock, Confirmed, DailyProgressReport,
    EntityKind, Error, FailOutcome, IdempotencyKeyGenerator, ItemResult, Mutation, MutationError,
    MutationPayload, MutationQueue, MutationStatus, QueueLimits, ReconciliationStore, Resolution,
    ServerEntity, SyncRequest, SyncResponse, TaskStatus, TaskUpdate,
};

fn chat(keys: &mut IdempotencyKeyGenerator, clock: &mut ClientClock, body: &str) -> Mutation {
    let id = keys.next_key();
    Mutation::new(
        id.clone(),
        format!("chat-{}", id),
        MutationPayload::ChatMessage(ChatMessage {
            channel: "site".into(),
            body: body.into(),
        }),
        None,
        clock.stamp(1000),
    )
}

// ============================================================================
// Text Edge Cases
// ============================================================================

#[test]
fn unicode_payloads_survive_the_wire() {
    let mut keys = IdempotencyKeyGenerator::new();
    let mut clock = ClientClock::new();

    for body in ["सीमेंट 200 बैग", "Привет", "🏗️🚧", "line\nbreak\ttab"] {
        let m = chat(&mut keys, &mut clock, body);
        m.payload.validate().unwrap();

        let request = SyncRequest::new("site-1", std::slice::from_ref(&m));
        let text = serde_json::to_string(&request).unwrap();
        let parsed: SyncRequest = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.mutations[0].to_payload().unwrap(), m.payload);
    }
}

#[test]
fn whitespace_only_text_is_rejected() {
    let payload = MutationPayload::Dpr(DailyProgressReport {
        date: "2026-10-18".into(),
        attendance_ref: attendance_entity_id("2026-10-18"),
        summary: " \n\t ".into(),
        labor_count: 4,
        weather: None,
        delay: None,
    });
    assert!(matches!(payload.validate(), Err(Error::InvalidPayload(_))));
}

// ============================================================================
// Clock Edge Cases
// ============================================================================

#[test]
fn wall_clock_going_backwards_keeps_queue_order() {
    let mut keys = IdempotencyKeyGenerator::new();
    let mut clock = ClientClock::new();
    let mut queue = MutationQueue::new(QueueLimits::default());

    // Same wall time for every stamp
    for _ in 0..5 {
        let m = chat(&mut keys, &mut clock, "ping");
        queue.enqueue(m).unwrap();
    }

    // Device clock set back to near epoch
    let id = keys.next_key();
    let late = Mutation::new(
        id.clone(),
        format!("chat-{}", id),
        MutationPayload::ChatMessage(ChatMessage {
            channel: "site".into(),
            body: "after reset".into(),
        }),
        None,
        clock.stamp(1),
    );
    queue.enqueue(late).unwrap();

    let stamps: Vec<_> = queue.iter().map(|m| m.created_at).collect();
    assert!(stamps.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn resumed_clock_continues_after_persisted_mark() {
    let mut clock = ClientClock::resume(5_000);
    assert_eq!(clock.stamp(10), 5_001);
}

// ============================================================================
// Queue Edge Cases
// ============================================================================

#[test]
fn zero_capacity_queue_refuses_everything() {
    let mut keys = IdempotencyKeyGenerator::new();
    let mut clock = ClientClock::new();
    let mut queue = MutationQueue::new(QueueLimits {
        max_pending: 0,
        max_retries: 3,
    });
    let m = chat(&mut keys, &mut clock, "hi");
    assert_eq!(queue.enqueue(m), Err(Error::CapacityExceeded { limit: 0 }));
}

#[test]
fn zero_retries_discards_on_first_failure() {
    let mut keys = IdempotencyKeyGenerator::new();
    let mut clock = ClientClock::new();
    let mut queue = MutationQueue::new(QueueLimits {
        max_pending: 10,
        max_retries: 0,
    });
    let m = chat(&mut keys, &mut clock, "hi");
    let id = m.id.clone();
    queue.enqueue(m).unwrap();
    queue.mark_in_flight(&[id.clone()]).unwrap();

    let outcome = queue
        .mark_failed(&id, MutationError::transient("timeout"))
        .unwrap();
    assert_eq!(outcome, FailOutcome::Discarded { attempts: 1 });
}

#[test]
fn ack_on_pending_item_is_allowed() {
    // A server can apply an item whose in-flight mark was lost in a restart
    let mut keys = IdempotencyKeyGenerator::new();
    let mut clock = ClientClock::new();
    let mut queue = MutationQueue::new(QueueLimits::default());
    let m = chat(&mut keys, &mut clock, "hi");
    let id = m.id.clone();
    queue.enqueue(m).unwrap();

    queue.mark_acked(&[id.clone()]).unwrap();
    assert_eq!(queue.get(&id).unwrap().status, MutationStatus::Acked);
}

#[test]
fn empty_batches_are_harmless() {
    let mut queue = MutationQueue::new(QueueLimits::default());
    assert!(queue.peek_batch(20).is_empty());
    queue.mark_in_flight(&[]).unwrap();
    queue.mark_acked(&[]).unwrap();
    assert!(queue.revert_in_flight().is_empty());
    assert!(queue.dismiss(&[]).is_empty());
}

// ============================================================================
// Reconciliation Edge Cases
// ============================================================================

#[test]
fn ack_without_local_entity_creates_confirmed() {
    let mut store = ReconciliationStore::new();
    let m = Mutation::new(
        "k1",
        "t9",
        MutationPayload::TaskUpdate(TaskUpdate {
            status: TaskStatus::InProgress,
            note: Some("started".into()),
        }),
        None,
        1,
    );
    store.apply_ack(&m, &ServerEntity::new("srv-t9", 1));

    let e = store.read("t9").unwrap();
    assert_eq!(e.kind, EntityKind::Task);
    assert_eq!(e.fields()["note"], "started");
    assert!(!e.is_optimistic());
}

#[test]
fn conflict_on_unknown_entity_is_ignored() {
    let mut store = ReconciliationStore::new();
    let m = Mutation::new(
        "k1",
        "missing",
        MutationPayload::TaskUpdate(TaskUpdate {
            status: TaskStatus::Completed,
            note: None,
        }),
        Some(1),
        1,
    );
    assert!(store.apply_conflict(&m, None, "stale").is_none());
    assert!(store.is_empty());
}

#[test]
fn remarking_attendance_updates_one_entity() {
    let mut store = ReconciliationStore::new();
    let entity_id = attendance_entity_id("2026-10-18");

    for (i, present) in [(1u64, false), (2, true)] {
        let m = Mutation::new(
            format!("a{}", i),
            entity_id.clone(),
            MutationPayload::Attendance(Attendance {
                date: "2026-10-18".into(),
                present,
                workers: 10,
                absent: 2,
            }),
            None,
            i,
        );
        store.apply_local(&m);
    }

    assert_eq!(store.len(), 1);
    assert!(store.attendance_present("2026-10-18"));
}

#[test]
fn seed_does_not_overwrite_local_state() {
    let mut store = ReconciliationStore::new();
    let confirmed = Confirmed {
        server_id: Some("srv-t1".into()),
        version: 1,
        fields: json!({"status": "PENDING"}),
    };
    store.seed("t1", EntityKind::Task, confirmed.clone());

    let m = Mutation::new(
        "k1",
        "t1",
        MutationPayload::TaskUpdate(TaskUpdate {
            status: TaskStatus::Completed,
            note: None,
        }),
        Some(1),
        1,
    );
    store.apply_local(&m);
    store.seed("t1", EntityKind::Task, confirmed);

    assert!(store.read("t1").unwrap().is_optimistic());
}

// ============================================================================
// Protocol Edge Cases
// ============================================================================

#[test]
fn unknown_outcome_fails_to_parse() {
    let result: Result<SyncResponse, _> = serde_json::from_value(json!({
        "results": [{"idempotencyKey": "a", "outcome": "MAYBE"}]
    }));
    assert!(result.is_err());
}

#[test]
fn rejected_with_reason_and_entity_is_a_conflict() {
    let mut result = ItemResult::rejected("a", "version mismatch");
    result.entity = Some(ServerEntity::new("s1", 4));
    assert!(matches!(result.resolution(), Resolution::Conflict { .. }));
}
