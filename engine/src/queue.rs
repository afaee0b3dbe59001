//! Mutation queue - the ordered, in-memory view of pending work.
//!
//! The queue holds every mutation that has not yet been dismissed, in creation
//! order, and owns all lifecycle transitions:
//!
//! ```text
//!            enqueue
//!               │
//!               ▼
//!   ┌──────► PENDING ──── mark_in_flight ────► IN_FLIGHT
//!   │           │                                  │
//!   │           │ discard                          ├── mark_acked ──► ACKED
//!   │           ▼                                  │
//!   │       DISCARDED ◄── mark_failed (ceiling) ───┤
//!   │                                              │
//!   └──── mark_failed (retry) / revert_in_flight ──┘
//! ```
//!
//! The queue does no IO. Durability is the caller's concern: persist the
//! mutations returned by [`MutationQueue::get`] after each transition and feed
//! them back through [`MutationQueue::restore`] on startup.

use crate::{error::Result, Error, Mutation, MutationError, MutationId, MutationStatus};

/// Default maximum number of live (PENDING or IN_FLIGHT) mutations.
pub const DEFAULT_MAX_PENDING: usize = 10_000;

/// Default number of failed deliveries tolerated before a mutation is discarded.
pub const DEFAULT_MAX_RETRIES: u32 = 8;

/// Capacity and retry limits for a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueLimits {
    /// Maximum live mutations; enqueue beyond this fails
    pub max_pending: usize,
    /// A mutation is discarded once its attempts exceed this ceiling
    pub max_retries: u32,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            max_pending: DEFAULT_MAX_PENDING,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// What happened to a mutation after a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Back to PENDING for another attempt
    Retry { attempts: u32 },
    /// Retries exhausted; the mutation is now DISCARDED
    Discarded { attempts: u32 },
}

/// Ordered store of mutations with per-item lifecycle state.
#[derive(Debug, Clone, Default)]
pub struct MutationQueue {
    limits: QueueLimits,
    /// All mutations not yet dismissed, ordered by `created_at`
    items: Vec<Mutation>,
}

impl MutationQueue {
    /// Create an empty queue.
    pub fn new(limits: QueueLimits) -> Self {
        Self {
            limits,
            items: Vec::new(),
        }
    }

    /// Rebuild a queue from persisted mutations.
    ///
    /// Items are re-sorted by creation time. Anything that was IN_FLIGHT when
    /// the process stopped reverts to PENDING: no response was confirmed, and
    /// redelivery is safe because the server deduplicates by key. Returns the
    /// queue and the ids that were reverted.
    pub fn restore(
        limits: QueueLimits,
        mutations: impl IntoIterator<Item = Mutation>,
    ) -> (Self, Vec<MutationId>) {
        let mut items: Vec<Mutation> = mutations.into_iter().collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let mut reverted = Vec::new();
        for m in items.iter_mut() {
            if m.status == MutationStatus::InFlight {
                m.status = MutationStatus::Pending;
                reverted.push(m.id.clone());
            }
        }

        (Self { limits, items }, reverted)
    }

    /// Get the configured limits.
    pub fn limits(&self) -> QueueLimits {
        self.limits
    }

    /// Append a new mutation in creation order.
    pub fn enqueue(&mut self, mutation: Mutation) -> Result<()> {
        self.check(&mutation)?;
        self.items.push(mutation);
        Ok(())
    }

    /// Whether `enqueue` would accept this mutation, without changing anything.
    pub fn check(&self, mutation: &Mutation) -> Result<()> {
        if mutation.status != MutationStatus::Pending {
            return Err(Error::InvalidTransition {
                id: mutation.id.clone(),
                from: mutation.status,
                to: MutationStatus::Pending,
            });
        }

        if self.depth() >= self.limits.max_pending {
            return Err(Error::CapacityExceeded {
                limit: self.limits.max_pending,
            });
        }

        if self.position(&mutation.id).is_some() {
            return Err(Error::DuplicateMutation(mutation.id.clone()));
        }

        if let Some(tail) = self.items.last() {
            if mutation.created_at <= tail.created_at {
                return Err(Error::OutOfOrder {
                    id: mutation.id.clone(),
                });
            }
        }

        Ok(())
    }

    /// The oldest contiguous run of PENDING mutations, up to `max_size`.
    ///
    /// Terminal mutations are skipped; the run stops at the first live
    /// mutation that is not PENDING.
    pub fn peek_batch(&self, max_size: usize) -> Vec<Mutation> {
        self.items
            .iter()
            .filter(|m| m.is_live())
            .take_while(|m| m.status == MutationStatus::Pending)
            .take(max_size)
            .cloned()
            .collect()
    }

    /// Move a batch from PENDING to IN_FLIGHT.
    ///
    /// All ids are checked before any is changed.
    pub fn mark_in_flight(&mut self, ids: &[MutationId]) -> Result<()> {
        self.check_all(ids, MutationStatus::InFlight, |s| {
            s == MutationStatus::Pending
        })?;
        for id in ids {
            if let Some(m) = self.find_mut(id) {
                m.status = MutationStatus::InFlight;
            }
        }
        Ok(())
    }

    /// Mark delivered mutations as ACKED.
    ///
    /// All ids are checked before any is changed.
    pub fn mark_acked(&mut self, ids: &[MutationId]) -> Result<()> {
        self.check_all(ids, MutationStatus::Acked, |s| s.is_live())?;
        for id in ids {
            if let Some(m) = self.find_mut(id) {
                m.status = MutationStatus::Acked;
                m.last_error = None;
            }
        }
        Ok(())
    }

    /// Record a failed delivery attempt.
    ///
    /// Increments `attempts`. The mutation returns to PENDING unless the
    /// attempts now exceed the retry ceiling, in which case it is DISCARDED.
    pub fn mark_failed(&mut self, id: &str, error: MutationError) -> Result<FailOutcome> {
        let max_retries = self.limits.max_retries;
        let m = self.live_mut(id, MutationStatus::Pending)?;

        m.attempts = m.attempts.saturating_add(1);
        m.last_error = Some(error);

        if m.attempts > max_retries {
            m.status = MutationStatus::Discarded;
            Ok(FailOutcome::Discarded {
                attempts: m.attempts,
            })
        } else {
            m.status = MutationStatus::Pending;
            Ok(FailOutcome::Retry {
                attempts: m.attempts,
            })
        }
    }

    /// Discard a mutation that must not be retried (validation or conflict).
    ///
    /// `attempts` is left unchanged.
    pub fn discard(&mut self, id: &str, error: MutationError) -> Result<()> {
        let m = self.live_mut(id, MutationStatus::Discarded)?;
        m.status = MutationStatus::Discarded;
        m.last_error = Some(error);
        Ok(())
    }

    /// Return every IN_FLIGHT mutation to PENDING without counting an attempt.
    ///
    /// Used when the outcome of a batch is unknown.
    pub fn revert_in_flight(&mut self) -> Vec<MutationId> {
        let mut reverted = Vec::new();
        for m in self.items.iter_mut() {
            if m.status == MutationStatus::InFlight {
                m.status = MutationStatus::Pending;
                reverted.push(m.id.clone());
            }
        }
        reverted
    }

    /// Remove terminal mutations the UI has observed.
    ///
    /// Live mutations and unknown ids are left alone. Returns the removed ids.
    pub fn dismiss(&mut self, ids: &[MutationId]) -> Vec<MutationId> {
        let mut removed = Vec::new();
        self.items.retain(|m| {
            if m.status.is_terminal() && ids.contains(&m.id) {
                removed.push(m.id.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Count of PENDING and IN_FLIGHT mutations.
    pub fn depth(&self) -> usize {
        self.items.iter().filter(|m| m.is_live()).count()
    }

    /// Whether any mutation is currently IN_FLIGHT.
    pub fn has_in_flight(&self) -> bool {
        self.items
            .iter()
            .any(|m| m.status == MutationStatus::InFlight)
    }

    /// Whether a PENDING mutation is waiting.
    pub fn has_pending(&self) -> bool {
        self.items
            .iter()
            .any(|m| m.status == MutationStatus::Pending)
    }

    /// Get a mutation by id.
    pub fn get(&self, id: &str) -> Option<&Mutation> {
        self.items.iter().find(|m| m.id == id)
    }

    /// All mutations in creation order, terminal ones included.
    pub fn iter(&self) -> impl Iterator<Item = &Mutation> {
        self.items.iter()
    }

    /// Terminal mutations still awaiting dismissal.
    pub fn terminal(&self) -> impl Iterator<Item = &Mutation> {
        self.items.iter().filter(|m| m.status.is_terminal())
    }

    /// Total mutations held, terminal ones included.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the queue holds nothing at all.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|m| m.id == id)
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut Mutation> {
        self.items.iter_mut().find(|m| m.id == id)
    }

    fn live_mut(&mut self, id: &str, to: MutationStatus) -> Result<&mut Mutation> {
        let m = self
            .find_mut(id)
            .ok_or_else(|| Error::MutationNotFound(id.to_string()))?;
        if !m.is_live() {
            return Err(Error::InvalidTransition {
                id: id.to_string(),
                from: m.status,
                to,
            });
        }
        Ok(m)
    }

    fn check_all(
        &self,
        ids: &[MutationId],
        to: MutationStatus,
        allowed: impl Fn(MutationStatus) -> bool,
    ) -> Result<()> {
        for id in ids {
            let m = self
                .get(id)
                .ok_or_else(|| Error::MutationNotFound(id.clone()))?;
            if !allowed(m.status) {
                return Err(Error::InvalidTransition {
                    id: id.clone(),
                    from: m.status,
                    to,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChatMessage, MutationPayload};
    use proptest::prelude::*;

    fn chat(id: &str, created_at: u64) -> Mutation {
        Mutation::new(
            id,
            format!("chat-{}", id),
            MutationPayload::ChatMessage(ChatMessage {
                channel: "site".into(),
                body: format!("message {}", id),
            }),
            None,
            created_at,
        )
    }

    fn queue_with(ids: &[&str]) -> MutationQueue {
        let mut queue = MutationQueue::new(QueueLimits::default());
        for (i, id) in ids.iter().enumerate() {
            queue.enqueue(chat(id, 1000 + i as u64)).unwrap();
        }
        queue
    }

    fn ids(batch: &[Mutation]) -> Vec<MutationId> {
        batch.iter().map(|m| m.id.clone()).collect()
    }

    #[test]
    fn enqueue_preserves_creation_order() {
        let queue = queue_with(&["a", "b", "c"]);
        assert_eq!(ids(&queue.peek_batch(10)), vec!["a", "b", "c"]);
        assert_eq!(queue.depth(), 3);
    }

    #[test]
    fn enqueue_capacity_exceeded() {
        let mut queue = MutationQueue::new(QueueLimits {
            max_pending: 2,
            max_retries: 3,
        });
        queue.enqueue(chat("a", 1)).unwrap();
        queue.enqueue(chat("b", 2)).unwrap();
        assert_eq!(
            queue.enqueue(chat("c", 3)),
            Err(Error::CapacityExceeded { limit: 2 })
        );

        // Terminal items do not count toward capacity
        queue.mark_in_flight(&["a".to_string()]).unwrap();
        queue.mark_acked(&["a".to_string()]).unwrap();
        queue.enqueue(chat("c", 3)).unwrap();
    }

    #[test]
    fn enqueue_rejects_duplicates_and_reordering() {
        let mut queue = queue_with(&["a"]);
        assert_eq!(
            queue.enqueue(chat("a", 5000)),
            Err(Error::DuplicateMutation("a".into()))
        );
        assert_eq!(
            queue.enqueue(chat("z", 10)),
            Err(Error::OutOfOrder { id: "z".into() })
        );
    }

    #[test]
    fn peek_batch_is_read_only_and_bounded() {
        let queue = queue_with(&["a", "b", "c"]);
        assert_eq!(ids(&queue.peek_batch(2)), vec!["a", "b"]);
        assert_eq!(ids(&queue.peek_batch(2)), vec!["a", "b"]);
        assert!(queue.peek_batch(0).is_empty());
    }

    #[test]
    fn peek_batch_stops_at_in_flight() {
        let mut queue = queue_with(&["a", "b"]);
        queue.mark_in_flight(&["a".to_string()]).unwrap();
        queue.enqueue(chat("c", 5000)).unwrap();
        assert!(queue.peek_batch(10).is_empty());
    }

    #[test]
    fn peek_batch_skips_terminal() {
        let mut queue = queue_with(&["a", "b"]);
        queue.mark_in_flight(&["a".to_string()]).unwrap();
        queue.mark_acked(&["a".to_string()]).unwrap();
        assert_eq!(ids(&queue.peek_batch(10)), vec!["b"]);
    }

    #[test]
    fn mark_in_flight_is_all_or_nothing() {
        let mut queue = queue_with(&["a", "b"]);
        queue.mark_in_flight(&["b".to_string()]).unwrap();

        let err = queue
            .mark_in_flight(&["a".to_string(), "b".to_string()])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(queue.get("a").unwrap().status, MutationStatus::Pending);

        assert_eq!(
            queue.mark_in_flight(&["nope".to_string()]),
            Err(Error::MutationNotFound("nope".into()))
        );
    }

    #[test]
    fn mark_failed_retries_then_discards() {
        let mut queue = MutationQueue::new(QueueLimits {
            max_pending: 10,
            max_retries: 2,
        });
        queue.enqueue(chat("a", 1)).unwrap();
        let id = vec!["a".to_string()];

        for expected in 1..=2 {
            queue.mark_in_flight(&id).unwrap();
            let outcome = queue
                .mark_failed("a", MutationError::transient("timeout"))
                .unwrap();
            assert_eq!(outcome, FailOutcome::Retry { attempts: expected });
            assert_eq!(queue.get("a").unwrap().status, MutationStatus::Pending);
        }

        queue.mark_in_flight(&id).unwrap();
        let outcome = queue
            .mark_failed("a", MutationError::transient("timeout"))
            .unwrap();
        assert_eq!(outcome, FailOutcome::Discarded { attempts: 3 });

        let m = queue.get("a").unwrap();
        assert_eq!(m.status, MutationStatus::Discarded);
        assert_eq!(m.last_error, Some(MutationError::transient("timeout")));
        assert_eq!(queue.depth(), 0);
    }

    #[test]
    fn discard_keeps_attempts() {
        let mut queue = queue_with(&["d"]);
        queue.mark_in_flight(&["d".to_string()]).unwrap();
        queue
            .discard("d", MutationError::validation("quantity missing unit"))
            .unwrap();

        let m = queue.get("d").unwrap();
        assert_eq!(m.status, MutationStatus::Discarded);
        assert_eq!(m.attempts, 0);

        // Terminal mutations cannot be transitioned again
        assert!(queue
            .mark_failed("d", MutationError::transient("late"))
            .is_err());
        assert!(queue.mark_acked(&["d".to_string()]).is_err());
    }

    #[test]
    fn revert_in_flight_counts_nothing() {
        let mut queue = queue_with(&["a", "b", "c"]);
        queue
            .mark_in_flight(&["a".to_string(), "b".to_string()])
            .unwrap();

        let reverted = queue.revert_in_flight();
        assert_eq!(reverted, vec!["a", "b"]);
        assert!(queue.iter().all(|m| m.attempts == 0));
        assert_eq!(ids(&queue.peek_batch(10)), vec!["a", "b", "c"]);
    }

    #[test]
    fn restore_reverts_in_flight_and_sorts() {
        let mut a = chat("a", 10);
        a.status = MutationStatus::Acked;
        let mut b = chat("b", 20);
        b.status = MutationStatus::InFlight;
        b.attempts = 1;
        let c = chat("c", 30);

        let (queue, reverted) = MutationQueue::restore(QueueLimits::default(), vec![c, a, b]);

        assert_eq!(reverted, vec!["b"]);
        let order: Vec<_> = queue.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);

        let b = queue.get("b").unwrap();
        assert_eq!(b.status, MutationStatus::Pending);
        assert_eq!(b.attempts, 1);
        assert_eq!(queue.depth(), 2);
    }

    #[test]
    fn dismiss_only_removes_terminal() {
        let mut queue = queue_with(&["a", "b"]);
        queue.mark_in_flight(&["a".to_string()]).unwrap();
        queue.mark_acked(&["a".to_string()]).unwrap();

        let removed = queue.dismiss(&["a".to_string(), "b".to_string(), "x".to_string()]);
        assert_eq!(removed, vec!["a"]);
        assert_eq!(queue.len(), 1);
        assert!(queue.get("b").is_some());
    }

    proptest! {
        #[test]
        fn batches_drain_in_enqueue_order(count in 1usize..40, batch in 1usize..8) {
            let mut queue = MutationQueue::new(QueueLimits::default());
            let expected: Vec<String> = (0..count).map(|i| format!("m{:03}", i)).collect();
            for (i, id) in expected.iter().enumerate() {
                queue.enqueue(chat(id, i as u64 + 1)).unwrap();
            }

            let mut delivered = Vec::new();
            loop {
                let next = ids(&queue.peek_batch(batch));
                if next.is_empty() {
                    break;
                }
                queue.mark_in_flight(&next).unwrap();
                queue.mark_acked(&next).unwrap();
                delivered.extend(next);
            }

            prop_assert_eq!(delivered, expected);
            prop_assert_eq!(queue.depth(), 0);
        }

        #[test]
        fn depth_counts_live_only(failures in proptest::collection::vec(any::<bool>(), 1..30)) {
            let mut queue = MutationQueue::new(QueueLimits { max_pending: 100, max_retries: 0 });
            for (i, _) in failures.iter().enumerate() {
                queue.enqueue(chat(&format!("m{}", i), i as u64 + 1)).unwrap();
            }
            for (i, fail) in failures.iter().enumerate() {
                let id = format!("m{}", i);
                queue.mark_in_flight(&[id.clone()]).unwrap();
                if *fail {
                    queue.mark_failed(&id, MutationError::transient("x")).unwrap();
                } else {
                    queue.mark_acked(&[id]).unwrap();
                }
            }
            let live = queue
                .iter()
                .filter(|m| matches!(m.status, MutationStatus::Pending | MutationStatus::InFlight))
                .count();
            prop_assert_eq!(queue.depth(), live);
            prop_assert_eq!(queue.depth(), 0);
        }
    }
}
