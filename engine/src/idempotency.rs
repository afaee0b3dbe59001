//! Idempotency key generation.
//!
//! Keys are UUIDv7: a millisecond timestamp prefix followed by random bits, so
//! they are collision-free across the lifetime of an install and sort roughly
//! by creation time. A key is issued once when a mutation is created and is
//! never regenerated on retry.

use crate::MutationId;
use uuid::Uuid;

/// Issues idempotency keys for new mutations.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdempotencyKeyGenerator {
    issued: u64,
}

impl IdempotencyKeyGenerator {
    /// Create a new generator.
    pub fn new() -> Self {
        Self { issued: 0 }
    }

    /// Issue a fresh key.
    pub fn next_key(&mut self) -> MutationId {
        self.issued += 1;
        Uuid::now_v7().to_string()
    }

    /// Number of keys issued by this generator.
    pub fn issued(&self) -> u64 {
        self.issued
    }
}

impl Iterator for IdempotencyKeyGenerator {
    type Item = MutationId;

    fn next(&mut self) -> Option<MutationId> {
        Some(self.next_key())
    }
}
