//! Sync handler - applies a batch of client mutations.

use sitesync_engine::{ItemResult, MutationPayload, Outcome, SyncRequest, SyncResponse};

use crate::db::Ledger;
use crate::error::{AppError, Result};

/// Largest batch accepted in one request.
pub const MAX_BATCH: usize = 500;

/// Process a sync request. Items are applied in order, one result each.
pub async fn handle_sync(ledger: &Ledger, request: SyncRequest) -> Result<SyncResponse> {
    if request.mutations.len() > MAX_BATCH {
        return Err(AppError::BatchTooLarge {
            size: request.mutations.len(),
            limit: MAX_BATCH,
        });
    }

    let mut results = Vec::with_capacity(request.mutations.len());

    for item in &request.mutations {
        let key = item.idempotency_key.clone();

        // Redelivery of something already applied
        if let Some(r) = ledger.receipt(&key).await? {
            results.push(ItemResult::duplicate(key, r.server_id, r.version));
            continue;
        }

        let payload = match item.to_payload().and_then(|p| p.validate().map(|()| p)) {
            Ok(payload) => payload,
            Err(e) => {
                results.push(ItemResult::rejected(key, e.to_string()));
                continue;
            }
        };

        if let MutationPayload::Dpr(report) = &payload {
            if !ledger.attendance_present(&report.date).await? {
                results.push(ItemResult::rejected(
                    key,
                    format!("attendance for {} is not marked present", report.date),
                ));
                continue;
            }
        }

        results.push(ledger.apply(&request.client_id, item, &payload).await?);
    }

    let count = |o: Outcome| results.iter().filter(|r| r.outcome == o).count();
    tracing::info!(
        "Sync from {}: {} accepted, {} duplicate, {} rejected",
        request.client_id,
        count(Outcome::Accepted),
        count(Outcome::Duplicate),
        count(Outcome::Rejected)
    );

    Ok(SyncResponse { results })
}
