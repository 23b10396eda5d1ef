//! The claim/process/resolve cycle.
//!
//! One `process_batch` invocation claims a bounded batch of due messages in
//! priority order, dispatches each to the transport, and resolves every
//! claim: delivered messages are deleted, failed ones are unlocked with an
//! incremented attempt count. Records are resolved independently — a
//! transport fault or a storage fault on one message never aborts its
//! siblings.

use std::sync::Arc;

use courier_core::QueuedMessage;
use tracing::{debug, error, info, warn};

use crate::{
    error::{DeliveryError, Result},
    store::QueueStore,
    transport::Transport,
};

/// Counters for one batch invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Messages claimed this invocation.
    pub claimed: usize,
    /// Messages delivered and removed.
    pub delivered: usize,
    /// Messages released for retry after a failed attempt.
    pub requeued: usize,
    /// Messages whose resolution write failed; they remain locked until the
    /// stale window reclaims them.
    pub unresolved: usize,
}

/// Drains the queue one batch at a time.
///
/// Safe to invoke concurrently from multiple workers sharing one store: the
/// store's atomic claim guarantees each message is handed to exactly one
/// invocation at a time.
pub struct Processor {
    store: Arc<dyn QueueStore>,
    transport: Arc<dyn Transport>,
}

impl Processor {
    /// Creates a processor over the given store and transport.
    pub fn new(store: Arc<dyn QueueStore>, transport: Arc<dyn Transport>) -> Self {
        Self { store, transport }
    }

    /// Claims and processes up to `limit` due messages.
    ///
    /// An empty qualifying set is a no-op that performs no storage writes.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Storage` if the claim itself fails; that
    /// fault aborts only this invocation and leaves no record half-claimed.
    /// Faults while resolving a single message are contained and logged.
    pub async fn process_batch(&self, limit: usize) -> Result<BatchOutcome> {
        let claimed = self
            .store
            .claim_due(limit)
            .await
            .map_err(|e| DeliveryError::storage(format!("failed to claim due messages: {e}")))?;

        let mut outcome = BatchOutcome { claimed: claimed.len(), ..BatchOutcome::default() };

        if claimed.is_empty() {
            return Ok(outcome);
        }

        debug!(batch_size = outcome.claimed, "processing claimed batch");

        for message in claimed {
            match self.process_message(message).await {
                Ok(Resolution::Delivered) => outcome.delivered += 1,
                Ok(Resolution::Requeued) => outcome.requeued += 1,
                Err(error) => {
                    // The message stays locked; staleness reclaims it later.
                    outcome.unresolved += 1;
                    error!(error = %error, "failed to resolve message after delivery attempt");
                },
            }
        }

        Ok(outcome)
    }

    /// Delivers one claimed message and persists its resolution.
    ///
    /// Any transport error counts as a failed attempt; only a storage fault
    /// while writing the resolution surfaces to the caller.
    async fn process_message(&self, message: QueuedMessage) -> Result<Resolution> {
        let attempt_number = message.attempts + 1;

        match self.transport.deliver(message.payload.clone()).await {
            Ok(receipt) => {
                self.store.remove(message.id).await.map_err(|e| {
                    DeliveryError::storage(format!("failed to remove delivered message: {e}"))
                })?;

                info!(
                    message_id = %message.id,
                    attempt_number,
                    provider_id = receipt.provider_id.as_deref().unwrap_or("-"),
                    duration_ms = receipt.duration.as_millis(),
                    "message delivered"
                );

                Ok(Resolution::Delivered)
            },
            Err(error) => {
                self.store.release_for_retry(message.id, attempt_number).await.map_err(|e| {
                    DeliveryError::storage(format!("failed to release message for retry: {e}"))
                })?;

                warn!(
                    message_id = %message.id,
                    attempt_number,
                    max_attempts = message.max_attempts,
                    error = %error,
                    "delivery failed, message released for retry"
                );

                Ok(Resolution::Requeued)
            },
        }
    }
}

enum Resolution {
    Delivered,
    Requeued,
}
