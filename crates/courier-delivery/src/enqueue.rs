//! Producer-facing enqueue API.
//!
//! Validates required payload fields at the boundary and inserts a new queue
//! record with its initial priority and attempt budget. Producers never see
//! delivery failures; their only synchronous error is validation.

use std::sync::Arc;

use courier_core::{error::Result, MailPayload, NewMessage, QueuedMessage};
use tracing::debug;

use crate::store::QueueStore;

/// Options recognized at enqueue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Scheduling priority; lower value is processed first.
    pub priority: i32,
    /// Attempt budget before the message goes inert.
    pub max_attempts: i32,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self { priority: 3, max_attempts: 3 }
    }
}

/// Inserts validated messages into the durable queue.
pub struct Enqueuer {
    store: Arc<dyn QueueStore>,
}

impl Enqueuer {
    /// Creates an enqueuer over the given store.
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    /// Validates and inserts one message.
    ///
    /// The insert is atomic and the returned record reflects the stored
    /// state, including the generated identifier, `attempts = 0`, and
    /// `locked = false`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` if required payload fields are
    /// missing (no record is created), or a storage error if the insert
    /// fails.
    pub async fn enqueue(
        &self,
        payload: MailPayload,
        options: EnqueueOptions,
    ) -> Result<QueuedMessage> {
        payload.validate()?;

        let stored = self
            .store
            .insert(NewMessage {
                payload,
                priority: options.priority,
                max_attempts: options.max_attempts,
            })
            .await?;

        debug!(
            message_id = %stored.id,
            priority = stored.priority,
            max_attempts = stored.max_attempts,
            "message enqueued"
        );

        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use courier_core::{CoreError, MailPayload};

    use super::*;
    use crate::store::mem::MemoryQueueStore;

    fn payload() -> MailPayload {
        MailPayload::plain("Activate your account", "yay!", "sender@example.com", "user@example.com")
    }

    #[tokio::test]
    async fn enqueue_stores_message_with_defaults() {
        let store = Arc::new(MemoryQueueStore::new());
        let enqueuer = Enqueuer::new(store.clone());

        let stored = enqueuer.enqueue(payload(), EnqueueOptions::default()).await.unwrap();

        assert_eq!(stored.priority, 3);
        assert_eq!(stored.max_attempts, 3);
        assert_eq!(stored.attempts, 0);
        assert!(!stored.locked);
        assert_eq!(store.find(stored.id).await.unwrap(), Some(stored));
    }

    #[tokio::test]
    async fn enqueue_honors_caller_options() {
        let store = Arc::new(MemoryQueueStore::new());
        let enqueuer = Enqueuer::new(store);

        let stored = enqueuer
            .enqueue(payload(), EnqueueOptions { priority: 0, max_attempts: 7 })
            .await
            .unwrap();

        assert_eq!(stored.priority, 0);
        assert_eq!(stored.max_attempts, 7);
    }

    #[tokio::test]
    async fn invalid_payload_creates_no_record() {
        let store = Arc::new(MemoryQueueStore::new());
        let enqueuer = Enqueuer::new(store.clone());

        let mut invalid = payload();
        invalid.to.clear();

        let result = enqueuer.enqueue(invalid, EnqueueOptions::default()).await;

        assert!(matches!(result, Err(CoreError::Validation(_))));
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
