//! Record store contract for the delivery engine.
//!
//! Trait-based abstraction over queue persistence so the engine can run
//! against PostgreSQL in production and an in-memory store in tests and
//! embedded deployments. The contract is small but strict: `claim_due` must
//! select by the due-predicate, order by priority then age, and mark the
//! selected identifiers locked in one atomic step.

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use courier_core::{
    error::Result,
    storage::Storage,
    Clock, MessageId, NewMessage, QueuedMessage, STALE_LOCK_WINDOW,
};

/// Storage operations required by the enqueuer and the processor.
///
/// Implementations must make `claim_due` atomic with respect to concurrent
/// callers: two overlapping invocations never return the same record. Every
/// mutation is keyed by record identity, never by re-checking prior field
/// values.
pub trait QueueStore: Send + Sync + 'static {
    /// Inserts a new message and returns the stored record.
    fn insert(
        &self,
        message: NewMessage,
    ) -> Pin<Box<dyn Future<Output = Result<QueuedMessage>> + Send + '_>>;

    /// Atomically selects and locks up to `limit` due messages.
    ///
    /// A message is due when its attempt budget is unspent and it is either
    /// unlocked or stalely locked. Results are ordered ascending by priority,
    /// then by creation time. An empty qualifying set performs no write.
    fn claim_due(
        &self,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<QueuedMessage>>> + Send + '_>>;

    /// Permanently deletes a message after successful delivery.
    fn remove(&self, id: MessageId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Unlocks a message and stores its incremented attempt count after a
    /// failed delivery. The message is immediately selectable again.
    fn release_for_retry(
        &self,
        id: MessageId,
        attempts: i32,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Finds a message by ID, for inspection and monitoring.
    fn find(
        &self,
        id: MessageId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<QueuedMessage>>> + Send + '_>>;

    /// Counts all messages currently in the queue.
    fn count(&self) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>>;

    /// Counts messages whose attempt budget is spent.
    fn count_exhausted(&self) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>>;
}

/// Production store backed by PostgreSQL.
///
/// Thin adapter over the core repository: computes the staleness horizon
/// from the injected clock and delegates each operation.
pub struct PostgresQueueStore {
    storage: Arc<Storage>,
    clock: Arc<dyn Clock>,
    stale_window: Duration,
}

impl PostgresQueueStore {
    /// Creates a new PostgreSQL store adapter with the default stale window.
    pub fn new(storage: Arc<Storage>, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock, stale_window: STALE_LOCK_WINDOW }
    }

    /// Overrides the stale-lock window.
    #[must_use]
    pub fn with_stale_window(mut self, window: Duration) -> Self {
        self.stale_window = window;
        self
    }

    fn stale_horizon(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.stale_window)
            .unwrap_or_else(|_| chrono::Duration::minutes(10))
    }
}

impl QueueStore for PostgresQueueStore {
    fn insert(
        &self,
        message: NewMessage,
    ) -> Pin<Box<dyn Future<Output = Result<QueuedMessage>> + Send + '_>> {
        let storage = self.storage.clone();
        let now = self.clock.now_utc();
        Box::pin(async move { storage.mail_queue.insert(&message, now).await })
    }

    fn claim_due(
        &self,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<QueuedMessage>>> + Send + '_>> {
        let storage = self.storage.clone();
        let now = self.clock.now_utc();
        let stale_before = now - self.stale_horizon();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Box::pin(async move { storage.mail_queue.claim_due(limit, stale_before, now).await })
    }

    fn remove(&self, id: MessageId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.mail_queue.remove(id).await })
    }

    fn release_for_retry(
        &self,
        id: MessageId,
        attempts: i32,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        let now = self.clock.now_utc();
        Box::pin(async move { storage.mail_queue.release_for_retry(id, attempts, now).await })
    }

    fn find(
        &self,
        id: MessageId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<QueuedMessage>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.mail_queue.find_by_id(id).await })
    }

    fn count(&self) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move {
            storage.mail_queue.count().await.map(|n| u64::try_from(n).unwrap_or(0))
        })
    }

    fn count_exhausted(&self) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move {
            storage.mail_queue.count_exhausted().await.map(|n| u64::try_from(n).unwrap_or(0))
        })
    }
}

pub mod mem {
    //! In-memory queue store.
    //!
    //! Implements the full contract semantics — selection predicate,
    //! ordering, staleness, and atomic claiming — rather than canned
    //! responses, so engine tests exercise the real protocol. The claim runs
    //! inside a single mutex-guarded critical section, which is the
    //! in-process equivalent of the repository's claim transaction.

    use std::{
        collections::VecDeque,
        future::Future,
        pin::Pin,
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc,
        },
        time::Duration,
    };

    use chrono::{DateTime, Utc};
    use courier_core::{
        error::{CoreError, Result},
        Clock, MessageId, NewMessage, QueuedMessage, SystemClock, STALE_LOCK_WINDOW,
    };
    use tokio::sync::Mutex;

    use super::QueueStore;

    /// In-memory store with full queue semantics.
    pub struct MemoryQueueStore {
        state: Arc<Mutex<Vec<QueuedMessage>>>,
        clock: Arc<dyn Clock>,
        stale_window: Duration,
        mutations: Arc<AtomicU64>,
        claim_errors: Arc<Mutex<VecDeque<String>>>,
    }

    impl MemoryQueueStore {
        /// Creates an empty store on the system clock.
        pub fn new() -> Self {
            Self::with_clock(Arc::new(SystemClock::new()))
        }

        /// Creates an empty store reading time from the given clock.
        pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
            Self {
                state: Arc::new(Mutex::new(Vec::new())),
                clock,
                stale_window: STALE_LOCK_WINDOW,
                mutations: Arc::new(AtomicU64::new(0)),
                claim_errors: Arc::new(Mutex::new(VecDeque::new())),
            }
        }

        /// Overrides the stale-lock window.
        #[must_use]
        pub fn with_stale_window(mut self, window: Duration) -> Self {
            self.stale_window = window;
            self
        }

        /// Injects an error for the next claim operation.
        pub async fn inject_claim_error(&self, message: impl Into<String>) {
            self.claim_errors.lock().await.push_back(message.into());
        }

        /// Marks a message locked as of the given instant, simulating a
        /// worker that claimed it and then died.
        pub async fn force_lock(&self, id: MessageId, locked_at: DateTime<Utc>) {
            let mut state = self.state.lock().await;
            if let Some(message) = state.iter_mut().find(|m| m.id == id) {
                message.locked = true;
                message.updated_at = locked_at;
            }
        }

        /// Overwrites a message's attempt counter.
        pub async fn set_attempts(&self, id: MessageId, attempts: i32) {
            let mut state = self.state.lock().await;
            if let Some(message) = state.iter_mut().find(|m| m.id == id) {
                message.attempts = attempts;
            }
        }

        /// Returns a snapshot of every stored message.
        pub async fn all(&self) -> Vec<QueuedMessage> {
            self.state.lock().await.clone()
        }

        /// Number of state-changing writes performed since creation.
        pub fn mutation_count(&self) -> u64 {
            self.mutations.load(Ordering::Acquire)
        }

        fn stale_horizon(&self) -> chrono::Duration {
            chrono::Duration::from_std(self.stale_window)
                .unwrap_or_else(|_| chrono::Duration::minutes(10))
        }

        fn is_due(message: &QueuedMessage, stale_before: DateTime<Utc>) -> bool {
            message.attempts < message.max_attempts
                && (!message.locked || message.updated_at < stale_before)
        }
    }

    impl Default for MemoryQueueStore {
        fn default() -> Self {
            Self::new()
        }
    }

    impl QueueStore for MemoryQueueStore {
        fn insert(
            &self,
            message: NewMessage,
        ) -> Pin<Box<dyn Future<Output = Result<QueuedMessage>> + Send + '_>> {
            let state = self.state.clone();
            let mutations = self.mutations.clone();
            let now = self.clock.now_utc();

            Box::pin(async move {
                let stored = QueuedMessage {
                    id: MessageId::new(),
                    payload: message.payload,
                    priority: message.priority,
                    attempts: 0,
                    max_attempts: message.max_attempts,
                    locked: false,
                    created_at: now,
                    updated_at: now,
                };
                state.lock().await.push(stored.clone());
                mutations.fetch_add(1, Ordering::AcqRel);
                Ok(stored)
            })
        }

        fn claim_due(
            &self,
            limit: usize,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<QueuedMessage>>> + Send + '_>> {
            let state = self.state.clone();
            let mutations = self.mutations.clone();
            let claim_errors = self.claim_errors.clone();
            let now = self.clock.now_utc();
            let stale_before = now - self.stale_horizon();

            Box::pin(async move {
                if let Some(message) = claim_errors.lock().await.pop_front() {
                    return Err(CoreError::Database(message));
                }

                // One critical section covers selection and marking; a
                // concurrent claimant sees either none or all of this claim.
                let mut state = state.lock().await;

                let mut candidates: Vec<(i32, DateTime<Utc>, usize)> = state
                    .iter()
                    .enumerate()
                    .filter(|(_, m)| Self::is_due(m, stale_before))
                    .map(|(index, m)| (m.priority, m.created_at, index))
                    .collect();
                candidates.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));
                candidates.truncate(limit);

                if candidates.is_empty() {
                    return Ok(Vec::new());
                }

                let mut claimed = Vec::with_capacity(candidates.len());
                for (_, _, index) in candidates {
                    let message = &mut state[index];
                    message.locked = true;
                    message.updated_at = now;
                    claimed.push(message.clone());
                }
                mutations.fetch_add(1, Ordering::AcqRel);

                Ok(claimed)
            })
        }

        fn remove(&self, id: MessageId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let state = self.state.clone();
            let mutations = self.mutations.clone();

            Box::pin(async move {
                let mut state = state.lock().await;
                let before = state.len();
                state.retain(|m| m.id != id);
                if state.len() != before {
                    mutations.fetch_add(1, Ordering::AcqRel);
                }
                Ok(())
            })
        }

        fn release_for_retry(
            &self,
            id: MessageId,
            attempts: i32,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let state = self.state.clone();
            let mutations = self.mutations.clone();
            let now = self.clock.now_utc();

            Box::pin(async move {
                let mut state = state.lock().await;
                if let Some(message) = state.iter_mut().find(|m| m.id == id) {
                    message.locked = false;
                    message.attempts = attempts;
                    message.updated_at = now;
                    mutations.fetch_add(1, Ordering::AcqRel);
                }
                Ok(())
            })
        }

        fn find(
            &self,
            id: MessageId,
        ) -> Pin<Box<dyn Future<Output = Result<Option<QueuedMessage>>> + Send + '_>> {
            let state = self.state.clone();
            Box::pin(async move { Ok(state.lock().await.iter().find(|m| m.id == id).cloned()) })
        }

        fn count(&self) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
            let state = self.state.clone();
            Box::pin(async move { Ok(state.lock().await.len() as u64) })
        }

        fn count_exhausted(&self) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
            let state = self.state.clone();
            Box::pin(async move {
                Ok(state.lock().await.iter().filter(|m| m.is_exhausted()).count() as u64)
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use courier_core::{MailPayload, NewMessage, TestClock};

    use super::{mem::MemoryQueueStore, QueueStore};

    fn message(subject: &str, priority: i32) -> NewMessage {
        NewMessage {
            payload: MailPayload::plain(subject, "body", "sender@example.com", "user@example.com"),
            priority,
            max_attempts: 3,
        }
    }

    #[tokio::test]
    async fn claim_orders_by_priority_then_age() {
        let clock = Arc::new(TestClock::new());
        let store = MemoryQueueStore::with_clock(clock.clone());

        store.insert(message("low", 5)).await.unwrap();
        clock.advance(Duration::from_secs(1));
        store.insert(message("urgent-old", 0)).await.unwrap();
        clock.advance(Duration::from_secs(1));
        store.insert(message("urgent-new", 0)).await.unwrap();

        let claimed = store.claim_due(10).await.unwrap();
        let subjects: Vec<_> = claimed.iter().map(|m| m.payload.subject.as_str()).collect();
        assert_eq!(subjects, vec!["urgent-old", "urgent-new", "low"]);
    }

    #[tokio::test]
    async fn claimed_messages_are_locked_and_not_reclaimable() {
        let store = MemoryQueueStore::new();
        store.insert(message("one", 3)).await.unwrap();

        let first = store.claim_due(10).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(first[0].locked);

        let second = store.claim_due(10).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn empty_queue_claim_performs_no_writes() {
        let store = MemoryQueueStore::new();
        let writes_before = store.mutation_count();

        let claimed = store.claim_due(10).await.unwrap();

        assert!(claimed.is_empty());
        assert_eq!(store.mutation_count(), writes_before);
    }

    #[tokio::test]
    async fn release_for_retry_makes_message_immediately_selectable() {
        let store = MemoryQueueStore::new();
        let stored = store.insert(message("retry-me", 3)).await.unwrap();

        let claimed = store.claim_due(10).await.unwrap();
        assert_eq!(claimed.len(), 1);

        store.release_for_retry(stored.id, claimed[0].attempts + 1).await.unwrap();

        let reclaimed = store.claim_due(10).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].attempts, 1);
    }

    #[tokio::test]
    async fn concurrent_claims_never_overlap() {
        let store = Arc::new(MemoryQueueStore::new());
        for i in 0..10 {
            store.insert(message(&format!("m{i}"), 3)).await.unwrap();
        }

        let (a, b) = tokio::join!(store.claim_due(5), store.claim_due(5));
        let a = a.unwrap();
        let b = b.unwrap();

        assert_eq!(a.len() + b.len(), 10);
        for claimed in &a {
            assert!(!b.iter().any(|m| m.id == claimed.id));
        }
    }
}
