//! Mail delivery engine with at-least-once guarantees.
//!
//! This crate implements the claim/process/resolve cycle that drains the
//! durable queue: workers claim a bounded batch of due messages in priority
//! order, dispatch each one to the transport, and resolve every claim to
//! either permanent removal (delivered) or an unlocked retry with an
//! incremented attempt count (failed).
//!
//! # Architecture
//!
//! 1. **Claim** — a batch of due messages is selected and locked in one
//!    atomic storage step, keyed by identifier set.
//! 2. **Deliver** — each claimed message is handed to the [`Transport`];
//!    any fault is treated as a failed attempt for that message alone.
//! 3. **Resolve** — delivered messages are deleted; failed ones are unlocked
//!    with `attempts + 1` and become immediately eligible again.
//!
//! Messages claimed by a worker that crashes stay locked until the stale
//! window elapses, after which selection reclaims them. Once a message's
//! attempt budget is spent it stops matching the selection predicate and
//! sits inert in storage.

pub mod client;
pub mod enqueue;
pub mod error;
pub mod processor;
pub mod store;
pub mod transport;
pub mod worker;

pub use client::{ClientConfig, MailApiClient};
pub use enqueue::{EnqueueOptions, Enqueuer};
pub use error::{DeliveryError, Result};
pub use processor::{BatchOutcome, Processor};
pub use store::QueueStore;
pub use transport::{DeliveryReceipt, Transport};
pub use worker::{DeliveryConfig, DeliveryWorker, WorkerPool};

/// Default number of concurrent delivery workers.
pub const DEFAULT_WORKER_COUNT: usize = 3;

/// Default maximum messages claimed per batch.
pub const DEFAULT_BATCH_LIMIT: usize = 100;
