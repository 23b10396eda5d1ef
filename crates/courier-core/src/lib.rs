//! Core domain models and persistence for the courier mail queue.
//!
//! Provides strongly-typed domain primitives (message identifiers, payloads,
//! queue records), the error taxonomy, the PostgreSQL repository for the
//! durable queue table, and the clock abstraction used to make time-dependent
//! behavior (stale-lock reclamation) deterministic under test. All other
//! crates depend on these foundational types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{Charset, MailFormat, MailPayload, MessageId, NewMessage, QueuedMessage};
pub use time::{Clock, SystemClock, TestClock};

/// Duration a claimed message may sit unresolved before its lock is
/// considered stale and the message becomes eligible for re-selection.
pub const STALE_LOCK_WINDOW: std::time::Duration = std::time::Duration::from_secs(10 * 60);
