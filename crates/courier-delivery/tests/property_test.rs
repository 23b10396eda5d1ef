//! Property-based tests for the claim contract.
//!
//! Generates arbitrary queue populations — mixed priorities, spent and
//! unspent budgets, fresh and stale locks — and validates the selection
//! invariants of `claim_due` over the in-memory store: the claimed set is
//! bounded, qualified, complete, and correctly ordered.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use courier_core::{Clock, MailPayload, NewMessage, QueuedMessage, TestClock};
use courier_delivery::store::{mem::MemoryQueueStore, QueueStore};
use proptest::prelude::*;

const STALE_WINDOW_MINS: i64 = 10;

#[derive(Debug, Clone)]
struct Seed {
    priority: i32,
    attempts: i32,
    max_attempts: i32,
    locked_mins_ago: Option<i64>,
}

fn seed_strategy() -> impl Strategy<Value = Seed> {
    (0i32..5, 0i32..5, 1i32..5, prop::option::of(0i64..30)).prop_map(
        |(priority, attempts, max_attempts, locked_mins_ago)| Seed {
            priority,
            attempts,
            max_attempts,
            locked_mins_ago,
        },
    )
}

fn qualifies(message: &QueuedMessage, stale_before: DateTime<Utc>) -> bool {
    message.attempts < message.max_attempts
        && (!message.locked || message.updated_at < stale_before)
}

async fn populate(store: &MemoryQueueStore, clock: &TestClock, seeds: &[Seed]) {
    for (i, seed) in seeds.iter().enumerate() {
        let stored = store
            .insert(NewMessage {
                payload: MailPayload::plain(
                    format!("m{i}"),
                    "body",
                    "sender@example.com",
                    "user@example.com",
                ),
                priority: seed.priority,
                max_attempts: seed.max_attempts,
            })
            .await
            .unwrap();

        store.set_attempts(stored.id, seed.attempts).await;
        if let Some(mins_ago) = seed.locked_mins_ago {
            store.force_lock(stored.id, clock.now_utc() - chrono::Duration::minutes(mins_ago)).await;
        }
    }
}

proptest! {
    /// The claimed set is bounded by the limit, every member qualified
    /// before the claim, and no qualified message is left behind when the
    /// batch has room.
    #[test]
    fn claim_selects_exactly_the_due_set(
        seeds in prop::collection::vec(seed_strategy(), 0..40),
        limit in 0usize..50,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let clock = Arc::new(TestClock::new());
            let store = MemoryQueueStore::with_clock(clock.clone());
            populate(&store, &clock, &seeds).await;

            let snapshot = store.all().await;
            let stale_before = clock.now_utc() - chrono::Duration::minutes(STALE_WINDOW_MINS);
            let qualifying: Vec<_> =
                snapshot.iter().filter(|m| qualifies(m, stale_before)).collect();

            let claimed = store.claim_due(limit).await.unwrap();

            prop_assert!(claimed.len() <= limit);
            prop_assert_eq!(claimed.len(), qualifying.len().min(limit));

            for message in &claimed {
                let before = snapshot
                    .iter()
                    .find(|m| m.id == message.id)
                    .expect("claimed message must come from the store");
                prop_assert!(qualifies(before, stale_before));
                prop_assert!(message.locked);
            }
            Ok(())
        })?;
    }

    /// Claimed batches are ordered by priority, oldest first within a
    /// priority.
    #[test]
    fn claim_orders_by_priority_then_age(
        seeds in prop::collection::vec(seed_strategy(), 0..40),
        limit in 1usize..50,
        gap_secs in 0u64..90,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let clock = Arc::new(TestClock::new());
            let store = MemoryQueueStore::with_clock(clock.clone());

            // Space the inserts out so creation times actually differ.
            for chunk in seeds.chunks(4) {
                populate(&store, &clock, chunk).await;
                clock.advance(Duration::from_secs(gap_secs));
            }

            let claimed = store.claim_due(limit).await.unwrap();

            for pair in claimed.windows(2) {
                prop_assert!(
                    (pair[0].priority, pair[0].created_at)
                        <= (pair[1].priority, pair[1].created_at)
                );
            }
            Ok(())
        })?;
    }

    /// A second claim immediately after the first returns only what the
    /// first left behind: claims never overlap.
    #[test]
    fn sequential_claims_are_disjoint(
        seeds in prop::collection::vec(seed_strategy(), 0..40),
        limit in 1usize..20,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let clock = Arc::new(TestClock::new());
            let store = MemoryQueueStore::with_clock(clock.clone());
            populate(&store, &clock, &seeds).await;

            let first = store.claim_due(limit).await.unwrap();
            let second = store.claim_due(limit).await.unwrap();

            for message in &second {
                prop_assert!(!first.iter().any(|m| m.id == message.id));
            }
            Ok(())
        })?;
    }
}
