//! Database access layer implementing the repository pattern for the queue.
//!
//! The repository acts as an anti-corruption layer, translating between
//! domain models and the `mail_queue` schema. All database operations go
//! through this module; direct SQL elsewhere is forbidden to keep the claim
//! semantics in one place.

use std::sync::Arc;

use sqlx::PgPool;

pub mod mail_queue;

use crate::error::Result;

/// Container for repository instances providing unified database access.
#[derive(Clone)]
pub struct Storage {
    /// Repository for queued message operations.
    pub mail_queue: Arc<mail_queue::Repository>,
}

impl Storage {
    /// Creates a new storage instance with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self { mail_queue: Arc::new(mail_queue::Repository::new(pool)) }
    }

    /// Performs a health check on the database connection.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.mail_queue.pool()).await?;

        Ok(())
    }
}
