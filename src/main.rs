//! Courier mail queue daemon.
//!
//! Main entry point for the delivery service. Loads configuration from the
//! environment, establishes the database pool, bootstraps the queue schema,
//! and runs the delivery worker pool until a shutdown signal arrives.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use courier_core::{storage::Storage, SystemClock};
use courier_delivery::{
    store::PostgresQueueStore, ClientConfig, DeliveryConfig, MailApiClient, Processor, WorkerPool,
};
use sqlx::postgres::PgPoolOptions;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Starting courier mail queue daemon");

    let config = Config::from_env()?;
    info!(
        database_url = %config.database_url_masked(),
        mail_api_url = %config.mail_api_url,
        worker_count = config.worker_count,
        batch_limit = config.batch_limit,
        "Configuration loaded"
    );

    let db_pool = create_database_pool(&config).await?;
    info!("Database connection pool established");

    run_migrations(&db_pool).await?;
    info!("Queue schema ready");

    let clock = Arc::new(SystemClock::new());
    let storage = Arc::new(Storage::new(db_pool.clone()));
    let store = Arc::new(
        PostgresQueueStore::new(storage, clock.clone())
            .with_stale_window(Duration::from_secs(config.stale_window_secs)),
    );

    let mut client_config = ClientConfig::new(&config.mail_api_url);
    if let Some(token) = &config.mail_api_token {
        client_config = client_config.with_api_token(token);
    }
    let transport = Arc::new(MailApiClient::new(client_config)?);

    let processor = Arc::new(Processor::new(store, transport));
    let delivery_config = DeliveryConfig {
        worker_count: config.worker_count,
        batch_limit: config.batch_limit,
        poll_interval: Duration::from_millis(config.poll_interval_ms),
        shutdown_timeout: Duration::from_secs(30),
    };
    let shutdown_timeout = delivery_config.shutdown_timeout;

    let mut pool = WorkerPool::new(processor, delivery_config, clock);
    pool.spawn_workers();
    info!("Courier is processing the mail queue");

    shutdown_signal().await;
    info!("Shutdown signal received, starting graceful shutdown");

    pool.shutdown_graceful(shutdown_timeout).await?;

    db_pool.close().await;
    info!("Database connections closed");

    info!("Courier shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,courier=debug"))
        .expect("Invalid RUST_LOG environment variable");

    let fmt_layer = fmt::layer().with_target(true).with_file(true).with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Creates the database connection pool with bounded connect retries.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    let mut retries = 0;
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .fetch_one(&pool)
                    .await
                    .context("Failed to verify database connection")?;

                return Ok(pool);
            },
            Err(_e) if retries < MAX_RETRIES => {
                retries += 1;
                info!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    "Database connection failed, retrying..."
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("Failed to create database connection pool after retries");
            },
        }
    }
}

/// Ensures the queue table and its selection index exist.
async fn run_migrations(pool: &sqlx::PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS mail_queue (
            id UUID PRIMARY KEY,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            from_addrs TEXT NOT NULL,
            to_addrs TEXT NOT NULL,
            cc_addrs TEXT NOT NULL DEFAULT '',
            bcc_addrs TEXT NOT NULL DEFAULT '',
            content_type TEXT NOT NULL,
            charset TEXT NOT NULL,
            metadata JSONB,
            priority INTEGER NOT NULL DEFAULT 3,
            attempts INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL DEFAULT 3,
            locked BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create mail_queue table")?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_mail_queue_due
        ON mail_queue (priority ASC, created_at ASC)
        WHERE attempts < max_attempts
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create mail_queue selection index")?;

    Ok(())
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

/// Daemon configuration.
struct Config {
    /// PostgreSQL connection string.
    database_url: String,
    /// Maximum database connections.
    database_max_connections: u32,
    /// Mail provider submission endpoint.
    mail_api_url: String,
    /// Mail provider bearer token.
    mail_api_token: Option<String>,
    /// Number of delivery workers.
    worker_count: usize,
    /// Maximum messages claimed per batch.
    batch_limit: usize,
    /// Idle poll interval in milliseconds.
    poll_interval_ms: u64,
    /// Stale-lock reclamation window in seconds.
    stale_window_secs: u64,
}

impl Config {
    /// Loads configuration from environment variables.
    fn from_env() -> Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL environment variable not set")?;

        let mail_api_url =
            std::env::var("MAIL_API_URL").context("MAIL_API_URL environment variable not set")?;

        Ok(Self {
            database_url,
            database_max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10),
            mail_api_url,
            mail_api_token: std::env::var("MAIL_API_TOKEN").ok(),
            worker_count: env_parse("WORKER_COUNT", courier_delivery::DEFAULT_WORKER_COUNT),
            batch_limit: env_parse("BATCH_LIMIT", courier_delivery::DEFAULT_BATCH_LIMIT),
            poll_interval_ms: env_parse("POLL_INTERVAL_MS", 1_000),
            stale_window_secs: env_parse("STALE_WINDOW_SECS", 600),
        })
    }

    /// Returns the database URL with the password masked for logging.
    fn database_url_masked(&self) -> String {
        if let Some(at_pos) = self.database_url.find('@') {
            if let Some(password_start) = self.database_url[..at_pos].rfind(':') {
                return format!(
                    "{}:***@{}",
                    &self.database_url[..password_start],
                    &self.database_url[at_pos + 1..]
                );
            }
        }
        self.database_url.clone()
    }
}

/// Parses an environment variable, falling back to a default.
fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}
