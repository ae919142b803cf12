//! PostgreSQL persistence: pool management, schema setup, contract and link
//! storage, query execution, and the change-notification stream layer.

use std::time::Duration;

use log::{debug, info, warn};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};

pub mod cards;
pub mod errors;
pub mod links;
pub mod streams;

pub use errors::BackendError;
pub use streams::{StreamEvent, StreamEventKind, StreamMessage, Streams};

/// Advisory lock key serializing schema setup across processes.
const SETUP_LOCK_KEY: i64 = 0x6175_7475_6d6e;

/// Connection behavior for `Backend::connect`.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Per-session statement timeout; surfaces as `BackendError::Timeout`.
    pub statement_timeout: Option<Duration>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay: Duration::from_millis(200),
            statement_timeout: None,
        }
    }
}

/// Handle to one AutumnDB database.
#[derive(Debug, Clone)]
pub struct Backend {
    pool: PgPool,
}

impl Backend {
    /// Connect with bounded retries; transient startup failures (container
    /// still booting, network hiccups) resolve within a few attempts.
    pub async fn connect(url: &str, options: ConnectOptions) -> Result<Self, BackendError> {
        let timeout = options.statement_timeout;
        let pool_options = || {
            PgPoolOptions::new().after_connect(move |connection, _meta| {
                Box::pin(async move {
                    if let Some(timeout) = timeout {
                        let statement =
                            format!("SET statement_timeout = {}", timeout.as_millis());
                        connection.execute(statement.as_str()).await?;
                    }
                    Ok(())
                })
            })
        };

        let mut last_error = None;
        for attempt in 0..=options.max_retries {
            match pool_options().connect(url).await {
                Ok(pool) => {
                    if attempt > 0 {
                        info!("connected to database after {} retries", attempt);
                    } else {
                        debug!("connected to database");
                    }
                    return Ok(Backend { pool });
                }
                Err(error) => {
                    warn!("database connection failed (attempt {}): {}", attempt, error);
                    last_error = Some(error);
                    if attempt < options.max_retries {
                        tokio::time::sleep(options.retry_delay).await;
                    }
                }
            }
        }
        Err(BackendError::Database(
            last_error.expect("at least one attempt was made"),
        ))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Backend { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables, composite types, functions, indexes and the
    /// notification trigger. Idempotent; concurrent processes serialize on
    /// an advisory lock so a fresh deployment never races itself.
    pub async fn setup(&self) -> Result<(), BackendError> {
        let mut connection = self.pool.acquire().await?;

        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(SETUP_LOCK_KEY)
            .execute(&mut *connection)
            .await?;

        let result = async {
            for statement in crate::sql::functions::setup_statements() {
                (&mut *connection).execute(statement).await?;
            }
            Ok::<(), sqlx::Error>(())
        }
        .await;

        let unlock = sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(SETUP_LOCK_KEY)
            .execute(&mut *connection)
            .await;

        result?;
        unlock?;
        info!("database setup complete");
        Ok(())
    }
}
