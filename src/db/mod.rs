//! Postgres connection pool, migrations, and health check.
//!
//! `Db` implements [`EventStore`](crate::store::EventStore) in `events`
//! and [`MessageBus`](crate::store::MessageBus) on top of pgmq in `pgmq`.

pub mod events;
pub mod pgmq;

use crate::error::Result;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Database handle. Owns the connection pool and the queue names.
pub struct Db {
    pool: PgPool,
    ingress_queue: String,
    outbound_queue: String,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self {
            pool,
            ingress_queue: "events".to_string(),
            outbound_queue: "manager".to_string(),
        })
    }

    /// Override the queue names used for requeues and completions.
    pub fn with_queues(mut self, ingress: impl Into<String>, outbound: impl Into<String>) -> Self {
        self.ingress_queue = ingress.into();
        self.outbound_queue = outbound.into();
        self
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Create both queues (idempotent).
    pub async fn ensure_queues(&self) -> Result<()> {
        self.create_queue(&self.ingress_queue).await?;
        self.create_queue(&self.outbound_queue).await
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub fn ingress_queue(&self) -> &str {
        &self.ingress_queue
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}
