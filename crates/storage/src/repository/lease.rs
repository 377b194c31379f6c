use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::traits::ConsumerLease;

/// Session-level Postgres advisory lock.
///
/// The lock belongs to the database session, so the connection that took it
/// is kept out of the pool until the lease is released.
pub struct PgConsumerLease {
    pool: PgPool,
    key: i64,
    held: Mutex<Option<PoolConnection<Postgres>>>,
}

impl PgConsumerLease {
    pub fn new(pool: PgPool, key: i64) -> Self {
        Self {
            pool,
            key,
            held: Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl ConsumerLease for PgConsumerLease {
    async fn try_acquire(&self) -> Result<bool> {
        let mut held = self.held.lock().await;
        if held.is_some() {
            return Ok(true);
        }

        let mut conn = self.pool.acquire().await?;
        let acquired = sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1)")
            .bind(self.key)
            .fetch_one(&mut *conn)
            .await?;

        if acquired {
            tracing::info!(lock_key = self.key, "Consumer lease acquired");
            *held = Some(conn);
        }

        Ok(acquired)
    }

    async fn release(&self) -> Result<()> {
        let mut held = self.held.lock().await;
        if let Some(mut conn) = held.take() {
            sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
                .bind(self.key)
                .fetch_one(&mut *conn)
                .await?;
            tracing::info!(lock_key = self.key, "Consumer lease released");
        }
        Ok(())
    }
}
