pub mod error;
pub mod memory;
pub mod models;
pub mod repository;
pub mod traits;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

pub use error::{Result, StorageError};
pub use memory::MemoryStore;
pub use repository::PgConsumerLease;
pub use traits::{ConsumerLease, DirtyStore, MutationLog, RosterStore, SyncStatusStore};

/// Postgres-backed implementation of every store trait.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}
