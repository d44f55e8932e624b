use crate::config::DatabaseConfig;
use crate::error::CatalogError;
use crate::model::ImageRecord;
use crate::update_builder::UpdateStatement;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, instrument};

/// Result of cataloging an accepted upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Created,
    /// A record with this key already existed and was left as is
    AlreadyCataloged,
}

/// Key-value persistence for image records
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Create a record with only `id` populated unless one already exists
    async fn put_if_absent(&self, id: &str) -> Result<PutOutcome, CatalogError>;

    /// Apply a partial update; fails with [`CatalogError::NotFound`] when the
    /// record does not exist
    async fn apply_update(&self, statement: &UpdateStatement) -> Result<(), CatalogError>;

    /// Delete a record, returning whether one was removed
    async fn delete(&self, id: &str) -> Result<bool, CatalogError>;

    async fn get(&self, id: &str) -> Result<Option<ImageRecord>, CatalogError>;
}

/// Catalog store backed by PostgreSQL
#[derive(Clone)]
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    /// Create a new catalog store with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self, CatalogError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<(), CatalogError> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await?;

        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    #[instrument(skip(self))]
    async fn put_if_absent(&self, id: &str) -> Result<PutOutcome, CatalogError> {
        let result = sqlx::query("INSERT INTO images (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
            .bind(id)
            .execute(&self.pool)
            .await?;

        let outcome = if result.rows_affected() == 1 {
            PutOutcome::Created
        } else {
            PutOutcome::AlreadyCataloged
        };
        debug!(?outcome, "Catalog put");

        Ok(outcome)
    }

    #[instrument(skip(self, statement), fields(id = %statement.key()))]
    async fn apply_update(&self, statement: &UpdateStatement) -> Result<(), CatalogError> {
        let sql = statement.sql();
        let mut query = sqlx::query(&sql).bind(statement.key());
        for value in statement.values() {
            query = query.bind(value);
        }

        let result = query.execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(CatalogError::NotFound(statement.key().to_string()));
        }

        debug!(fields = statement.assignments().len(), "Catalog record updated");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: &str) -> Result<bool, CatalogError> {
        let result = sqlx::query("DELETE FROM images WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, id: &str) -> Result<Option<ImageRecord>, CatalogError> {
        let record = sqlx::query_as::<_, ImageRecord>(
            r#"SELECT id, caption, "date", photographer FROM images WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }
}
