use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use mama_contracts::{FieldId, MetadataRow, RecordId, SchemaId};
use mama_core::{MetadataSession, MetadataStore, SelfJoinQuery, StoreError};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgPool, Postgres, Row};

const SCHEMA_ID_SQL: &str =
    "SELECT metadata_schema_id FROM metadataschemaregistry WHERE short_id = $1 LIMIT 1";

const FIELD_ID_SQL: &str = "SELECT metadata_field_id FROM metadatafieldregistry \
     WHERE metadata_schema_id = $1 AND element = $2 AND qualifier IS NULL LIMIT 1";

const QUALIFIED_FIELD_ID_SQL: &str = "SELECT metadata_field_id FROM metadatafieldregistry \
     WHERE metadata_schema_id = $1 AND element = $2 AND qualifier = $3 LIMIT 1";

// EXISTS rather than a join: a record holding the query value twice must
// still yield each of its rows once.
const SELF_JOIN_SQL: &str = "SELECT lmv.item_id, lmv.metadata_field_id, lmv.text_value \
     FROM metadatavalue lmv \
     WHERE lmv.metadata_field_id = ANY($3) \
     AND EXISTS (SELECT 1 FROM metadatavalue rmv \
     WHERE rmv.item_id = lmv.item_id \
     AND rmv.metadata_field_id = $1 AND rmv.text_value = $2) \
     ORDER BY lmv.item_id, lmv.metadata_value_id";

#[derive(Debug, Clone)]
pub struct PgStoreOptions {
    pub db_url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub read_only: bool,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub query_timeout: Duration,
}

impl PgStoreOptions {
    pub fn new(db_url: impl Into<String>) -> Self {
        Self {
            db_url: db_url.into(),
            user: None,
            password: None,
            read_only: true,
            max_connections: 8,
            acquire_timeout: Duration::from_secs(2),
            query_timeout: Duration::from_secs(5),
        }
    }

    fn connect_options(&self) -> Result<PgConnectOptions, sqlx::Error> {
        let mut options = PgConnectOptions::from_str(&self.db_url)?;
        if let Some(user) = self.user.as_deref().filter(|u| !u.is_empty()) {
            options = options.username(user);
        }
        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            options = options.password(password);
        }
        if self.read_only {
            options = options.options([("default_transaction_read_only", "on")]);
        }
        Ok(options)
    }
}

/// Postgres-backed registry and value store.
///
/// Each [`MetadataSession`] owns one pooled connection; dropping the session
/// returns it to the pool.
#[derive(Clone)]
pub struct PgMetadataStore {
    pool: PgPool,
    query_timeout: Duration,
}

impl PgMetadataStore {
    pub async fn connect(options: &PgStoreOptions) -> Result<Self, StoreError> {
        let connect_options = options.connect_options().map_err(StoreError::backend)?;

        let pool = tokio::time::timeout(
            options.acquire_timeout,
            PgPoolOptions::new()
                .max_connections(options.max_connections)
                .acquire_timeout(options.acquire_timeout)
                .connect_with(connect_options),
        )
        .await
        .map_err(|_| StoreError::Timeout)?
        .map_err(StoreError::backend)?;

        tracing::info!(
            max_connections = options.max_connections,
            read_only = options.read_only,
            "metadata store pool ready"
        );

        Ok(Self::from_pool(pool, options.query_timeout))
    }

    pub fn from_pool(pool: PgPool, query_timeout: Duration) -> Self {
        Self {
            pool,
            query_timeout,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    async fn open(&self) -> Result<Box<dyn MetadataSession>, StoreError> {
        let conn = self.pool.acquire().await.map_err(map_sqlx)?;
        Ok(Box::new(PgSession {
            conn,
            query_timeout: self.query_timeout,
        }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        tokio::time::timeout(
            self.query_timeout,
            sqlx::query("SELECT 1").execute(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)?
        .map_err(map_sqlx)?;
        Ok(())
    }
}

struct PgSession {
    conn: PoolConnection<Postgres>,
    query_timeout: Duration,
}

#[async_trait]
impl MetadataSession for PgSession {
    async fn schema_id(&mut self, short_id: &str) -> Result<Option<SchemaId>, StoreError> {
        let id = tokio::time::timeout(
            self.query_timeout,
            sqlx::query_scalar::<_, i32>(SCHEMA_ID_SQL)
                .bind(short_id)
                .fetch_optional(&mut *self.conn),
        )
        .await
        .map_err(|_| StoreError::Timeout)?
        .map_err(map_sqlx)?;

        Ok(id.map(SchemaId))
    }

    async fn field_id(
        &mut self,
        schema_id: SchemaId,
        element: &str,
        qualifier: Option<&str>,
    ) -> Result<Option<FieldId>, StoreError> {
        let query = match qualifier {
            None => sqlx::query_scalar::<_, i32>(FIELD_ID_SQL)
                .bind(schema_id.0)
                .bind(element),
            Some(qualifier) => sqlx::query_scalar::<_, i32>(QUALIFIED_FIELD_ID_SQL)
                .bind(schema_id.0)
                .bind(element)
                .bind(qualifier),
        };

        let id = tokio::time::timeout(self.query_timeout, query.fetch_optional(&mut *self.conn))
            .await
            .map_err(|_| StoreError::Timeout)?
            .map_err(map_sqlx)?;

        Ok(id.map(FieldId))
    }

    async fn matching_rows(
        &mut self,
        query: &SelfJoinQuery,
    ) -> Result<Vec<MetadataRow>, StoreError> {
        let requested = query.requested().iter().map(|id| id.0).collect::<Vec<i32>>();

        let rows = tokio::time::timeout(
            self.query_timeout,
            sqlx::query(SELF_JOIN_SQL)
                .bind(query.query_field().0)
                .bind(query.value())
                .bind(requested)
                .fetch_all(&mut *self.conn),
        )
        .await
        .map_err(|_| StoreError::Timeout)?
        .map_err(map_sqlx)?;

        rows.into_iter()
            .map(|row| -> Result<MetadataRow, sqlx::Error> {
                Ok(MetadataRow {
                    record_id: RecordId(row.try_get::<i32, _>("item_id")?),
                    field_id: FieldId(row.try_get::<i32, _>("metadata_field_id")?),
                    // NULL text reads as "", matching MetadataRow.
                    text_value: row
                        .try_get::<Option<String>, _>("text_value")?
                        .unwrap_or_default(),
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_sqlx)
    }
}

fn map_sqlx(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut => StoreError::Timeout,
        sqlx::Error::PoolClosed => StoreError::Unavailable("connection pool is closed".to_string()),
        other => StoreError::backend(other),
    }
}
