//! Store decorator that times every storage call into
//! `mama_store_query_duration_seconds`. Installed when `MAMA_DB_METRICS` is set.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use mama_contracts::{FieldId, MetadataRow, SchemaId};
use mama_core::{MetadataSession, MetadataStore, SelfJoinQuery, StoreError};

pub struct InstrumentedStore {
    inner: Arc<dyn MetadataStore>,
}

impl InstrumentedStore {
    pub fn new(inner: Arc<dyn MetadataStore>) -> Self {
        Self { inner }
    }
}

fn outcome_label<T>(result: &Result<T, StoreError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(StoreError::Timeout) => "timeout",
        Err(_) => "error",
    }
}

fn record<T>(query: &str, started: Instant, result: &Result<T, StoreError>) {
    crate::metrics::observe_store_query(query, outcome_label(result), started.elapsed());
}

#[async_trait]
impl MetadataStore for InstrumentedStore {
    async fn open(&self) -> Result<Box<dyn MetadataSession>, StoreError> {
        let started = Instant::now();
        let result = self.inner.open().await;
        record("open", started, &result);
        Ok(Box::new(InstrumentedSession { inner: result? }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let started = Instant::now();
        let result = self.inner.ping().await;
        record("ping", started, &result);
        result
    }
}

struct InstrumentedSession {
    inner: Box<dyn MetadataSession>,
}

#[async_trait]
impl MetadataSession for InstrumentedSession {
    async fn schema_id(&mut self, short_id: &str) -> Result<Option<SchemaId>, StoreError> {
        let started = Instant::now();
        let result = self.inner.schema_id(short_id).await;
        record("schema_id", started, &result);
        result
    }

    async fn field_id(
        &mut self,
        schema_id: SchemaId,
        element: &str,
        qualifier: Option<&str>,
    ) -> Result<Option<FieldId>, StoreError> {
        let started = Instant::now();
        let result = self.inner.field_id(schema_id, element, qualifier).await;
        record("field_id", started, &result);
        result
    }

    async fn matching_rows(
        &mut self,
        query: &SelfJoinQuery,
    ) -> Result<Vec<MetadataRow>, StoreError> {
        let started = Instant::now();
        let result = self.inner.matching_rows(query).await;
        record("matching_rows", started, &result);
        result
    }
}
