//! In-process [`MetadataStore`] holding a registry and value table in memory.
//!
//! Used by tests across the workspace; the Postgres store is checked against
//! it for identical lookups. Every storage call is counted so callers can
//! assert on cache behavior, and failures can be switched on to exercise
//! error paths.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use mama_contracts::{FieldId, MetadataRow, RecordId, SchemaId};

use crate::error::StoreError;
use crate::query::SelfJoinQuery;
use crate::store::{MetadataSession, MetadataStore};

#[derive(Debug, Clone)]
struct FieldEntry {
    field_id: FieldId,
    schema_id: SchemaId,
    element: String,
    qualifier: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct Registry {
    schemas: Vec<(SchemaId, String)>,
    fields: Vec<FieldEntry>,
    values: Vec<MetadataRow>,
}

#[derive(Debug, Default)]
struct Counters {
    sessions_opened: AtomicUsize,
    open_sessions: AtomicUsize,
    schema_lookups: AtomicUsize,
    field_lookups: AtomicUsize,
    row_queries: AtomicUsize,
    unavailable: AtomicBool,
    fail_row_queries: AtomicBool,
}

/// Snapshot of storage calls made against a [`MemoryStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreStats {
    pub sessions_opened: usize,
    pub open_sessions: usize,
    pub schema_lookups: usize,
    pub field_lookups: usize,
    pub row_queries: usize,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    registry: Arc<Registry>,
    counters: Arc<Counters>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(mut self, schema_id: i32, short_id: &str) -> Self {
        self.registry_mut()
            .schemas
            .push((SchemaId(schema_id), short_id.to_string()));
        self
    }

    pub fn with_field(
        mut self,
        field_id: i32,
        schema_id: i32,
        element: &str,
        qualifier: Option<&str>,
    ) -> Self {
        self.registry_mut().fields.push(FieldEntry {
            field_id: FieldId(field_id),
            schema_id: SchemaId(schema_id),
            element: element.to_string(),
            qualifier: qualifier.map(str::to_string),
        });
        self
    }

    pub fn with_value(mut self, record_id: i32, field_id: i32, text_value: &str) -> Self {
        self.registry_mut().values.push(MetadataRow::new(
            RecordId(record_id),
            FieldId(field_id),
            text_value,
        ));
        self
    }

    pub fn stats(&self) -> StoreStats {
        let c = &self.counters;
        StoreStats {
            sessions_opened: c.sessions_opened.load(Ordering::SeqCst),
            open_sessions: c.open_sessions.load(Ordering::SeqCst),
            schema_lookups: c.schema_lookups.load(Ordering::SeqCst),
            field_lookups: c.field_lookups.load(Ordering::SeqCst),
            row_queries: c.row_queries.load(Ordering::SeqCst),
        }
    }

    /// Makes every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.counters
            .unavailable
            .store(unavailable, Ordering::SeqCst);
    }

    /// Makes only the self-join row query fail.
    pub fn fail_row_queries(&self, fail: bool) {
        self.counters.fail_row_queries.store(fail, Ordering::SeqCst);
    }

    fn registry_mut(&mut self) -> &mut Registry {
        Arc::make_mut(&mut self.registry)
    }
}

fn check_available(counters: &Counters) -> Result<(), StoreError> {
    if counters.unavailable.load(Ordering::SeqCst) {
        return Err(StoreError::Unavailable(
            "memory store switched off".to_string(),
        ));
    }
    Ok(())
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn open(&self) -> Result<Box<dyn MetadataSession>, StoreError> {
        check_available(&self.counters)?;
        self.counters.sessions_opened.fetch_add(1, Ordering::SeqCst);
        self.counters.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            registry: self.registry.clone(),
            counters: self.counters.clone(),
        }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        check_available(&self.counters)
    }
}

struct MemorySession {
    registry: Arc<Registry>,
    counters: Arc<Counters>,
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.counters.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl MetadataSession for MemorySession {
    async fn schema_id(&mut self, short_id: &str) -> Result<Option<SchemaId>, StoreError> {
        check_available(&self.counters)?;
        self.counters.schema_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .registry
            .schemas
            .iter()
            .find(|(_, name)| name == short_id)
            .map(|(id, _)| *id))
    }

    async fn field_id(
        &mut self,
        schema_id: SchemaId,
        element: &str,
        qualifier: Option<&str>,
    ) -> Result<Option<FieldId>, StoreError> {
        check_available(&self.counters)?;
        self.counters.field_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .registry
            .fields
            .iter()
            .find(|f| {
                f.schema_id == schema_id
                    && f.element == element
                    && f.qualifier.as_deref() == qualifier
            })
            .map(|f| f.field_id))
    }

    async fn matching_rows(
        &mut self,
        query: &SelfJoinQuery,
    ) -> Result<Vec<MetadataRow>, StoreError> {
        check_available(&self.counters)?;
        self.counters.row_queries.fetch_add(1, Ordering::SeqCst);
        if self.counters.fail_row_queries.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("row query failed".to_string()));
        }

        let values = &self.registry.values;
        let rows = values
            .iter()
            .filter(|lmv| query.requested().contains(&lmv.field_id))
            .filter(|lmv| {
                values.iter().any(|rmv| {
                    rmv.record_id == lmv.record_id
                        && rmv.field_id == query.query_field()
                        && rmv.text_value == query.value()
                })
            })
            .cloned()
            .collect();
        Ok(rows)
    }
}
