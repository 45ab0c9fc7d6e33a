use async_trait::async_trait;
use mama_contracts::{FieldId, MetadataRow, SchemaId};

use crate::error::StoreError;
use crate::query::SelfJoinQuery;

/// Read-only access to the field registry and metadata values.
///
/// A lookup opens one session and drops it when done, so a backend that
/// pools connections holds one connection per lookup and no longer.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn open(&self) -> Result<Box<dyn MetadataSession>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait MetadataSession: Send {
    /// Schema id for an exact `short_id` match.
    async fn schema_id(&mut self, short_id: &str) -> Result<Option<SchemaId>, StoreError>;

    /// Field id for `(schema, element, qualifier)`. A `None` qualifier only
    /// matches registry rows without a qualifier.
    async fn field_id(
        &mut self,
        schema_id: SchemaId,
        element: &str,
        qualifier: Option<&str>,
    ) -> Result<Option<FieldId>, StoreError>;

    async fn matching_rows(
        &mut self,
        query: &SelfJoinQuery,
    ) -> Result<Vec<MetadataRow>, StoreError>;
}
