use std::sync::Arc;

use mama_contracts::{DottedName, FieldId};

use crate::cache::FieldCache;
use crate::error::LookupError;
use crate::store::MetadataSession;

/// Resolves dotted field names to registry ids through a [`FieldCache`].
#[derive(Debug, Clone)]
pub struct FieldResolver {
    cache: Arc<FieldCache>,
}

impl FieldResolver {
    pub fn new(cache: Arc<FieldCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<FieldCache> {
        &self.cache
    }

    /// Returns the registry id of `name`, or `None` when the name does not
    /// resolve. Cache hits never touch `session`.
    pub async fn resolve(
        &self,
        session: &mut dyn MetadataSession,
        name: &str,
    ) -> Result<Option<FieldId>, LookupError> {
        if let Some(field_id) = self.cache.get(name) {
            return Ok(Some(field_id));
        }

        let name = DottedName::new(name);
        let Some(path) = name.path() else {
            tracing::debug!(field = %name, "field name is not schema.element[.qualifier]");
            return Ok(None);
        };

        let Some(schema_id) = session.schema_id(path.schema).await? else {
            tracing::debug!(field = %name, schema = path.schema, "unknown metadata schema");
            return Ok(None);
        };

        let Some(field_id) = session
            .field_id(schema_id, path.element, path.qualifier)
            .await?
        else {
            tracing::debug!(field = %name, "unknown metadata field");
            return Ok(None);
        };

        let field_id = self.cache.insert_if_absent(name.clone(), field_id)?;
        tracing::debug!(field = %name, field_id = %field_id, "cached metadata field id");
        Ok(Some(field_id))
    }

    /// Name previously resolved to `field_id`. A miss means the id never
    /// passed through [`FieldResolver::resolve`].
    pub fn reverse_resolve(&self, field_id: FieldId) -> Result<DottedName, LookupError> {
        self.cache
            .name_of(field_id)
            .ok_or(LookupError::CacheCorruption(field_id))
    }
}
