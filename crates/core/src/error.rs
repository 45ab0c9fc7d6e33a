use mama_contracts::{DottedName, FieldId};
use thiserror::Error;

/// Failure reported by a [`crate::MetadataStore`] backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage operation timed out")]
    Timeout,

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Backend(Box::new(err))
    }
}

/// Errors that abort a lookup. Unknown field names and empty results are
/// outcomes, not errors.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error("field cache has no name for field id {0}")]
    CacheCorruption(FieldId),

    #[error("field id {field_id} is already cached as `{cached}`, refusing `{name}`")]
    CacheConflict {
        field_id: FieldId,
        cached: DottedName,
        name: DottedName,
    },
}

impl LookupError {
    /// True for internal invariant violations as opposed to storage health.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            LookupError::CacheCorruption(_) | LookupError::CacheConflict { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum InitError {
    #[error("default field `{0}` is not of the form schema.element[.qualifier]")]
    DefaultFieldInvalid(DottedName),

    #[error("default field `{0}` does not resolve in the field registry")]
    DefaultFieldUnresolved(DottedName),

    #[error(transparent)]
    Lookup(#[from] LookupError),
}
