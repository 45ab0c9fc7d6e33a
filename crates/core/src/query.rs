use mama_contracts::FieldId;

use crate::error::LookupError;
use crate::resolver::FieldResolver;
use crate::store::MetadataSession;

/// "Every value row of any record that has `query_field = value`, limited to
/// the requested fields."
///
/// Backends bind exactly three parameters, in order: [`query_field`],
/// [`value`], and [`requested`] as one id set. Only resolved integer ids
/// ever reach the requested set.
///
/// [`query_field`]: SelfJoinQuery::query_field
/// [`value`]: SelfJoinQuery::value
/// [`requested`]: SelfJoinQuery::requested
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfJoinQuery {
    query_field: FieldId,
    value: String,
    requested: Vec<FieldId>,
}

impl SelfJoinQuery {
    pub fn query_field(&self) -> FieldId {
        self.query_field
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn requested(&self) -> &[FieldId] {
        &self.requested
    }

    /// No requested field resolved; the query cannot match any row.
    pub fn is_degenerate(&self) -> bool {
        self.requested.is_empty()
    }
}

/// Builds [`SelfJoinQuery`] values for one lookup engine.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    resolver: FieldResolver,
    default_field: FieldId,
}

impl QueryBuilder {
    /// `default_field` is the single requested field when a caller names none.
    pub fn new(resolver: FieldResolver, default_field: FieldId) -> Self {
        Self {
            resolver,
            default_field,
        }
    }

    pub fn default_field(&self) -> FieldId {
        self.default_field
    }

    /// Requested names that do not resolve are dropped without a trace in
    /// the result. This is policy: callers are never told which requested
    /// fields were unknown.
    pub async fn build(
        &self,
        session: &mut dyn MetadataSession,
        query_field: FieldId,
        value: &str,
        requested: Option<&[String]>,
    ) -> Result<SelfJoinQuery, LookupError> {
        let requested = match requested {
            None => vec![self.default_field],
            Some(names) => {
                let mut ids = Vec::with_capacity(names.len());
                for name in names {
                    match self.resolver.resolve(&mut *session, name).await? {
                        Some(field_id) if !ids.contains(&field_id) => ids.push(field_id),
                        Some(_) => {}
                        None => {
                            tracing::debug!(field = %name, "dropping unresolved requested field");
                        }
                    }
                }
                ids
            }
        };

        Ok(SelfJoinQuery {
            query_field,
            value: value.to_string(),
            requested,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FieldCache;
    use crate::memory::MemoryStore;
    use crate::store::MetadataStore;
    use std::sync::Arc;

    fn registry() -> MemoryStore {
        MemoryStore::new()
            .with_schema(1, "dc")
            .with_field(1, 1, "identifier", Some("uri"))
            .with_field(2, 1, "title", None)
            .with_field(3, 1, "type", None)
    }

    fn builder() -> QueryBuilder {
        QueryBuilder::new(FieldResolver::new(Arc::new(FieldCache::new())), FieldId(1))
    }

    #[tokio::test]
    async fn absent_requested_fields_use_default_field() {
        let store = registry();
        let mut session = store.open().await.expect("open session");

        let query = builder()
            .build(session.as_mut(), FieldId(1), "u1", None)
            .await
            .expect("build should succeed");

        assert_eq!(query.query_field(), FieldId(1));
        assert_eq!(query.value(), "u1");
        assert_eq!(query.requested(), &[FieldId(1)]);
        assert!(!query.is_degenerate());
    }

    #[tokio::test]
    async fn unresolvable_requested_fields_are_dropped() {
        let store = registry();
        let mut session = store.open().await.expect("open session");
        let requested = vec![
            "dc.title".to_string(),
            "dc.bogus".to_string(),
            "dc.type".to_string(),
            "not-a-field".to_string(),
        ];

        let query = builder()
            .build(session.as_mut(), FieldId(1), "u1", Some(requested.as_slice()))
            .await
            .expect("build should succeed");

        assert_eq!(query.requested(), &[FieldId(2), FieldId(3)]);
    }

    #[tokio::test]
    async fn duplicate_requested_fields_collapse() {
        let store = registry();
        let mut session = store.open().await.expect("open session");
        let requested = vec![
            "dc.type".to_string(),
            "dc.title".to_string(),
            "dc.type".to_string(),
        ];

        let query = builder()
            .build(session.as_mut(), FieldId(1), "u1", Some(requested.as_slice()))
            .await
            .expect("build should succeed");

        assert_eq!(query.requested(), &[FieldId(3), FieldId(2)]);
    }

    #[tokio::test]
    async fn all_unresolvable_requested_fields_give_degenerate_query() {
        let store = registry();
        let mut session = store.open().await.expect("open session");
        let requested = vec!["dc.bogus".to_string(), "x.y".to_string()];

        let query = builder()
            .build(session.as_mut(), FieldId(1), "u1", Some(requested.as_slice()))
            .await
            .expect("build should succeed");

        assert!(query.is_degenerate());
    }

    #[tokio::test]
    async fn value_is_carried_verbatim() {
        let store = registry();
        let mut session = store.open().await.expect("open session");
        let value = "x' OR '1'='1";

        let query = builder()
            .build(session.as_mut(), FieldId(2), value, None)
            .await
            .expect("build should succeed");

        assert_eq!(query.value(), value);
    }
}
