use std::sync::Arc;
use std::time::Instant;

use mama_contracts::{DottedName, FieldId, RecordProperties};
use tracing::Instrument;

use crate::aggregate::aggregate;
use crate::cache::FieldCache;
use crate::error::{InitError, LookupError};
use crate::query::QueryBuilder;
use crate::resolver::FieldResolver;
use crate::store::MetadataStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    /// The query field name does not resolve.
    FieldNotFound(DottedName),
    /// The field resolved but no record matched.
    NoMatches,
    /// One entry per matching record; never empty.
    Matches(Vec<RecordProperties>),
}

impl LookupOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupOutcome::FieldNotFound(_) => "field_not_found",
            LookupOutcome::NoMatches => "no_matches",
            LookupOutcome::Matches(_) => "matches",
        }
    }
}

/// Field/value lookup over a [`MetadataStore`].
#[derive(Clone)]
pub struct MetadataLookup {
    store: Arc<dyn MetadataStore>,
    resolver: FieldResolver,
    builder: QueryBuilder,
    default_field: DottedName,
}

impl MetadataLookup {
    /// Resolves `default_field` up front; a default that does not resolve
    /// would fail every lookup without requested fields.
    pub async fn new(
        store: Arc<dyn MetadataStore>,
        cache: Arc<FieldCache>,
        default_field: DottedName,
    ) -> Result<Self, InitError> {
        if default_field.path().is_none() {
            return Err(InitError::DefaultFieldInvalid(default_field));
        }

        let resolver = FieldResolver::new(cache);
        let mut session = store
            .open()
            .await
            .map_err(|err| InitError::Lookup(err.into()))?;
        let default_field_id = resolver
            .resolve(session.as_mut(), default_field.as_str())
            .await?
            .ok_or_else(|| InitError::DefaultFieldUnresolved(default_field.clone()))?;
        drop(session);

        tracing::info!(
            default_field = %default_field,
            field_id = %default_field_id,
            "resolved default response field"
        );

        Ok(Self {
            builder: QueryBuilder::new(resolver.clone(), default_field_id),
            store,
            resolver,
            default_field,
        })
    }

    pub fn resolver(&self) -> &FieldResolver {
        &self.resolver
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    pub fn default_field(&self) -> (&DottedName, FieldId) {
        (&self.default_field, self.builder.default_field())
    }

    /// Finds records whose `query_field` equals `query_value` and returns
    /// their `requested` fields, or the default field when `requested` is
    /// `None`.
    ///
    /// Requested names that do not resolve are silently left out. When none
    /// of them resolves the result is [`LookupOutcome::NoMatches`].
    pub async fn lookup(
        &self,
        query_field: &str,
        query_value: &str,
        requested: Option<&[String]>,
    ) -> Result<LookupOutcome, LookupError> {
        let span = tracing::info_span!(
            "lookup",
            query_field = %query_field,
            requested_fields = requested.map(<[String]>::len).unwrap_or(0),
            rows = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        async move {
            let started = Instant::now();
            let result = self.lookup_inner(query_field, query_value, requested).await;

            let latency_ms = started.elapsed().as_millis() as u64;
            tracing::Span::current().record("latency_ms", latency_ms);
            match &result {
                Ok(outcome) => {
                    tracing::Span::current().record("outcome", outcome.as_str());
                }
                Err(err) => {
                    tracing::Span::current().record("outcome", "error");
                    tracing::warn!(error = %err, "lookup failed");
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn lookup_inner(
        &self,
        query_field: &str,
        query_value: &str,
        requested: Option<&[String]>,
    ) -> Result<LookupOutcome, LookupError> {
        let mut session = self.store.open().await?;

        let Some(query_field_id) = self.resolver.resolve(session.as_mut(), query_field).await?
        else {
            return Ok(LookupOutcome::FieldNotFound(DottedName::new(query_field)));
        };

        let query = self
            .builder
            .build(session.as_mut(), query_field_id, query_value, requested)
            .await?;
        if query.is_degenerate() {
            tracing::debug!("no requested field resolved; skipping storage query");
            return Ok(LookupOutcome::NoMatches);
        }

        let rows = session.matching_rows(&query).await?;
        drop(session);
        tracing::Span::current().record("rows", rows.len());

        let records = aggregate(&self.resolver, rows)?;
        if records.is_empty() {
            Ok(LookupOutcome::NoMatches)
        } else {
            Ok(LookupOutcome::Matches(records))
        }
    }
}
