//! Field resolution and self-join lookup over a DSpace-style metadata
//! registry.
//!
//! [`MetadataLookup`] is the entry point: it resolves the query field through
//! a shared [`FieldCache`], builds a [`SelfJoinQuery`] for the requested
//! fields, and groups the returned rows into one [`RecordProperties`] per
//! record. Storage sits behind [`MetadataStore`].
//!
//! [`RecordProperties`]: mama_contracts::RecordProperties

pub mod aggregate;
pub mod cache;
pub mod error;
pub mod lookup;
pub mod memory;
pub mod query;
pub mod resolver;
pub mod store;

pub use cache::FieldCache;
pub use error::{InitError, LookupError, StoreError};
pub use lookup::{LookupOutcome, MetadataLookup};
pub use memory::MemoryStore;
pub use query::{QueryBuilder, SelfJoinQuery};
pub use resolver::FieldResolver;
pub use store::{MetadataSession, MetadataStore};
