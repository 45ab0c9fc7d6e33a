use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use mama_contracts::{DottedName, FieldId};

use crate::error::LookupError;

/// Bidirectional `DottedName <-> FieldId` map.
///
/// Entries are never evicted: the field registry is append-only for the
/// life of the process. Both directions change under one write lock, so no
/// reader observes a half-inserted pair.
#[derive(Debug, Default)]
pub struct FieldCache {
    inner: RwLock<BiMap>,
}

#[derive(Debug, Default)]
struct BiMap {
    by_name: HashMap<DottedName, FieldId>,
    by_id: HashMap<FieldId, DottedName>,
}

impl FieldCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<FieldId> {
        self.read().by_name.get(name).copied()
    }

    pub fn name_of(&self, field_id: FieldId) -> Option<DottedName> {
        self.read().by_id.get(&field_id).cloned()
    }

    /// Inserts `(name, field_id)` unless `name` is already cached, and
    /// returns the id now bound to `name`.
    ///
    /// Concurrent inserts of the same pair converge on one entry. Binding an
    /// id that already belongs to a different name is refused.
    pub fn insert_if_absent(
        &self,
        name: DottedName,
        field_id: FieldId,
    ) -> Result<FieldId, LookupError> {
        let mut map = self.write();

        if let Some(existing) = map.by_name.get(&name) {
            return Ok(*existing);
        }

        if let Some(cached) = map.by_id.get(&field_id) {
            return Err(LookupError::CacheConflict {
                field_id,
                cached: cached.clone(),
                name,
            });
        }

        map.by_id.insert(field_id, name.clone());
        map.by_name.insert(name, field_id);
        Ok(field_id)
    }

    pub fn len(&self) -> usize {
        self.read().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, BiMap> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, BiMap> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
