use std::collections::BTreeMap;

use mama_contracts::{MetadataRow, RecordId, RecordProperties};

use crate::error::LookupError;
use crate::resolver::FieldResolver;

/// Groups rows by record and names each value by its field.
///
/// Records come back in ascending id order; values within a record keep row
/// order. A field id without a cached name aborts the whole aggregation.
pub fn aggregate(
    resolver: &FieldResolver,
    rows: Vec<MetadataRow>,
) -> Result<Vec<RecordProperties>, LookupError> {
    let mut records: BTreeMap<RecordId, RecordProperties> = BTreeMap::new();

    for row in rows {
        let name = resolver.reverse_resolve(row.field_id)?;
        records
            .entry(row.record_id)
            .or_insert_with(|| RecordProperties::new(row.record_id))
            .push(name, row.text_value);
    }

    Ok(records.into_values().collect())
}
