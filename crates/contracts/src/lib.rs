use std::borrow::Borrow;
use std::fmt;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldId(pub i32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaId(pub i32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i32);

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Human-readable field name of the form `schema.element[.qualifier]`.
///
/// Case-sensitive and not validated on construction; [`DottedName::path`]
/// reports whether the name has a resolvable shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DottedName(String);

/// The parts of a well-formed [`DottedName`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldPath<'a> {
    pub schema: &'a str,
    pub element: &'a str,
    pub qualifier: Option<&'a str>,
}

impl DottedName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits the name on `.`. Only two or three non-empty parts form a path.
    pub fn path(&self) -> Option<FieldPath<'_>> {
        let parts = self.0.split('.').collect::<Vec<_>>();
        if parts.iter().any(|part| part.is_empty()) {
            return None;
        }

        match parts.as_slice() {
            [schema, element] => Some(FieldPath {
                schema: *schema,
                element: *element,
                qualifier: None,
            }),
            [schema, element, qualifier] => Some(FieldPath {
                schema: *schema,
                element: *element,
                qualifier: Some(*qualifier),
            }),
            _ => None,
        }
    }
}

impl fmt::Display for DottedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for DottedName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DottedName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DottedName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One stored fact: record `record_id` has field `field_id` equal to `text_value`.
///
/// A value stored as SQL NULL is carried as the empty string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRow {
    pub record_id: RecordId,
    pub field_id: FieldId,
    pub text_value: String,
}

impl MetadataRow {
    pub fn new(record_id: RecordId, field_id: FieldId, text_value: impl Into<String>) -> Self {
        Self {
            record_id,
            field_id,
            text_value: text_value.into(),
        }
    }
}

/// Named values of one matching record.
///
/// Entries keep storage order and may repeat a name when a record holds
/// several values for one field. Serializes as a JSON object; repeated names
/// become repeated keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordProperties {
    record_id: RecordId,
    entries: Vec<(DottedName, String)>,
}

impl RecordProperties {
    pub fn new(record_id: RecordId) -> Self {
        Self {
            record_id,
            entries: Vec::new(),
        }
    }

    pub fn record_id(&self) -> RecordId {
        self.record_id
    }

    pub fn push(&mut self, name: DottedName, value: String) {
        self.entries.push((name, value));
    }

    pub fn entries(&self) -> &[(DottedName, String)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First value stored under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values(name).next()
    }

    pub fn values<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> {
        self.entries
            .iter()
            .filter(move |(n, _)| n.as_str() == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }
}

impl Serialize for RecordProperties {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name.as_str(), value)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "ERR_INVALID_PARAMS")]
    InvalidParams,
    #[serde(rename = "ERR_UNKNOWN_FIELD")]
    UnknownField,
    #[serde(rename = "ERR_NO_MATCHES")]
    NoMatches,
    #[serde(rename = "ERR_STORAGE_UNAVAILABLE")]
    StorageUnavailable,
    #[serde(rename = "ERR_INTERNAL")]
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidParams => "ERR_INVALID_PARAMS",
            ErrorCode::UnknownField => "ERR_UNKNOWN_FIELD",
            ErrorCode::NoMatches => "ERR_NO_MATCHES",
            ErrorCode::StorageUnavailable => "ERR_STORAGE_UNAVAILABLE",
            ErrorCode::Internal => "ERR_INTERNAL",
        }
    }
}

/// Success body of `GET /item`.
#[derive(Debug, Clone, Serialize)]
pub struct ItemResponse {
    pub field: String,
    pub value: String,
    pub items: Vec<RecordProperties>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_name_splits_two_and_three_parts() {
        let name = DottedName::new("dc.title");
        assert_eq!(
            name.path(),
            Some(FieldPath {
                schema: "dc",
                element: "title",
                qualifier: None,
            })
        );

        let name = DottedName::new("dc.identifier.uri");
        assert_eq!(
            name.path(),
            Some(FieldPath {
                schema: "dc",
                element: "identifier",
                qualifier: Some("uri"),
            })
        );
    }

    #[test]
    fn dotted_name_rejects_other_shapes() {
        for raw in ["", "dc", "dc.a.b.c", "dc..uri", ".title", "dc.title."] {
            assert_eq!(DottedName::new(raw).path(), None, "{raw:?} must not parse");
        }
    }

    #[test]
    fn record_properties_serialize_as_object_with_repeated_keys() {
        let mut props = RecordProperties::new(RecordId(7));
        props.push(DottedName::new("dc.creator"), "Ada".to_string());
        props.push(DottedName::new("dc.creator"), "Grace".to_string());
        props.push(DottedName::new("dc.title"), "Notes".to_string());

        let json = serde_json::to_string(&props).expect("serialize should succeed");
        assert_eq!(
            json,
            r#"{"dc.creator":"Ada","dc.creator":"Grace","dc.title":"Notes"}"#
        );
        assert_eq!(props.get("dc.creator"), Some("Ada"));
        assert_eq!(props.values("dc.creator").count(), 2);
        assert_eq!(props.get("dc.type"), None);
    }

    #[test]
    fn error_codes_serialize_to_wire_names() {
        let json = serde_json::to_value(ErrorCode::UnknownField).expect("serialize");
        assert_eq!(json, serde_json::json!("ERR_UNKNOWN_FIELD"));
        assert_eq!(ErrorCode::NoMatches.as_str(), "ERR_NO_MATCHES");
    }
}
