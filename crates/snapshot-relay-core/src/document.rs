//! In-memory model of a parsed snapshot document.
//!
//! A document is a list of named collections, each a sequence of records.
//! Records map field names to scalar values; no schema is assumed, so field
//! presence and kind may vary between records of the same collection.
//!
//! Two JSON layouts are recognized:
//!
//! | Layout | Shape |
//! |--------|-------|
//! | Snapshot export | `{ "metadata": {..}, "tables": { "<name>": { "structure": [..], "data": [..], "row_count": n } } }` |
//! | Generic | any object; every member whose value is an array is a collection |

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// A single scalar field value.
///
/// Serializes untagged, so `Integer(1)` becomes `1` and `Null` becomes `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Null,
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Text(String),
}

impl ScalarValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    /// Convert a JSON value into a scalar.
    ///
    /// Nested arrays and objects are kept as their compact JSON text. The
    /// string sentinels `""` and `"null"` (any case) become [`ScalarValue::Null`].
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => ScalarValue::Null,
            Value::Bool(b) => ScalarValue::Boolean(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => ScalarValue::Integer(i),
                None => ScalarValue::Real(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => {
                if s.is_empty() || s.eq_ignore_ascii_case("null") {
                    ScalarValue::Null
                } else {
                    ScalarValue::Text(s.clone())
                }
            }
            Value::Array(_) | Value::Object(_) => ScalarValue::Text(value.to_string()),
        }
    }
}

/// One record of a collection: an ordered mapping of field name to value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, ScalarValue)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_object(object: &Map<String, Value>) -> Self {
        Self {
            fields: object
                .iter()
                .map(|(k, v)| (k.clone(), ScalarValue::from_json(v)))
                .collect(),
        }
    }

    /// Builder-style insert, mostly useful in tests.
    pub fn with(mut self, name: impl Into<String>, value: ScalarValue) -> Self {
        self.fields.push((name.into(), value));
        self
    }

    /// Exact-name lookup.
    pub fn get(&self, name: &str) -> Option<&ScalarValue> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Case-insensitive lookup; the first matching field wins.
    pub fn get_ignore_case(&self, name: &str) -> Option<&ScalarValue> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ScalarValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Column hint declared by a snapshot export's `structure` section.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnHint {
    pub name: String,
    pub data_type: Option<String>,
    pub primary_key: bool,
    pub not_null: bool,
}

/// A named collection of records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Collection {
    pub name: String,
    pub records: Vec<Record>,
    pub hints: Vec<ColumnHint>,
    /// Row count claimed by the producer, when it declared one.
    pub declared_rows: Option<u64>,
    /// Array elements that were not objects and therefore not records.
    pub skipped_elements: usize,
}

impl Collection {
    pub fn new(name: impl Into<String>, records: Vec<Record>) -> Self {
        Self {
            name: name.into(),
            records,
            ..Default::default()
        }
    }

    pub fn hint(&self, column: &str) -> Option<&ColumnHint> {
        self.hints
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(column))
    }

    /// True when the producer's declared row count disagrees with the data.
    pub fn row_count_mismatch(&self) -> bool {
        matches!(self.declared_rows, Some(n) if n != self.records.len() as u64)
    }
}

/// Producer metadata carried alongside the collections.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DocumentMetadata {
    pub exported_at: Option<String>,
    pub total_rows: Option<u64>,
    pub raw: Value,
}

/// A fully parsed snapshot document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedDocument {
    pub metadata: DocumentMetadata,
    pub collections: Vec<Collection>,
}

/// Errors produced while turning decompressed bytes into a [`ParsedDocument`].
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("invalid JSON at line {line}, column {column}: {message}")]
    Syntax {
        /// Byte offset into the input, when it can be located.
        offset: Option<usize>,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("document root must be a JSON object")]
    NotAnObject,

    #[error("'tables' must be an object of collections")]
    MalformedTables,
}

impl DocumentError {
    pub fn offset(&self) -> Option<usize> {
        match self {
            DocumentError::Syntax { offset, .. } => *offset,
            _ => None,
        }
    }
}

impl ParsedDocument {
    /// Parse a decompressed document.
    ///
    /// Given the same bytes this always produces an equal document.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DocumentError> {
        let root: Value = serde_json::from_slice(bytes).map_err(|e| DocumentError::Syntax {
            offset: byte_offset(bytes, e.line(), e.column()),
            line: e.line(),
            column: e.column(),
            message: e.to_string(),
        })?;

        let object = root.as_object().ok_or(DocumentError::NotAnObject)?;

        match object.get("tables") {
            Some(Value::Object(tables)) => Ok(Self::from_snapshot_layout(object, tables)),
            Some(_) if object.contains_key("metadata") => Err(DocumentError::MalformedTables),
            _ => Ok(Self::from_generic_layout(object)),
        }
    }

    pub fn collection(&self, name: &str) -> Option<&Collection> {
        self.collections.iter().find(|c| c.name == name)
    }

    fn from_snapshot_layout(root: &Map<String, Value>, tables: &Map<String, Value>) -> Self {
        let raw_meta = root.get("metadata").cloned().unwrap_or(Value::Null);
        let metadata = DocumentMetadata {
            exported_at: raw_meta
                .get("exported_at")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            total_rows: raw_meta.get("total_rows").and_then(|v| v.as_u64()),
            raw: raw_meta,
        };

        let collections = tables
            .iter()
            .map(|(name, info)| {
                let (records, skipped_elements) = records_from(info.get("data"));
                let hints = info
                    .get("structure")
                    .and_then(|s| s.as_array())
                    .map(|cols| cols.iter().filter_map(hint_from).collect())
                    .unwrap_or_default();
                Collection {
                    name: name.clone(),
                    records,
                    hints,
                    declared_rows: info.get("row_count").and_then(|v| v.as_u64()),
                    skipped_elements,
                }
            })
            .collect();

        Self {
            metadata,
            collections,
        }
    }

    fn from_generic_layout(root: &Map<String, Value>) -> Self {
        let collections = root
            .iter()
            .filter(|(_, v)| v.is_array())
            .map(|(name, value)| {
                let (records, skipped_elements) = records_from(Some(value));
                Collection {
                    name: name.clone(),
                    records,
                    skipped_elements,
                    ..Default::default()
                }
            })
            .collect();

        Self {
            metadata: DocumentMetadata::default(),
            collections,
        }
    }
}

fn records_from(data: Option<&Value>) -> (Vec<Record>, usize) {
    let Some(Value::Array(items)) = data else {
        return (Vec::new(), 0);
    };
    let mut skipped = 0;
    let records = items
        .iter()
        .filter_map(|item| match item {
            Value::Object(obj) => Some(Record::from_json_object(obj)),
            _ => {
                skipped += 1;
                None
            }
        })
        .collect();
    (records, skipped)
}

fn hint_from(column: &Value) -> Option<ColumnHint> {
    let name = column.get("column_name")?.as_str()?;
    if name.is_empty() {
        return None;
    }
    Some(ColumnHint {
        name: name.to_string(),
        data_type: column
            .get("data_type")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        primary_key: column
            .get("primary_key")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        not_null: column
            .get("not_null")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
    })
}

/// Translate serde_json's 1-based line/column into a byte offset.
fn byte_offset(bytes: &[u8], line: usize, column: usize) -> Option<usize> {
    if line == 0 {
        return None;
    }
    let mut current = 1;
    let mut line_start = 0;
    for (i, b) in bytes.iter().enumerate() {
        if current == line {
            break;
        }
        if *b == b'\n' {
            current += 1;
            line_start = i + 1;
        }
    }
    if current != line {
        return None;
    }
    Some((line_start + column.saturating_sub(1)).min(bytes.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_layout_collections() {
        let doc = ParsedDocument::from_slice(
            br#"{"items": [{"id": 1, "price": 9.99}, {"id": 2, "price": "N/A"}], "note": "x"}"#,
        )
        .unwrap();
        assert_eq!(doc.collections.len(), 1);
        let items = doc.collection("items").unwrap();
        assert_eq!(items.records.len(), 2);
        assert_eq!(items.records[0].get("price"), Some(&ScalarValue::Real(9.99)));
        assert_eq!(
            items.records[1].get("price"),
            Some(&ScalarValue::Text("N/A".to_string()))
        );
    }

    #[test]
    fn test_snapshot_layout() {
        let json = br#"{
            "metadata": {"exported_at": "2025-01-02T03:04:05", "total_rows": 2},
            "tables": {
                "productos": {
                    "structure": [
                        {"column_name": "id", "data_type": "INTEGER", "primary_key": true},
                        {"column_name": "nombre", "data_type": "VARCHAR"}
                    ],
                    "data": [{"id": 1, "nombre": "pan"}, {"id": 2, "nombre": "leche"}],
                    "row_count": 3
                },
                "vacia": {"structure": [], "data": []}
            }
        }"#;
        let doc = ParsedDocument::from_slice(json).unwrap();
        assert_eq!(doc.metadata.exported_at.as_deref(), Some("2025-01-02T03:04:05"));
        assert_eq!(doc.metadata.total_rows, Some(2));
        assert_eq!(doc.collections.len(), 2);

        let productos = doc.collection("productos").unwrap();
        assert_eq!(productos.records.len(), 2);
        assert!(productos.hint("ID").unwrap().primary_key);
        assert!(productos.row_count_mismatch());
        assert!(doc.collection("vacia").unwrap().records.is_empty());
    }

    #[test]
    fn test_null_sentinels_and_nested_values() {
        let doc = ParsedDocument::from_slice(
            br#"{"t": [{"a": "", "b": "NULL", "c": "Null", "d": [1, 2], "e": {"k": true}}]}"#,
        )
        .unwrap();
        let r = &doc.collections[0].records[0];
        assert!(r.get("a").unwrap().is_null());
        assert!(r.get("b").unwrap().is_null());
        assert!(r.get("c").unwrap().is_null());
        assert_eq!(r.get("d"), Some(&ScalarValue::Text("[1,2]".to_string())));
        assert_eq!(r.get("e"), Some(&ScalarValue::Text("{\"k\":true}".to_string())));
    }

    #[test]
    fn test_field_order_preserved() {
        let doc = ParsedDocument::from_slice(br#"{"t": [{"z": 1, "a": 2, "m": 3}]}"#).unwrap();
        let names: Vec<&str> = doc.collections[0].records[0].iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_non_object_elements_skipped() {
        let doc = ParsedDocument::from_slice(br#"{"t": [1, {"a": 1}, "x"]}"#).unwrap();
        assert_eq!(doc.collections[0].records.len(), 1);
        assert_eq!(doc.collections[0].skipped_elements, 2);
    }

    #[test]
    fn test_syntax_error_reports_offset() {
        let input = b"{\n  \"t\": [1,, 2]\n}";
        let err = ParsedDocument::from_slice(input).unwrap_err();
        match err {
            DocumentError::Syntax { offset, line, .. } => {
                assert_eq!(line, 2);
                let offset = offset.expect("offset should be located");
                assert!(offset > 2 && offset < input.len());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_root_must_be_object() {
        assert!(matches!(
            ParsedDocument::from_slice(b"[1, 2]"),
            Err(DocumentError::NotAnObject)
        ));
    }

    #[test]
    fn test_deterministic() {
        let input = br#"{"a": [{"x": 1}], "b": [{"y": "two"}]}"#;
        assert_eq!(
            ParsedDocument::from_slice(input).unwrap(),
            ParsedDocument::from_slice(input).unwrap()
        );
    }

    #[test]
    fn test_large_unsigned_becomes_real() {
        let doc = ParsedDocument::from_slice(br#"{"t": [{"n": 18446744073709551615}]}"#).unwrap();
        assert!(matches!(
            doc.collections[0].records[0].get("n"),
            Some(ScalarValue::Real(_))
        ));
    }
}
