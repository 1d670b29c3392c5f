//! Schema inference over semi-structured collections.
//!
//! [`infer_schema`] scans every record of every collection once and produces
//! an [`InferredSchema`]: one [`TableSchema`] per loadable collection with an
//! ordered list of columns, each carrying the narrowest [`ColumnType`]
//! compatible with every observed non-null value and a nullability flag.
//!
//! # Type lattice
//!
//! Candidate types are tried in the order `integer → real → boolean → text`.
//!
//! | Observed kind | Fits |
//! |---------------|------|
//! | integer | integer, real, text |
//! | real | real, text |
//! | boolean | boolean, text |
//! | text | text |
//!
//! Once a column has widened it never narrows back, so a later integer in a
//! text column stays text.
//!
//! # Name collisions
//!
//! SQLite identifiers are case-insensitive. Fields of one collection that
//! differ only by case fold into one column (first spelling wins).
//! Collections whose names differ only by case are merged into one table,
//! except when they share the same column set and disagree on a column's
//! type, which is a [`SchemaConflict`].

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::document::{Collection, ParsedDocument, Record, ScalarValue};

/// Relational column type assigned by inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Real,
    Boolean,
    Text,
}

impl ColumnType {
    /// Narrowest to widest.
    pub const WIDENING_ORDER: [ColumnType; 4] = [
        ColumnType::Integer,
        ColumnType::Real,
        ColumnType::Boolean,
        ColumnType::Text,
    ];

    fn rank(self) -> usize {
        match self {
            ColumnType::Integer => 0,
            ColumnType::Real => 1,
            ColumnType::Boolean => 2,
            ColumnType::Text => 3,
        }
    }

    /// Whether a value of `kind` can be stored in a column of this type
    /// without losing information.
    pub fn accepts(self, kind: ColumnType) -> bool {
        matches!(
            (self, kind),
            (ColumnType::Text, _)
                | (ColumnType::Integer, ColumnType::Integer)
                | (ColumnType::Real, ColumnType::Integer | ColumnType::Real)
                | (ColumnType::Boolean, ColumnType::Boolean)
        )
    }

    /// The narrowest type at or above `self` that also accepts `kind`.
    pub fn widen(self, kind: ColumnType) -> ColumnType {
        Self::WIDENING_ORDER
            .iter()
            .copied()
            .find(|t| t.rank() >= self.rank() && t.accepts(self) && t.accepts(kind))
            .unwrap_or(ColumnType::Text)
    }

    /// Kind of a non-null scalar.
    pub fn of(value: &ScalarValue) -> Option<ColumnType> {
        match value {
            ScalarValue::Null => None,
            ScalarValue::Integer(_) => Some(ColumnType::Integer),
            ScalarValue::Real(_) => Some(ColumnType::Real),
            ScalarValue::Boolean(_) => Some(ColumnType::Boolean),
            ScalarValue::Text(_) => Some(ColumnType::Text),
        }
    }

    /// Map a producer-declared type name to a column type.
    ///
    /// Only consulted for columns where every observed value is null.
    pub fn from_declared(declared: &str) -> ColumnType {
        let upper = declared.trim().to_ascii_uppercase();
        let base = upper.split('(').next().unwrap_or("").trim();
        match base {
            "INTEGER" | "INT" | "BIGINT" | "SMALLINT" | "TINYINT" => ColumnType::Integer,
            "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" | "DECIMAL" => ColumnType::Real,
            "BOOLEAN" | "BOOL" => ColumnType::Boolean,
            _ => ColumnType::Text,
        }
    }

    /// Declared type used in `CREATE TABLE`.
    ///
    /// Booleans are declared `BOOLEAN` so readers can tell them apart from
    /// integers; SQLite stores them as 0/1.
    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Text => "TEXT",
        }
    }

    /// Coerce a value into this column type.
    ///
    /// Callers only pass values whose kind the column accepts (inference
    /// guarantees it), so the fallback arms exist for totality.
    pub fn coerce(self, value: &ScalarValue) -> ScalarValue {
        match (self, value) {
            (_, ScalarValue::Null) => ScalarValue::Null,
            (ColumnType::Real, ScalarValue::Integer(i)) => ScalarValue::Real(*i as f64),
            (ColumnType::Text, ScalarValue::Integer(i)) => ScalarValue::Text(i.to_string()),
            (ColumnType::Text, ScalarValue::Real(r)) => ScalarValue::Text(real_text(*r)),
            (ColumnType::Text, ScalarValue::Boolean(b)) => ScalarValue::Text(b.to_string()),
            (_, v) => v.clone(),
        }
    }
}

/// Render a real the way JSON writes it, so `1.0` stays `"1.0"` and
/// `1e300` stays short.
fn real_text(r: f64) -> String {
    serde_json::Number::from_f64(r)
        .map(|n| n.to_string())
        .unwrap_or_else(|| r.to_string())
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Integer => "integer",
            ColumnType::Real => "real",
            ColumnType::Boolean => "boolean",
            ColumnType::Text => "text",
        };
        f.write_str(name)
    }
}

/// One inferred column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InferredColumn {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub primary_key: bool,
}

/// Inferred layout of one table, plus where its records come from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<InferredColumn>,
    /// Indexes into [`ParsedDocument::collections`] feeding this table.
    #[serde(skip)]
    pub sources: Vec<usize>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&InferredColumn> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn primary_key(&self) -> Vec<&InferredColumn> {
        self.columns.iter().filter(|c| c.primary_key).collect()
    }

    /// Values of `record` in column order, coerced to each column's type.
    /// Missing fields are null.
    pub fn row_values(&self, record: &Record) -> Vec<ScalarValue> {
        self.columns
            .iter()
            .map(|c| match record.get_ignore_case(&c.name) {
                Some(v) => c.column_type.coerce(v),
                None => ScalarValue::Null,
            })
            .collect()
    }

    /// All records feeding this table, in document order.
    pub fn records<'a>(&'a self, doc: &'a ParsedDocument) -> impl Iterator<Item = &'a Record> + 'a {
        self.sources
            .iter()
            .filter_map(|i| doc.collections.get(*i))
            .flat_map(|c| c.records.iter())
    }
}

/// Why a collection did not become a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The collection has a blank name.
    EmptyName,
    Empty,
    ReservedName,
    NoColumns,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedCollection {
    pub name: String,
    pub reason: SkipReason,
}

/// A column declared `not_null` that the data shows to be nullable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HintMismatch {
    pub table: String,
    pub column: String,
}

/// Schema for a whole document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InferredSchema {
    pub tables: Vec<TableSchema>,
    pub skipped: Vec<SkippedCollection>,
    /// Declared nullability lost to observed data; the data wins.
    pub hint_mismatches: Vec<HintMismatch>,
}

impl InferredSchema {
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }
}

/// Two same-named collections disagree on a column's type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("schema conflict in '{table}': column '{column}' inferred as {left} and {right}")]
pub struct SchemaConflict {
    pub table: String,
    pub column: String,
    pub left: ColumnType,
    pub right: ColumnType,
}

struct ColumnAcc {
    name: String,
    observed: Option<ColumnType>,
    saw_null: bool,
    present_in: usize,
    last_record: Option<usize>,
}

/// Infer columns for a set of collections treated as one table.
fn infer_columns(collections: &[&Collection]) -> Vec<InferredColumn> {
    let mut columns: Vec<ColumnAcc> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut total = 0usize;

    for record in collections.iter().flat_map(|c| c.records.iter()) {
        let record_no = total;
        total += 1;
        for (field, value) in record.iter() {
            if field.trim().is_empty() {
                continue;
            }
            let slot = *index.entry(field.to_ascii_lowercase()).or_insert_with(|| {
                columns.push(ColumnAcc {
                    name: field.to_string(),
                    observed: None,
                    saw_null: false,
                    present_in: 0,
                    last_record: None,
                });
                columns.len() - 1
            });
            let acc = &mut columns[slot];
            if acc.last_record != Some(record_no) {
                acc.present_in += 1;
                acc.last_record = Some(record_no);
            }
            match ColumnType::of(value) {
                None => acc.saw_null = true,
                Some(kind) => {
                    acc.observed = Some(match acc.observed {
                        None => kind,
                        Some(current) => current.widen(kind),
                    });
                }
            }
        }
    }

    let hint = |name: &str| collections.iter().find_map(|c| c.hint(name));

    columns
        .into_iter()
        .map(|acc| {
            let nullable = acc.saw_null || acc.present_in < total;
            let column_type = acc.observed.unwrap_or_else(|| {
                hint(&acc.name)
                    .and_then(|h| h.data_type.as_deref())
                    .map(ColumnType::from_declared)
                    .unwrap_or(ColumnType::Text)
            });
            let primary_key = !nullable && hint(&acc.name).is_some_and(|h| h.primary_key);
            InferredColumn {
                name: acc.name,
                column_type,
                nullable,
                primary_key,
            }
        })
        .collect()
}

fn column_set(columns: &[InferredColumn]) -> Vec<String> {
    let mut names: Vec<String> = columns.iter().map(|c| c.name.to_ascii_lowercase()).collect();
    names.sort();
    names
}

/// Infer the relational schema of a parsed document.
///
/// Empty collections, blank names and reserved (`sqlite_`) names are
/// skipped and reported in [`InferredSchema::skipped`].
pub fn infer_schema(doc: &ParsedDocument) -> Result<InferredSchema, SchemaConflict> {
    let mut schema = InferredSchema::default();

    // Group by case-insensitive name, preserving first-seen order.
    let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
    for (i, collection) in doc.collections.iter().enumerate() {
        if collection.name.trim().is_empty() {
            schema.skipped.push(SkippedCollection {
                name: collection.name.clone(),
                reason: SkipReason::EmptyName,
            });
            continue;
        }
        if collection.records.is_empty() {
            schema.skipped.push(SkippedCollection {
                name: collection.name.clone(),
                reason: SkipReason::Empty,
            });
            continue;
        }
        if collection.name.to_ascii_lowercase().starts_with("sqlite_") {
            schema.skipped.push(SkippedCollection {
                name: collection.name.clone(),
                reason: SkipReason::ReservedName,
            });
            continue;
        }
        match groups
            .iter_mut()
            .find(|(name, _)| name.eq_ignore_ascii_case(&collection.name))
        {
            Some((_, members)) => members.push(i),
            None => groups.push((collection.name.clone(), vec![i])),
        }
    }

    for (name, members) in groups {
        let collections: Vec<&Collection> = members.iter().map(|i| &doc.collections[*i]).collect();

        if collections.len() > 1 {
            check_conflicts(&name, &collections)?;
        }

        let columns = infer_columns(&collections);
        if columns.is_empty() {
            schema.skipped.push(SkippedCollection {
                name,
                reason: SkipReason::NoColumns,
            });
            continue;
        }
        for column in columns.iter().filter(|c| c.nullable) {
            if collections
                .iter()
                .any(|c| c.hint(&column.name).is_some_and(|h| h.not_null))
            {
                schema.hint_mismatches.push(HintMismatch {
                    table: name.clone(),
                    column: column.name.clone(),
                });
            }
        }
        schema.tables.push(TableSchema {
            name,
            columns,
            sources: members,
        });
    }

    Ok(schema)
}

/// Same-named collections with an identical column set must agree on types.
fn check_conflicts(name: &str, collections: &[&Collection]) -> Result<(), SchemaConflict> {
    let per_collection: Vec<Vec<InferredColumn>> = collections
        .iter()
        .map(|c| infer_columns(std::slice::from_ref(c)))
        .collect();

    let first = &per_collection[0];
    let first_set = column_set(first);
    for other in &per_collection[1..] {
        if column_set(other) != first_set {
            continue;
        }
        for left in first {
            let Some(right) = other
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(&left.name))
            else {
                continue;
            };
            if left.column_type != right.column_type {
                return Err(SchemaConflict {
                    table: name.to_string(),
                    column: left.name.clone(),
                    left: left.column_type,
                    right: right.column_type,
                });
            }
        }
    }
    Ok(())
}
