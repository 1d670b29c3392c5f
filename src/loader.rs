//! Store construction from a parsed document.
//!
//! [`StoreBuilder::build`] infers the schema, creates a brand-new SQLite file
//! in the store directory and loads every table inside one transaction. The
//! file is only handed back as a [`StoreInstance`] once the transaction has
//! committed; on any failure the file is removed and the build reports
//! [`PipelineError::BuildAborted`]. Nothing here touches the published
//! store.

use std::path::Path;

use chrono::Utc;
use snapshot_relay_core::document::{ParsedDocument, ScalarValue};
use snapshot_relay_core::models::KnownArtifact;
use snapshot_relay_core::schema::{infer_schema, InferredSchema, TableSchema};
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::Sqlite;

use crate::catalog::StoreCatalog;
use crate::db;
use crate::error::PipelineError;
use crate::store::{journal_path, quote_ident, StoreInstance, StoreManifest};

pub struct StoreBuilder {
    catalog: StoreCatalog,
}

impl StoreBuilder {
    pub fn new(catalog: StoreCatalog) -> Self {
        Self { catalog }
    }

    /// Build a new, unpublished store for `document`.
    pub async fn build(
        &self,
        document: &ParsedDocument,
        source: &KnownArtifact,
    ) -> Result<StoreInstance, PipelineError> {
        let schema = infer_schema(document)?;

        for skipped in &schema.skipped {
            tracing::warn!(collection = %skipped.name, reason = ?skipped.reason, "skipping collection");
        }
        for mismatch in &schema.hint_mismatches {
            tracing::warn!(
                table = %mismatch.table,
                column = %mismatch.column,
                "column declared not_null holds nulls; created as nullable"
            );
        }
        for collection in &document.collections {
            if collection.row_count_mismatch() {
                tracing::warn!(
                    collection = %collection.name,
                    declared = ?collection.declared_rows,
                    actual = collection.records.len(),
                    "declared row count disagrees with data"
                );
            }
            if collection.skipped_elements > 0 {
                tracing::warn!(
                    collection = %collection.name,
                    skipped = collection.skipped_elements,
                    "ignored non-object elements"
                );
            }
        }

        if schema.tables.is_empty() {
            return Err(PipelineError::BuildAborted(
                "document has no loadable collections".to_string(),
            ));
        }

        let built_at = Utc::now();
        let file = StoreCatalog::store_file_name(built_at, &source.fingerprint);
        let path = self.catalog.path_of(&file);
        discard(&path);

        let rows = match write_tables(&path, document, &schema).await {
            Ok(rows) => rows,
            Err(e) => {
                discard(&path);
                tracing::warn!(file = %file, error = %e, "store build rolled back");
                return Err(PipelineError::BuildAborted(e.to_string()));
            }
        };

        let manifest = StoreManifest {
            file: file.clone(),
            fingerprint: source.fingerprint.clone(),
            message_key: source.message_key.clone(),
            built_at,
            exported_at: document.metadata.exported_at.clone(),
        };

        match StoreInstance::open(&path, manifest).await {
            Ok(store) => {
                tracing::info!(
                    file = %file,
                    tables = schema.tables.len(),
                    rows,
                    "built store"
                );
                Ok(store)
            }
            Err(e) => {
                discard(&path);
                Err(PipelineError::BuildAborted(e.to_string()))
            }
        }
    }
}

fn discard(path: &Path) {
    let _ = std::fs::remove_file(path);
    let _ = std::fs::remove_file(journal_path(path));
}

/// Create every table and insert every row in a single transaction.
async fn write_tables(
    path: &Path,
    document: &ParsedDocument,
    schema: &InferredSchema,
) -> Result<u64, sqlx::Error> {
    let pool = db::create(path).await?;

    let result = async {
        let mut tx = pool.begin().await?;
        let mut rows = 0u64;

        for table in &schema.tables {
            sqlx::query(&create_table_sql(table))
                .execute(&mut *tx)
                .await?;

            let insert = insert_sql(table);
            for record in table.records(document) {
                let mut query = sqlx::query(&insert);
                for value in table.row_values(record) {
                    query = bind_scalar(query, value);
                }
                query.execute(&mut *tx).await?;
                rows += 1;
            }
        }

        tx.commit().await?;
        Ok(rows)
    }
    .await;

    pool.close().await;
    result
}

pub(crate) fn create_table_sql(table: &TableSchema) -> String {
    let mut defs: Vec<String> = table
        .columns
        .iter()
        .map(|c| {
            let mut def = format!("{} {}", quote_ident(&c.name), c.column_type.sql_type());
            if !c.nullable {
                def.push_str(" NOT NULL");
            }
            def
        })
        .collect();

    let pk: Vec<String> = table.primary_key().iter().map(|c| quote_ident(&c.name)).collect();
    if !pk.is_empty() {
        defs.push(format!("PRIMARY KEY ({})", pk.join(", ")));
    }

    format!("CREATE TABLE {} ({})", quote_ident(&table.name), defs.join(", "))
}

fn insert_sql(table: &TableSchema) -> String {
    let columns: Vec<String> = table.columns.iter().map(|c| quote_ident(&c.name)).collect();
    let placeholders = vec!["?"; table.columns.len()].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(&table.name),
        columns.join(", "),
        placeholders
    )
}

fn bind_scalar<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: ScalarValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        ScalarValue::Null => query.bind(None::<String>),
        ScalarValue::Integer(i) => query.bind(i),
        ScalarValue::Real(r) => query.bind(r),
        ScalarValue::Boolean(b) => query.bind(b),
        ScalarValue::Text(s) => query.bind(s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapshot_relay_core::models::Fingerprint;

    fn source(bytes: &[u8]) -> KnownArtifact {
        KnownArtifact {
            fingerprint: Fingerprint::of(bytes),
            message_key: Some("1:10".to_string()),
        }
    }

    fn parse(json: &str) -> ParsedDocument {
        ParsedDocument::from_slice(json.as_bytes()).unwrap()
    }

    #[tokio::test]
    async fn test_build_round_trips_records() {
        let dir = tempfile::tempdir().unwrap();
        let builder = StoreBuilder::new(StoreCatalog::new(dir.path()));
        let doc = parse(r#"{"items": [{"id": 1, "price": 9.99}, {"id": 2, "price": "N/A"}]}"#);

        let store = builder.build(&doc, &source(b"a")).await.unwrap();
        let items = store.table("items").unwrap();
        assert_eq!(items.row_count, 2);
        assert_eq!(items.columns[1].declared_type, "TEXT");

        let set = store.fetch("SELECT price FROM items ORDER BY id", 10).await.unwrap();
        assert_eq!(
            set.rows,
            vec![
                vec![ScalarValue::Text("9.99".into())],
                vec![ScalarValue::Text("N/A".into())],
            ]
        );
        assert_eq!(store.manifest().message_key.as_deref(), Some("1:10"));
    }

    #[tokio::test]
    async fn test_snapshot_layout_primary_key() {
        let dir = tempfile::tempdir().unwrap();
        let builder = StoreBuilder::new(StoreCatalog::new(dir.path()));
        let doc = parse(
            r#"{
                "metadata": {"exported_at": "2024-05-01T10:00:00"},
                "tables": {
                    "clientes": {
                        "structure": [{"column_name": "id", "data_type": "INTEGER", "primary_key": true}],
                        "data": [{"id": 1, "nombre": "Ana"}, {"id": 2, "nombre": "Luis"}],
                        "row_count": 2
                    }
                }
            }"#,
        );

        let store = builder.build(&doc, &source(b"b")).await.unwrap();
        let t = store.table("clientes").unwrap();
        assert!(t.columns[0].primary_key);
        assert_eq!(store.manifest().exported_at.as_deref(), Some("2024-05-01T10:00:00"));
    }

    #[tokio::test]
    async fn test_duplicate_primary_key_aborts_whole_build() {
        let dir = tempfile::tempdir().unwrap();
        let builder = StoreBuilder::new(StoreCatalog::new(dir.path()));
        let doc = parse(
            r#"{
                "tables": {
                    "a": {"data": [{"x": 1}]},
                    "b": {
                        "structure": [{"column_name": "id", "primary_key": true}],
                        "data": [{"id": 1}, {"id": 1}]
                    }
                }
            }"#,
        );

        let err = builder.build(&doc, &source(b"c")).await.unwrap_err();
        assert!(matches!(err, PipelineError::BuildAborted(_)));
        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftovers.is_empty(), "failed build must leave no store file");
    }

    #[tokio::test]
    async fn test_no_loadable_collections_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let builder = StoreBuilder::new(StoreCatalog::new(dir.path()));
        let doc = parse(r#"{"empty": [], "note": "not a collection"}"#);

        let err = builder.build(&doc, &source(b"d")).await.unwrap_err();
        assert!(matches!(err, PipelineError::BuildAborted(_)));
    }

    #[tokio::test]
    async fn test_blank_collection_and_field_names_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let builder = StoreBuilder::new(StoreCatalog::new(dir.path()));
        let doc = parse(r#"{"": [{"a": 1}], "other": [{"": 1, "b": 2}]}"#);

        let store = builder.build(&doc, &source(b"e")).await.unwrap();
        let names: Vec<&str> = store.tables().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["other"]);
        let cols: Vec<&str> = store.tables()[0]
            .columns
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(cols, vec!["b"]);
    }

    #[tokio::test]
    async fn test_schema_conflict_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        let builder = StoreBuilder::new(StoreCatalog::new(dir.path()));
        let doc = parse(r#"{"Items": [{"id": 1}], "items": [{"id": "x"}]}"#);

        let err = builder.build(&doc, &source(b"e")).await.unwrap_err();
        assert_eq!(err.kind(), "schema_conflict");
    }

    #[test]
    fn test_create_table_sql_quotes_and_constraints() {
        let doc = parse(r#"{"my table": [{"a\"b": 1, "c": null}]}"#);
        let schema = infer_schema(&doc).unwrap();
        assert_eq!(
            create_table_sql(&schema.tables[0]),
            "CREATE TABLE \"my table\" (\"a\"\"b\" INTEGER NOT NULL, \"c\" TEXT)"
        );
    }
}
