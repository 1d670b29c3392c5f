//! A finished, read-only relational store.
//!
//! A [`StoreInstance`] owns one SQLite file plus a read-only pool over it.
//! Once built it never changes. When the swapper retires an instance it is
//! marked for discard, and the file is deleted when the last handle to the
//! instance is dropped.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snapshot_relay_core::document::ScalarValue;
use snapshot_relay_core::models::Fingerprint;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Column, Executor, Row, TypeInfo, ValueRef};

use crate::db;

/// Provenance of a store, persisted in the catalog pointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreManifest {
    /// File name relative to the store directory.
    pub file: String,
    pub fingerprint: Fingerprint,
    pub message_key: Option<String>,
    pub built_at: DateTime<Utc>,
    pub exported_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
    pub nullable: bool,
    pub primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub row_count: u64,
}

/// Rows returned from a store, capped by the caller's limit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<ScalarValue>>,
    /// True when more rows existed than the limit allowed.
    pub truncated: bool,
}

pub struct StoreInstance {
    path: PathBuf,
    pool: SqlitePool,
    manifest: StoreManifest,
    tables: Vec<TableInfo>,
    discard_on_drop: AtomicBool,
}

impl std::fmt::Debug for StoreInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreInstance")
            .field("path", &self.path)
            .field("fingerprint", &self.manifest.fingerprint.short())
            .field("tables", &self.tables.len())
            .finish()
    }
}

impl StoreInstance {
    /// Open a finished store file and reflect its tables.
    pub async fn open(path: &Path, manifest: StoreManifest) -> Result<Self, sqlx::Error> {
        let pool = db::open_read_only(path).await?;
        let tables = match reflect_tables(&pool).await {
            Ok(tables) => tables,
            Err(e) => {
                pool.close().await;
                return Err(e);
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            pool,
            manifest,
            tables,
            discard_on_drop: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn manifest(&self) -> &StoreManifest {
        &self.manifest
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.manifest.fingerprint
    }

    pub fn tables(&self) -> &[TableInfo] {
        &self.tables
    }

    /// Look up a table by name, ignoring ASCII case like SQLite does.
    pub fn table(&self, name: &str) -> Option<&TableInfo> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn total_rows(&self) -> u64 {
        self.tables.iter().map(|t| t.row_count).sum()
    }

    /// Mark the instance retired: its file goes away with the last handle.
    pub fn retire(&self) {
        self.discard_on_drop.store(true, Ordering::SeqCst);
    }

    pub fn is_retired(&self) -> bool {
        self.discard_on_drop.load(Ordering::SeqCst)
    }

    /// Run a read statement and return at most `limit` rows.
    ///
    /// The statement is wrapped in an outer `SELECT .. LIMIT` so the cap is
    /// enforced by SQLite rather than by discarding fetched rows.
    pub async fn fetch(&self, sql: &str, limit: usize) -> Result<RowSet, sqlx::Error> {
        // One extra row detects truncation; SQLite limits are signed 64-bit.
        let fetch_limit = (limit as u64).saturating_add(1).min(i64::MAX as u64);
        let wrapped = format!("SELECT * FROM (\n{}\n) LIMIT {}", sql, fetch_limit);
        let mut rows = sqlx::query(&wrapped).fetch_all(&self.pool).await?;

        let truncated = rows.len() > limit;
        rows.truncate(limit);

        let columns = match rows.first() {
            Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
            None => self
                .pool
                .describe(&wrapped)
                .await?
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
        };

        let rows = rows
            .iter()
            .map(decode_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RowSet {
            columns,
            rows,
            truncated,
        })
    }
}

impl Drop for StoreInstance {
    fn drop(&mut self) {
        if !self.is_retired() {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let pool = self.pool.clone();
            handle.spawn(async move { pool.close().await });
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::info!(path = %self.path.display(), "removed retired store"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "failed to remove retired store"),
        }
        let _ = std::fs::remove_file(journal_path(&self.path));
    }
}

pub(crate) fn journal_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push("-journal");
    PathBuf::from(name)
}

/// Quote an identifier for SQLite.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

async fn reflect_tables(pool: &SqlitePool) -> Result<Vec<TableInfo>, sqlx::Error> {
    let names: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY rowid",
    )
    .fetch_all(pool)
    .await?;

    let mut tables = Vec::with_capacity(names.len());
    for name in names {
        let columns = sqlx::query(
            "SELECT name, type, \"notnull\", pk FROM pragma_table_info(?) ORDER BY cid",
        )
        .bind(&name)
        .fetch_all(pool)
        .await?
        .iter()
        .map(|row| {
            Ok(ColumnInfo {
                name: row.try_get("name")?,
                declared_type: row.try_get("type")?,
                nullable: row.try_get::<i64, _>("notnull")? == 0,
                primary_key: row.try_get::<i64, _>("pk")? > 0,
            })
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()?;

        let row_count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", quote_ident(&name)))
            .fetch_one(pool)
            .await?;

        tables.push(TableInfo {
            name,
            columns,
            row_count: row_count as u64,
        });
    }
    Ok(tables)
}

fn decode_row(row: &SqliteRow) -> Result<Vec<ScalarValue>, sqlx::Error> {
    (0..row.len()).map(|i| decode_cell(row, i)).collect()
}

/// Decode one cell by its storage class. Integers in a column declared
/// `BOOLEAN` come back as booleans; blobs come back as base64 text.
fn decode_cell(row: &SqliteRow, index: usize) -> Result<ScalarValue, sqlx::Error> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(ScalarValue::Null);
    }
    let storage = raw.type_info().name().to_string();
    let declared_bool = row
        .column(index)
        .type_info()
        .name()
        .eq_ignore_ascii_case("BOOLEAN");

    let value = match storage.as_str() {
        "INTEGER" => {
            let v: i64 = row.try_get_unchecked(index)?;
            if declared_bool {
                ScalarValue::Boolean(v != 0)
            } else {
                ScalarValue::Integer(v)
            }
        }
        "REAL" => ScalarValue::Real(row.try_get_unchecked(index)?),
        "BLOB" => {
            let bytes: Vec<u8> = row.try_get_unchecked(index)?;
            ScalarValue::Text(base64::engine::general_purpose::STANDARD.encode(bytes))
        }
        _ => ScalarValue::Text(row.try_get_unchecked(index)?),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn sample_store(dir: &Path) -> PathBuf {
        let path = dir.join("store-test.sqlite");
        let pool = db::create(&path).await.unwrap();
        for sql in [
            "CREATE TABLE \"items\" (\"id\" INTEGER NOT NULL, \"name\" TEXT, \"active\" BOOLEAN, \"price\" REAL, PRIMARY KEY (\"id\"))",
            "INSERT INTO items VALUES (1, 'a', 1, 1.5)",
            "INSERT INTO items VALUES (2, NULL, 0, 2.0)",
            "INSERT INTO items VALUES (3, 'c', NULL, NULL)",
        ] {
            sqlx::query(sql).execute(&pool).await.unwrap();
        }
        pool.close().await;
        path
    }

    fn manifest(file: &str) -> StoreManifest {
        StoreManifest {
            file: file.to_string(),
            fingerprint: Fingerprint::of(b"x"),
            message_key: None,
            built_at: Utc::now(),
            exported_at: None,
        }
    }

    #[tokio::test]
    async fn test_reflects_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = sample_store(dir.path()).await;
        let store = StoreInstance::open(&path, manifest("store-test.sqlite")).await.unwrap();

        let items = store.table("ITEMS").unwrap();
        assert_eq!(items.row_count, 3);
        assert_eq!(items.columns.len(), 4);
        assert!(items.columns[0].primary_key);
        assert!(!items.columns[0].nullable);
        assert_eq!(items.columns[2].declared_type, "BOOLEAN");
        assert_eq!(store.total_rows(), 3);
    }

    #[tokio::test]
    async fn test_fetch_decodes_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = sample_store(dir.path()).await;
        let store = StoreInstance::open(&path, manifest("store-test.sqlite")).await.unwrap();

        let set = store.fetch("SELECT * FROM items ORDER BY id", 2).await.unwrap();
        assert!(set.truncated);
        assert_eq!(set.columns, vec!["id", "name", "active", "price"]);
        assert_eq!(
            set.rows[0],
            vec![
                ScalarValue::Integer(1),
                ScalarValue::Text("a".into()),
                ScalarValue::Boolean(true),
                ScalarValue::Real(1.5),
            ]
        );
        assert_eq!(set.rows[1][1], ScalarValue::Null);

        let set = store.fetch("SELECT id FROM items WHERE id > 10", 5).await.unwrap();
        assert!(set.rows.is_empty());
        assert!(!set.truncated);
        assert_eq!(set.columns, vec!["id"]);
    }

    #[tokio::test]
    async fn test_fetch_with_huge_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = sample_store(dir.path()).await;
        let store = StoreInstance::open(&path, manifest("store-test.sqlite")).await.unwrap();

        let set = store.fetch("SELECT id FROM items", usize::MAX).await.unwrap();
        assert_eq!(set.rows.len(), 3);
        assert!(!set.truncated);
    }

    #[tokio::test]
    async fn test_retired_store_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = sample_store(dir.path()).await;
        let store = StoreInstance::open(&path, manifest("store-test.sqlite")).await.unwrap();

        store.retire();
        drop(store);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_live_store_file_kept_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = sample_store(dir.path()).await;
        let store = StoreInstance::open(&path, manifest("store-test.sqlite")).await.unwrap();
        drop(store);
        assert!(path.exists());
    }

    #[test]
    fn test_quote_ident_escapes() {
        assert_eq!(quote_ident("plain"), "\"plain\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
