//! Read-only access to the current store for external consumers.
//!
//! [`ReadService`] is the one interface both consumer surfaces (HTTP and
//! chat) use. Every call pins the current store through a
//! [`StoreHandle`](crate::swap::StoreHandle) for its whole duration, so a
//! concurrent publish never changes the store under a running query.
//!
//! # Passthrough queries
//!
//! [`validate_read_only`] tokenizes the statement (skipping string
//! literals, quoted identifiers and comments) and accepts only a single
//! `SELECT` or `WITH` statement free of mutating or administrative
//! keywords. Store connections are opened read-only as well, so the engine
//! enforces the same rule.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use snapshot_relay_core::models::{Fingerprint, RunRecord};

use crate::config::QueryConfig;
use crate::error::QueryError;
use crate::readiness::{Readiness, ReadinessState};
use crate::store::{quote_ident, RowSet, TableInfo};
use crate::swap::{StoreHandle, StoreSwapper};

const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "REPLACE", "UPSERT", "CREATE", "DROP", "ALTER", "ATTACH",
    "DETACH", "PRAGMA", "VACUUM", "REINDEX", "ANALYZE",
];

/// Summary of the published store.
#[derive(Debug, Clone, Serialize)]
pub struct StoreSummary {
    pub file: String,
    pub fingerprint: Fingerprint,
    pub message_key: Option<String>,
    pub built_at: DateTime<Utc>,
    pub exported_at: Option<String>,
    pub tables: usize,
    pub rows: u64,
}

impl StoreSummary {
    fn of(store: &StoreHandle) -> Self {
        let manifest = store.manifest();
        Self {
            file: manifest.file.clone(),
            fingerprint: manifest.fingerprint.clone(),
            message_key: manifest.message_key.clone(),
            built_at: manifest.built_at,
            exported_at: manifest.exported_at.clone(),
            tables: store.tables().len(),
            rows: store.total_rows(),
        }
    }
}

/// The "system status" view.
#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub readiness: Readiness,
    pub store: Option<StoreSummary>,
    /// Retired stores still pinned by readers.
    pub draining: usize,
    pub active_run: Option<RunRecord>,
    /// Newest first.
    pub history: Vec<RunRecord>,
}

pub struct ReadService {
    swapper: Arc<StoreSwapper>,
    readiness: Arc<ReadinessState>,
    config: QueryConfig,
}

impl ReadService {
    pub fn new(swapper: Arc<StoreSwapper>, readiness: Arc<ReadinessState>, config: QueryConfig) -> Self {
        Self {
            swapper,
            readiness,
            config,
        }
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness.readiness()
    }

    pub fn max_rows(&self) -> usize {
        self.config.max_rows
    }

    pub fn status(&self) -> StatusView {
        let store = self.swapper.current();
        StatusView {
            readiness: self.readiness.readiness(),
            store: store.as_ref().map(StoreSummary::of),
            draining: self.swapper.draining_count(),
            active_run: self.readiness.active_run(),
            history: self.readiness.history(),
        }
    }

    fn pin(&self) -> Result<StoreHandle, QueryError> {
        self.swapper.current().ok_or(QueryError::NotReady)
    }

    fn is_blocked(&self, name: &str) -> bool {
        self.config
            .blocked_tables
            .iter()
            .any(|b| b.eq_ignore_ascii_case(name))
    }

    /// Tables of the current store, minus blocked ones.
    pub fn tables(&self) -> Result<Vec<TableInfo>, QueryError> {
        let store = self.pin()?;
        Ok(store
            .tables()
            .iter()
            .filter(|t| !self.is_blocked(&t.name))
            .cloned()
            .collect())
    }

    /// Rows of one table, capped at `limit` and at the configured maximum.
    pub async fn table_rows(&self, name: &str, limit: Option<usize>) -> Result<RowSet, QueryError> {
        if self.is_blocked(name) {
            return Err(QueryError::Rejected(format!("table '{}' is not queryable", name)));
        }
        let store = self.pin()?;
        let table = store
            .table(name)
            .ok_or_else(|| QueryError::UnknownTable(name.to_string()))?;

        let limit = limit.unwrap_or(self.config.max_rows).clamp(1, self.config.max_rows);
        let sql = format!("SELECT * FROM {}", quote_ident(&table.name));
        let rows = store.fetch(&sql, limit).await?;
        self.swapper.release(store);
        Ok(rows)
    }

    /// Run a read-only statement against the current store.
    pub async fn query(&self, sql: &str) -> Result<RowSet, QueryError> {
        let statement = validate_read_only(sql, &self.config.blocked_tables)?;
        let store = self.pin()?;
        tracing::debug!(store = %store.manifest().file, "passthrough query");
        let rows = store.fetch(statement, self.config.max_rows).await?;
        self.swapper.release(store);
        Ok(rows)
    }
}

#[derive(Debug, PartialEq)]
enum Token<'a> {
    Word(&'a str),
    Quoted(&'a str),
    Punct(char),
    Semicolon(usize),
}

fn tokenize(sql: &str) -> Result<Vec<Token<'_>>, QueryError> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    let unterminated = |what: &str| QueryError::Rejected(format!("unterminated {}", what));

    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b if b.is_ascii_whitespace() => i += 1,
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let end = sql[i + 2..].find("*/").ok_or_else(|| unterminated("comment"))?;
                i = i + 2 + end + 2;
            }
            b'\'' => {
                // '' inside a literal is an escaped quote.
                let mut j = i + 1;
                loop {
                    match bytes.get(j) {
                        None => return Err(unterminated("string literal")),
                        Some(b'\'') if bytes.get(j + 1) == Some(&b'\'') => j += 2,
                        Some(b'\'') => break,
                        Some(_) => j += 1,
                    }
                }
                i = j + 1;
            }
            b'"' | b'`' | b'[' => {
                let close = match c {
                    b'[' => b']',
                    other => other,
                };
                let start = i + 1;
                let mut j = start;
                loop {
                    match bytes.get(j) {
                        None => return Err(unterminated("quoted identifier")),
                        Some(&b) if b == close && c != b'[' && bytes.get(j + 1) == Some(&close) => j += 2,
                        Some(&b) if b == close => break,
                        Some(_) => j += 1,
                    }
                }
                tokens.push(Token::Quoted(&sql[start..j]));
                i = j + 1;
            }
            b';' => {
                tokens.push(Token::Semicolon(i));
                i += 1;
            }
            b if b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80 => {
                let start = i;
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric()
                        || bytes[i] == b'_'
                        || bytes[i] == b'$'
                        || bytes[i] >= 0x80)
                {
                    i += 1;
                }
                tokens.push(Token::Word(&sql[start..i]));
            }
            other => {
                tokens.push(Token::Punct(other as char));
                i += 1;
            }
        }
    }
    Ok(tokens)
}

/// Check that `sql` is a single pure read. Returns the statement without
/// its trailing semicolon.
pub fn validate_read_only<'a>(sql: &'a str, blocked_tables: &[String]) -> Result<&'a str, QueryError> {
    let tokens = tokenize(sql)?;

    let mut statement_end = sql.len();
    if let Some(pos) = tokens.iter().position(|t| matches!(t, Token::Semicolon(_))) {
        if tokens[pos + 1..].iter().any(|t| !matches!(t, Token::Semicolon(_))) {
            return Err(QueryError::Rejected(
                "only a single statement is allowed".to_string(),
            ));
        }
        if let Token::Semicolon(offset) = tokens[pos] {
            statement_end = offset;
        }
    }

    match tokens.first() {
        Some(Token::Word(w)) if w.eq_ignore_ascii_case("SELECT") || w.eq_ignore_ascii_case("WITH") => {}
        _ => {
            return Err(QueryError::Rejected(
                "only SELECT or WITH statements are allowed".to_string(),
            ))
        }
    }

    for (i, token) in tokens.iter().enumerate() {
        let name = match token {
            Token::Word(w) => {
                let upper = w.to_ascii_uppercase();
                if FORBIDDEN_KEYWORDS.contains(&upper.as_str()) {
                    // replace(x, y, z) is a scalar function, not a statement.
                    let is_call = upper == "REPLACE" && tokens.get(i + 1) == Some(&Token::Punct('('));
                    if !is_call {
                        return Err(QueryError::Rejected(format!(
                            "statement contains forbidden keyword {}",
                            upper
                        )));
                    }
                }
                *w
            }
            Token::Quoted(q) => *q,
            _ => continue,
        };
        if blocked_tables.iter().any(|b| b.eq_ignore_ascii_case(name)) {
            return Err(QueryError::Rejected(format!("table '{}' is not queryable", name)));
        }
    }

    Ok(sql[..statement_end].trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(sql: &str) -> String {
        validate_read_only(sql, &["usuarios".to_string()])
            .unwrap()
            .to_string()
    }

    fn rejected(sql: &str) -> String {
        match validate_read_only(sql, &["usuarios".to_string()]) {
            Err(QueryError::Rejected(msg)) => msg,
            other => panic!("expected rejection for {sql:?}, got {other:?}"),
        }
    }

    #[test]
    fn test_accepts_plain_reads() {
        assert_eq!(ok("SELECT * FROM items"), "SELECT * FROM items");
        assert_eq!(ok("  select id from items;  "), "select id from items");
        assert_eq!(
            ok("WITH t AS (SELECT 1 AS x) SELECT x FROM t"),
            "WITH t AS (SELECT 1 AS x) SELECT x FROM t"
        );
    }

    #[test]
    fn test_keywords_inside_literals_are_fine() {
        ok("SELECT * FROM items WHERE note = 'please DELETE me; DROP TABLE x'");
        ok("SELECT \"update\" FROM items");
        ok("SELECT 1 -- DROP TABLE items");
        ok("SELECT 1 /* insert */");
        ok("SELECT 'it''s' AS s");
    }

    #[test]
    fn test_replace_function_allowed() {
        ok("SELECT replace(name, 'a', 'b') FROM items");
        rejected("WITH t AS (SELECT 1) REPLACE INTO items VALUES (1)");
    }

    #[test]
    fn test_rejects_mutations() {
        assert!(rejected("DELETE FROM items").contains("SELECT or WITH"));
        assert!(rejected("WITH x AS (SELECT 1) DELETE FROM items").contains("DELETE"));
        rejected("PRAGMA table_info(items)");
        rejected("SELECT 1; DROP TABLE items");
        rejected("ATTACH DATABASE 'x' AS y");
        rejected("");
    }

    #[test]
    fn test_rejects_blocked_tables() {
        rejected("SELECT * FROM usuarios");
        rejected("SELECT * FROM \"Usuarios\"");
        ok("SELECT 'usuarios' AS label");
    }

    #[test]
    fn test_rejects_unterminated_input() {
        assert!(rejected("SELECT 'oops").contains("unterminated"));
        rejected("SELECT 1 /* never closed");
    }
}
