//! # Snapshot Relay Core
//!
//! Pure logic shared by the relay: the parsed document model, schema
//! inference over semi-structured records, content fingerprints and run
//! records.
//!
//! This crate contains no tokio, sqlx, network or filesystem I/O. Everything
//! here is deterministic given its inputs, which is what lets the store
//! builder treat an inferred schema as a fixed description of the tables it
//! is about to create.

pub mod document;
pub mod models;
pub mod schema;
