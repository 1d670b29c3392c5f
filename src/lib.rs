//! # Snapshot Relay
//!
//! Pulls a compressed data snapshot out of a mailbox, rebuilds it as a
//! read-only SQLite store, and hot-swaps that store under live readers.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌────────────┐   ┌──────────────┐   ┌─────────────┐
//! │  Mailbox  │──▶│ Decompress │──▶│ Infer + Load │──▶│   Swapper   │
//! │  (IMAP)   │   │  + Parse   │   │ (new SQLite) │   │ Arc publish │
//! └───────────┘   └────────────┘   └──────────────┘   └──────┬──────┘
//!       ▲                                                    │
//!       │ trigger (startup / interval / manual)              ▼
//! ┌─────┴───────┐                                     ┌─────────────┐
//! │ Coordinator │                                     │ ReadService │──▶ HTTP / CLI
//! │ single-run  │                                     │ (read-only) │
//! └─────────────┘                                     └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! relay load ./backup.json.gz            # build a store from a local file
//! relay query "SELECT * FROM items"      # read-only passthrough
//! relay serve                            # scheduler + HTTP adapter
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Pipeline and query error types |
//! | [`retrieve`] | Mailbox seam, attachment extraction, async retriever |
//! | [`imap_client`] | IMAP-over-TLS mailbox |
//! | [`decompress`] | Attachment decompression and parsing |
//! | [`loader`] | Store construction from an inferred schema |
//! | [`store`] | Read-only store instances |
//! | [`swap`] | Atomic publication under live readers |
//! | [`catalog`] | Store files and the `CURRENT.json` pointer |
//! | [`readiness`] | `NOT_READY → READY` latch and run history |
//! | [`pipeline`] | One run: retrieve, parse, build, publish |
//! | [`scheduler`] | Single-flight run coordinator and interval loop |
//! | [`query`] | Read service and read-only query validation |
//! | [`server`] | HTTP adapter |
//! | [`db`] | SQLite pool construction |

pub mod app;
pub mod catalog;
pub mod config;
pub mod db;
pub mod decompress;
pub mod error;
pub mod imap_client;
pub mod loader;
pub mod pipeline;
pub mod query;
pub mod readiness;
pub mod retrieve;
pub mod scheduler;
pub mod server;
pub mod stats;
pub mod store;
pub mod swap;
