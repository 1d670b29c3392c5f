//! Human-readable status output for `relay status` and `relay load`.

use chrono::{DateTime, Utc};
use snapshot_relay_core::models::{RunRecord, RunState};

use crate::catalog::StoreCatalog;
use crate::query::StatusView;
use crate::store::TableInfo;

/// Print readiness, the current store and its tables.
pub fn print_status(status: &StatusView, tables: &[TableInfo], catalog: &StoreCatalog) {
    println!("Snapshot Relay — Status");
    println!("=======================");
    println!();
    println!("  Readiness:   {}", status.readiness);

    match &status.store {
        Some(store) => {
            let size = std::fs::metadata(catalog.path_of(&store.file))
                .map(|m| m.len())
                .unwrap_or(0);
            println!("  Store:       {}", store.file);
            println!("  Size:        {}", format_bytes(size));
            println!("  Fingerprint: {}", store.fingerprint.short());
            println!("  Built:       {}", format_relative(store.built_at));
            if let Some(exported) = &store.exported_at {
                println!("  Exported:    {}", exported);
            }
            println!("  Rows:        {}", store.rows);
        }
        None => println!("  Store:       none (no snapshot loaded yet)"),
    }

    print_tables(tables);

    if !status.history.is_empty() {
        println!();
        println!("  Recent runs:");
        for run in &status.history {
            println!("  {}", format_run(run));
        }
    }

    println!();
}

pub fn print_tables(tables: &[TableInfo]) {
    if tables.is_empty() {
        return;
    }
    println!();
    println!("  {:<32} {:>8} {:>8}", "TABLE", "COLUMNS", "ROWS");
    println!("  {}", "-".repeat(50));
    for t in tables {
        println!("  {:<32} {:>8} {:>8}", t.name, t.columns.len(), t.row_count);
    }
}

fn format_run(run: &RunRecord) -> String {
    let state = match run.state() {
        Some(RunState::Succeeded) => "SUCCEEDED",
        Some(RunState::FailedNoData) => "FAILED_NO_DATA",
        Some(RunState::FailedError) => "FAILED_ERROR",
        None => "RUNNING",
    };
    format!(
        "{:<10} {:<15} {}",
        run.trigger.to_string(),
        state,
        format_relative(run.started_at)
    )
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a timestamp relative to now (e.g. "3 hours ago").
fn format_relative(ts: DateTime<Utc>) -> String {
    let delta = (Utc::now() - ts).num_seconds();

    if delta < 0 {
        ts.format("%Y-%m-%d %H:%M").to_string()
    } else if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        ts.format("%Y-%m-%d %H:%M").to_string()
    }
}
