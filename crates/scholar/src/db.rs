//! SQLite connection management.
//!
//! One database file holds the document ledger, the vector index, and
//! the knowledge graph. WAL mode is enabled so retrieval reads and
//! ingestion writes can overlap; the pool allows up to 5 connections.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Create a connection pool to the SQLite database at `path`.
///
/// Creates the file and parent directories if missing and enables WAL
/// journal mode.
pub async fn connect(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}
