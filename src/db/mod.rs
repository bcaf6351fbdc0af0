pub mod migrations;
pub mod schema;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;
use std::path::Path;

/// Open (or create) the Verity database at the given path with the schema
/// initialized and migrations applied.
pub fn open_database(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open database at {}", path.display()))?;

    // WAL lets the self-test and CLI read while the server writes
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(std::time::Duration::from_millis(5000))?;

    schema::init_schema(&conn).context("failed to initialize schema")?;
    migrations::run_migrations(&mut conn).context("failed to run migrations")?;

    tracing::info!(path = %path.display(), "database initialized");
    Ok(conn)
}

/// Open an in-memory database with schema and migrations applied.
pub fn open_memory_database() -> Result<Connection> {
    let mut conn = Connection::open_in_memory().context("failed to open in-memory database")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    schema::init_schema(&conn).context("failed to initialize schema")?;
    migrations::run_migrations(&mut conn).context("failed to run migrations")?;
    Ok(conn)
}

/// Result of [`check_database_health`].
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub schema_version: u32,
    pub integrity_ok: bool,
    pub integrity_details: String,
    pub extractor_model: Option<String>,
    pub entity_count: u64,
    pub alias_count: u64,
    pub attribute_count: u64,
    pub relationship_count: u64,
    pub cache_count: u64,
    pub pending_conflicts: u64,
    pub log_count: u64,
}

/// Run `PRAGMA integrity_check` and gather row counts across all tables.
pub fn check_database_health(conn: &Connection) -> Result<HealthReport> {
    let integrity_details: String = conn
        .query_row("PRAGMA integrity_check", [], |row| row.get(0))
        .context("integrity check failed to run")?;

    let count = |sql: &str| -> Result<u64> {
        let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
        Ok(n as u64)
    };

    Ok(HealthReport {
        schema_version: migrations::get_schema_version(conn)?,
        integrity_ok: integrity_details == "ok",
        integrity_details,
        extractor_model: migrations::get_extractor_model(conn)?,
        entity_count: count("SELECT COUNT(*) FROM entities")?,
        alias_count: count("SELECT COUNT(*) FROM aliases")?,
        attribute_count: count("SELECT COUNT(*) FROM attributes")?,
        relationship_count: count("SELECT COUNT(*) FROM relationships")?,
        cache_count: count("SELECT COUNT(*) FROM fact_cache")?,
        pending_conflicts: count(
            "SELECT COUNT(*) FROM conflicts WHERE resolution_status = 'pending'",
        )?,
        log_count: count("SELECT COUNT(*) FROM audit_log")?,
    })
}
