use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::HashMap;

use super::cache;
use crate::error::Result;

/// Per-user diagnostic snapshot.
#[derive(Debug, Serialize)]
pub struct DiagnosticInfo {
    pub user_id: String,
    /// Live (proposed or active) entities.
    pub entity_count: u64,
    pub by_status: HashMap<String, u64>,
    pub by_type: HashMap<String, u64>,
    pub alias_count: u64,
    pub current_attributes: u64,
    pub historical_attributes: u64,
    pub relationship_count: u64,
    /// Unexpired cache rows.
    pub cache_entries: u64,
    pub pending_conflicts: u64,
    /// Most recent write to any entity or attribute of this user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

/// Compute diagnostics for one user.
pub fn diagnostic_info(conn: &Connection, user_id: &str) -> Result<DiagnosticInfo> {
    let count = |sql: &str| -> Result<u64> {
        let n: i64 = conn.query_row(sql, params![user_id], |row| row.get(0))?;
        Ok(n as u64)
    };

    let by_status = group_counts(conn, user_id, "status", &["proposed", "active", "merged", "inactive"])?;
    let by_type = group_counts(conn, user_id, "entity_type", &["person", "pet", "place", "thing"])?;
    let entity_count = by_status.get("proposed").copied().unwrap_or(0)
        + by_status.get("active").copied().unwrap_or(0);

    let last_updated: Option<String> = conn.query_row(
        "SELECT MAX(ts) FROM ( \
             SELECT MAX(updated_at) AS ts FROM entities WHERE user_id = ?1 \
             UNION ALL SELECT MAX(created_at) FROM attributes WHERE user_id = ?1 \
             UNION ALL SELECT MAX(updated_at) FROM relationships WHERE user_id = ?1)",
        params![user_id],
        |row| row.get(0),
    )?;

    Ok(DiagnosticInfo {
        user_id: user_id.to_string(),
        entity_count,
        by_status,
        by_type,
        alias_count: count(
            "SELECT COUNT(*) FROM aliases a JOIN entities e ON e.id = a.entity_id WHERE e.user_id = ?1",
        )?,
        current_attributes: count("SELECT COUNT(*) FROM attributes WHERE user_id = ?1 AND is_current = 1")?,
        historical_attributes: count("SELECT COUNT(*) FROM attributes WHERE user_id = ?1 AND is_current = 0")?,
        relationship_count: count("SELECT COUNT(*) FROM relationships WHERE user_id = ?1")?,
        cache_entries: cache::count_entries(conn, user_id)?,
        pending_conflicts: count(
            "SELECT COUNT(*) FROM conflicts WHERE user_id = ?1 AND resolution_status = 'pending'",
        )?,
        last_updated,
    })
}

/// Entity counts grouped by one column, with every known value present.
fn group_counts(
    conn: &Connection,
    user_id: &str,
    column: &str,
    known: &[&str],
) -> Result<HashMap<String, u64>> {
    let mut map: HashMap<String, u64> = known.iter().map(|k| (k.to_string(), 0)).collect();

    let mut stmt = conn.prepare(&format!(
        "SELECT {column}, COUNT(*) FROM entities WHERE user_id = ?1 GROUP BY {column}"
    ))?;
    let rows: Vec<(String, i64)> = stmt
        .query_map(params![user_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    for (value, n) in rows {
        map.insert(value, n as u64);
    }
    Ok(map)
}
