//! Read-through cache of critical-fact projections.
//!
//! Rows live in `fact_cache` keyed by `(user_id, cache_key)` and hold JSON.
//! The cache is never authoritative: a miss, an expired row, or an unreadable
//! row all fall through to the store. `NotFound` results are never cached.

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKey {
    UserName,
    PetNames,
    CriticalFacts,
}

impl CacheKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserName => "user_name",
            Self::PetNames => "pet_names",
            Self::CriticalFacts => "critical_facts",
        }
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Unexpired cached value, or `None`.
pub fn get(conn: &Connection, user_id: &str, key: CacheKey) -> Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT cache_value FROM fact_cache \
             WHERE user_id = ?1 AND cache_key = ?2 AND expires_at > ?3",
            params![user_id, key.as_str(), now_millis()],
            |row| row.get(0),
        )
        .optional()?;

    match raw {
        None => Ok(None),
        Some(text) => match serde_json::from_str(&text) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(user_id, key = key.as_str(), error = %e, "unreadable cache row ignored");
                Ok(None)
            }
        },
    }
}

/// Store a value that expires `ttl` from now.
pub fn put(
    conn: &Connection,
    user_id: &str,
    key: CacheKey,
    value: &serde_json::Value,
    ttl: chrono::Duration,
) -> Result<()> {
    let expires_at = now_millis().saturating_add(ttl.num_milliseconds());
    conn.execute(
        "INSERT OR REPLACE INTO fact_cache (user_id, cache_key, cache_value, expires_at) \
         VALUES (?1, ?2, ?3, ?4)",
        params![user_id, key.as_str(), serde_json::to_string(value)?, expires_at],
    )?;
    Ok(())
}

/// Serve from cache, or run `load` against the store and cache its result.
///
/// Errors from `load` (including `NotFound`) propagate and leave the cache untouched.
pub fn get_or_populate<T, F>(
    conn: &Connection,
    user_id: &str,
    key: CacheKey,
    ttl: chrono::Duration,
    load: F,
) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce(&Connection) -> Result<T>,
{
    if let Some(value) = get(conn, user_id, key)? {
        match serde_json::from_value::<T>(value) {
            Ok(hit) => {
                tracing::trace!(user_id, key = key.as_str(), "cache hit");
                return Ok(hit);
            }
            Err(e) => {
                tracing::warn!(user_id, key = key.as_str(), error = %e, "cache row has wrong shape");
            }
        }
    }

    let fresh = load(conn)?;
    put(conn, user_id, key, &serde_json::to_value(&fresh)?, ttl)?;
    tracing::trace!(user_id, key = key.as_str(), "cache populated");
    Ok(fresh)
}

/// Read a cached value without populating it. Used by the self-test.
pub fn peek<T: DeserializeOwned>(conn: &Connection, user_id: &str, key: CacheKey) -> Result<Option<T>> {
    match get(conn, user_id, key)? {
        Some(value) => Ok(serde_json::from_value(value).ok()),
        None => Ok(None),
    }
}

/// Drop every cached projection for a user. Runs inside the write transaction.
pub fn invalidate_user(conn: &Connection, user_id: &str) -> Result<usize> {
    let removed = conn.execute("DELETE FROM fact_cache WHERE user_id = ?1", params![user_id])?;
    Ok(removed)
}

/// Delete expired rows across all users.
pub fn purge_expired(conn: &Connection) -> Result<usize> {
    let removed = conn.execute(
        "DELETE FROM fact_cache WHERE expires_at <= ?1",
        params![now_millis()],
    )?;
    if removed > 0 {
        tracing::info!(removed, "expired cache rows purged");
    }
    Ok(removed)
}

/// Number of unexpired cache rows for a user.
pub fn count_entries(conn: &Connection, user_id: &str) -> Result<u64> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM fact_cache WHERE user_id = ?1 AND expires_at > ?2",
        params![user_id, now_millis()],
        |row| row.get(0),
    )?;
    Ok(n as u64)
}
