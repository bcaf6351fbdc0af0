//! Read-only fact-accuracy self-test.
//!
//! Never writes: cache rows are inspected with [`cache::peek`] and compared
//! against a fresh store read, so the test can run alongside live traffic.

use rusqlite::Connection;
use serde::Serialize;

use super::cache::{self, CacheKey};
use super::critical::CriticalFacts;
use super::resolve;
use super::store;
use super::types::ConflictType;
use crate::error::{FactError, Result};

/// Number of consecutive reads that must agree.
pub const REPEATED_READS: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct AccuracyCheck {
    pub test_name: String,
    pub expected: String,
    pub actual: String,
    pub pass: bool,
}

impl AccuracyCheck {
    fn new(test_name: &str, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        let (expected, actual) = (expected.into(), actual.into());
        Self {
            test_name: test_name.to_string(),
            pass: expected == actual,
            expected,
            actual,
        }
    }
}

fn describe_name(result: &Result<String>) -> String {
    match result {
        Ok(name) => name.clone(),
        Err(FactError::NotFound(_)) => "<not found>".to_string(),
        Err(e) => format!("<error: {e}>"),
    }
}

/// Run every accuracy check for one user.
pub fn test_fact_accuracy(conn: &Connection, user_id: &str) -> Result<Vec<AccuracyCheck>> {
    let mut checks = Vec::new();

    // Guaranteed reads must be exactly repeatable.
    let first_name = describe_name(&store::get_user_name(conn, user_id));
    let agreeing = (0..REPEATED_READS)
        .filter(|_| describe_name(&store::get_user_name(conn, user_id)) == first_name)
        .count();
    checks.push(AccuracyCheck::new(
        "user_name_repeatable",
        format!("{REPEATED_READS}/{REPEATED_READS} identical ({first_name})"),
        format!("{agreeing}/{REPEATED_READS} identical ({first_name})"),
    ));

    let first_pets = store::get_pet_names(conn, user_id)?;
    let mut agreeing = 0;
    for _ in 0..REPEATED_READS {
        if store::get_pet_names(conn, user_id)? == first_pets {
            agreeing += 1;
        }
    }
    checks.push(AccuracyCheck::new(
        "pet_names_repeatable",
        format!("{REPEATED_READS}/{REPEATED_READS} identical ({})", first_pets.join(", ")),
        format!("{agreeing}/{REPEATED_READS} identical ({})", first_pets.join(", ")),
    ));

    // Any cached projection must equal a fresh store read.
    let cached_name: Option<String> = cache::peek(conn, user_id, CacheKey::UserName)?;
    checks.push(cache_check("user_name_cache_consistency", cached_name, first_name));

    let cached_pets: Option<Vec<String>> = cache::peek(conn, user_id, CacheKey::PetNames)?;
    checks.push(cache_check(
        "pet_names_cache_consistency",
        cached_pets.map(|p| p.join(", ")),
        first_pets.join(", "),
    ));

    let fresh = CriticalFacts::load(conn, user_id)?;
    let cached_facts: Option<CriticalFacts> = cache::peek(conn, user_id, CacheKey::CriticalFacts)?;
    checks.push(cache_check(
        "critical_facts_cache_consistency",
        cached_facts.map(|f| serde_json::to_string(&f.to_map())).transpose()?,
        serde_json::to_string(&fresh.to_map())?,
    ));

    let identity_pending = resolve::pending_conflicts(conn, user_id)?
        .iter()
        .filter(|c| c.conflict_type == ConflictType::Identity)
        .count();
    checks.push(AccuracyCheck::new(
        "single_user_identity",
        "0 pending identity conflicts",
        format!("{identity_pending} pending identity conflicts"),
    ));

    let failed = checks.iter().filter(|c| !c.pass).count();
    if failed > 0 {
        tracing::warn!(user_id, failed, total = checks.len(), "fact accuracy self-test failed");
    } else {
        tracing::debug!(user_id, total = checks.len(), "fact accuracy self-test passed");
    }
    Ok(checks)
}

/// A missing cache row passes: the next read populates it from the store.
fn cache_check(test_name: &str, cached: Option<String>, fresh: String) -> AccuracyCheck {
    match cached {
        Some(cached) => AccuracyCheck::new(test_name, fresh, cached),
        None => AccuracyCheck {
            test_name: test_name.to_string(),
            expected: fresh,
            actual: "<not cached>".to_string(),
            pass: true,
        },
    }
}
