//! Conflict resolution: duplicate merge, contradiction detection, identity checks.
//!
//! The resolver runs inside the caller's write scope after every extraction
//! and on demand. Every conflict it finds is recorded once, keyed by a
//! deterministic `conflict_key`, so re-running it is idempotent.

use std::collections::BTreeMap;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::store::{self, write_audit_log};
use super::types::{
    AliasType, Attribute, AttributePolicy, AuditAction, Conflict, ConflictType, Entity,
    EntityType, ResolutionMethod, ResolutionStatus, Subject,
};
use super::{new_id, normalize_name, now_timestamp};
use crate::config::FactsConfig;
use crate::error::{FactError, Result};

/// Thresholds used when deciding whether two values truly contradict.
#[derive(Debug, Clone, Copy)]
pub struct ResolvePolicy {
    pub high_confidence: f64,
}

impl Default for ResolvePolicy {
    fn default() -> Self {
        Self::from(&FactsConfig::default())
    }
}

impl From<&FactsConfig> for ResolvePolicy {
    fn from(config: &FactsConfig) -> Self {
        Self {
            high_confidence: config.high_confidence,
        }
    }
}

/// One duplicate set folded into its primary.
#[derive(Debug, Clone, Serialize)]
pub struct MergeRecord {
    pub primary_id: String,
    pub primary_name: String,
    /// Canonical names of the absorbed entities, now aliases of the primary.
    pub absorbed: Vec<String>,
}

/// What a resolver pass changed.
#[derive(Debug, Default, Serialize)]
pub struct ResolveReport {
    pub merged: Vec<MergeRecord>,
    pub contradictions_resolved: usize,
    pub contradictions_pending: usize,
    pub identity_conflicts: usize,
}

impl ResolveReport {
    pub fn is_empty(&self) -> bool {
        self.merged.is_empty()
            && self.contradictions_resolved == 0
            && self.contradictions_pending == 0
            && self.identity_conflicts == 0
    }
}

/// Run a full resolver pass for one user.
pub fn resolve_user(conn: &Connection, user_id: &str, policy: ResolvePolicy) -> Result<ResolveReport> {
    let mut report = ResolveReport {
        merged: merge_duplicates(conn, user_id)?,
        ..Default::default()
    };

    let (resolved, pending) = detect_contradictions(conn, user_id, policy)?;
    report.contradictions_resolved = resolved;
    report.contradictions_pending = pending;
    report.identity_conflicts = detect_identity_conflicts(conn, user_id)?;

    if !report.is_empty() {
        tracing::info!(
            user_id,
            merged = report.merged.len(),
            resolved,
            pending,
            identity = report.identity_conflicts,
            "conflicts resolved"
        );
    }
    Ok(report)
}

// ── Duplicates ───────────────────────────────────────────────────────────────

/// Live entities grouped by (type, subtype), oldest first within each group.
fn live_entity_groups(conn: &Connection, user_id: &str) -> Result<BTreeMap<(String, String), Vec<Entity>>> {
    let mut groups: BTreeMap<(String, String), Vec<Entity>> = BTreeMap::new();
    for entity_type in [EntityType::Person, EntityType::Pet, EntityType::Place, EntityType::Thing] {
        for entity in store::list_entities(conn, user_id, entity_type)? {
            let key = (
                entity.entity_type.as_str().to_string(),
                entity.entity_subtype.clone().unwrap_or_default(),
            );
            groups.entry(key).or_default().push(entity);
        }
    }
    Ok(groups)
}

/// Normalized canonical name plus normalized aliases.
fn name_keys(conn: &Connection, entity: &Entity) -> Result<Vec<String>> {
    let mut keys = vec![normalize_name(&entity.canonical_name)];
    keys.extend(
        store::aliases_of(conn, &entity.id)?
            .iter()
            .map(|a| normalize_name(&a.alias_name)),
    );
    Ok(keys)
}

/// Partition a group into sets whose name keys overlap, transitively.
fn duplicate_sets(keys: &[Vec<String>]) -> Vec<Vec<usize>> {
    let mut parent: Vec<usize> = (0..keys.len()).collect();

    fn find(parent: &mut [usize], i: usize) -> usize {
        let mut root = i;
        while parent[root] != root {
            root = parent[root];
        }
        parent[i] = root;
        root
    }

    for i in 0..keys.len() {
        for j in (i + 1)..keys.len() {
            if keys[i].iter().any(|k| keys[j].contains(k)) {
                let (a, b) = (find(&mut parent, i), find(&mut parent, j));
                if a != b {
                    parent[b.max(a)] = a.min(b);
                }
            }
        }
    }

    let mut sets: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..keys.len() {
        let root = find(&mut parent, i);
        sets.entry(root).or_default().push(i);
    }
    sets.into_values().filter(|s| s.len() > 1).collect()
}

fn merge_duplicates(conn: &Connection, user_id: &str) -> Result<Vec<MergeRecord>> {
    let mut records = Vec::new();

    for (_, group) in live_entity_groups(conn, user_id)? {
        if group.len() < 2 {
            continue;
        }
        let keys = group
            .iter()
            .map(|e| name_keys(conn, e))
            .collect::<Result<Vec<_>>>()?;

        for set in duplicate_sets(&keys) {
            // Highest confidence wins; ties go to the oldest (group is oldest first).
            let mut primary_idx = set[0];
            for &i in &set[1..] {
                if group[i].confidence > group[primary_idx].confidence {
                    primary_idx = i;
                }
            }
            let primary = &group[primary_idx];
            let others: Vec<&Entity> = set
                .iter()
                .filter(|&&i| i != primary_idx)
                .map(|&i| &group[i])
                .collect();

            for other in &others {
                absorb(conn, primary, other)?;
            }

            let mut ids: Vec<&str> = set.iter().map(|&i| group[i].id.as_str()).collect();
            ids.sort_unstable();
            record_conflict(
                conn,
                user_id,
                &format!("duplicate:{}", ids.join(",")),
                ConflictType::Duplicate,
                &ids,
                ResolutionStatus::Resolved,
                ResolutionMethod::Merge,
                serde_json::json!({
                    "primary": primary.id,
                    "names": set.iter().map(|&i| group[i].canonical_name.as_str()).collect::<Vec<_>>(),
                }),
            )?;

            records.push(MergeRecord {
                primary_id: primary.id.clone(),
                primary_name: primary.canonical_name.clone(),
                absorbed: others.iter().map(|e| e.canonical_name.clone()).collect(),
            });
        }
    }
    Ok(records)
}

/// Fold `other` into `primary`: names become aliases, facts are re-pointed,
/// and `other` is marked merged.
fn absorb(conn: &Connection, primary: &Entity, other: &Entity) -> Result<()> {
    store::add_alias(conn, &primary.id, &other.canonical_name, AliasType::Variant, other.confidence, None)?;
    for alias in store::aliases_of(conn, &other.id)? {
        store::add_alias(conn, &primary.id, &alias.alias_name, alias.alias_type, alias.confidence, None)?;
    }

    // A single-valued attribute can have only one current row per subject; the
    // primary's value stays current and the absorbed one becomes its history.
    let now = now_timestamp();
    for attr in store::all_attributes(conn, &other.user_id)? {
        if attr.subject.entity_id() != Some(other.id.as_str()) || !attr.is_current || !attr.policy.is_single_valued() {
            continue;
        }
        let primary_current =
            store::current_attributes(conn, &primary.user_id, &Subject::Entity(primary.id.clone()), &attr.kind)?;
        if let Some(kept) = primary_current.first() {
            conn.execute(
                "UPDATE attributes SET is_current = 0, superseded_at = ?1, superseded_by = ?2 WHERE id = ?3",
                params![now, kept.id, attr.id],
            )?;
        }
    }
    conn.execute(
        "UPDATE attributes SET subject_entity_id = ?1 WHERE subject_entity_id = ?2",
        params![primary.id, other.id],
    )?;
    conn.execute(
        "UPDATE relationships SET subject_entity_id = ?1 WHERE subject_entity_id = ?2",
        params![primary.id, other.id],
    )?;
    conn.execute(
        "UPDATE relationships SET object_entity_id = ?1 WHERE object_entity_id = ?2",
        params![primary.id, other.id],
    )?;

    store::mark_merged(conn, &other.id, &primary.id, None)?;
    tracing::debug!(primary = %primary.id, absorbed = %other.id, "duplicate merged");
    Ok(())
}

// ── Contradictions ───────────────────────────────────────────────────────────

/// Find (replaced, replacement) pairs whose values differ at high confidence.
/// Returns (newly resolved, newly pending).
fn detect_contradictions(conn: &Connection, user_id: &str, policy: ResolvePolicy) -> Result<(usize, usize)> {
    let attributes = store::all_attributes(conn, user_id)?;
    let by_id: BTreeMap<&str, &Attribute> = attributes.iter().map(|a| (a.id.as_str(), a)).collect();
    let user_entity_id = store::user_entity(conn, user_id)?.map(|e| e.id);

    let (mut resolved, mut pending) = (0, 0);
    for old in &attributes {
        let Some(new) = old.superseded_by.as_deref().and_then(|id| by_id.get(id)) else {
            continue;
        };
        if old.confidence < policy.high_confidence
            || new.confidence < policy.high_confidence
            || normalize_name(&old.value) == normalize_name(&new.value)
        {
            continue;
        }

        let (status, method) = match old.policy {
            AttributePolicy::Mutable => (ResolutionStatus::Resolved, ResolutionMethod::MostRecent),
            AttributePolicy::Stable => (ResolutionStatus::Pending, ResolutionMethod::Unresolved),
            AttributePolicy::Cumulative => continue,
        };

        let involved: Vec<&str> = match &new.subject {
            Subject::Entity(id) => vec![id.as_str()],
            Subject::User => user_entity_id.as_deref().into_iter().collect(),
        };
        let inserted = record_conflict(
            conn,
            user_id,
            &format!("contradiction:{}:{}", old.id, new.id),
            ConflictType::Contradiction,
            &involved,
            status,
            method,
            serde_json::json!({
                "subject": subject_label(&new.subject),
                "attribute": new.kind.as_str(),
                "previous": old.value,
                "current": new.value,
            }),
        )?;
        if inserted {
            match status {
                ResolutionStatus::Resolved => resolved += 1,
                ResolutionStatus::Pending => pending += 1,
            }
        }
    }
    Ok((resolved, pending))
}

fn subject_label(subject: &Subject) -> &str {
    subject.entity_id().unwrap_or("user")
}

// ── Identity ─────────────────────────────────────────────────────────────────

/// More than one live person/user entity means we don't know who the user is.
fn detect_identity_conflicts(conn: &Connection, user_id: &str) -> Result<usize> {
    let users: Vec<Entity> = store::list_entities(conn, user_id, EntityType::Person)?
        .into_iter()
        .filter(|e| e.entity_subtype.as_deref() == Some(store::USER_SUBTYPE))
        .collect();
    if users.len() < 2 {
        return Ok(0);
    }

    let mut ids: Vec<&str> = users.iter().map(|e| e.id.as_str()).collect();
    ids.sort_unstable();
    let current = store::user_entity(conn, user_id)?.map(|e| e.canonical_name);
    let inserted = record_conflict(
        conn,
        user_id,
        &format!("identity:{}", ids.join(",")),
        ConflictType::Identity,
        &ids,
        ResolutionStatus::Pending,
        ResolutionMethod::Unresolved,
        serde_json::json!({
            "subject": "user",
            "attribute": "name",
            "names": users.iter().map(|e| e.canonical_name.as_str()).collect::<Vec<_>>(),
            "current": current,
        }),
    )?;
    Ok(usize::from(inserted))
}

// ── Conflict records ─────────────────────────────────────────────────────────

/// Insert a conflict unless one with the same key exists. Returns whether it was new.
#[allow(clippy::too_many_arguments)]
fn record_conflict(
    conn: &Connection,
    user_id: &str,
    conflict_key: &str,
    conflict_type: ConflictType,
    entities_involved: &[&str],
    status: ResolutionStatus,
    method: ResolutionMethod,
    details: serde_json::Value,
) -> Result<bool> {
    let now = now_timestamp();
    let resolved_at = (status == ResolutionStatus::Resolved).then(|| now.clone());
    let changed = conn.execute(
        "INSERT OR IGNORE INTO conflicts (id, user_id, conflict_key, conflict_type, entities_involved, \
         resolution_status, resolution_method, details, created_at, resolved_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            new_id(),
            user_id,
            conflict_key,
            conflict_type.as_str(),
            serde_json::to_string(entities_involved)?,
            status.as_str(),
            method.as_str(),
            details.to_string(),
            now,
            resolved_at,
        ],
    )?;
    Ok(changed > 0)
}

const CONFLICT_COLUMNS: &str = "id, user_id, conflict_type, entities_involved, resolution_status, \
     resolution_method, details, created_at, resolved_at";

fn conflict_from_row(row: &Row) -> rusqlite::Result<Conflict> {
    fn parse<T: std::str::FromStr<Err = String>>(idx: usize, text: String) -> rusqlite::Result<T> {
        text.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
        })
    }
    let involved: String = row.get(3)?;
    let details: Option<String> = row.get(6)?;
    Ok(Conflict {
        id: row.get(0)?,
        user_id: row.get(1)?,
        conflict_type: parse(2, row.get(2)?)?,
        entities_involved: serde_json::from_str(&involved).unwrap_or_default(),
        resolution_status: parse(4, row.get(4)?)?,
        resolution_method: parse(5, row.get(5)?)?,
        details: details.and_then(|d| serde_json::from_str(&d).ok()),
        created_at: row.get(7)?,
        resolved_at: row.get(8)?,
    })
}

/// Conflicts awaiting review, oldest first.
pub fn pending_conflicts(conn: &Connection, user_id: &str) -> Result<Vec<Conflict>> {
    list_conflicts(conn, user_id, Some(ResolutionStatus::Pending))
}

pub fn list_conflicts(
    conn: &Connection,
    user_id: &str,
    status: Option<ResolutionStatus>,
) -> Result<Vec<Conflict>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CONFLICT_COLUMNS} FROM conflicts \
         WHERE user_id = ?1 AND (?2 IS NULL OR resolution_status = ?2) \
         ORDER BY created_at, rowid"
    ))?;
    let conflicts = stmt
        .query_map(params![user_id, status.map(|s| s.as_str())], conflict_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(conflicts)
}

/// Pending contradictions on one of the user's own attributes.
pub fn pending_for_attribute(conn: &Connection, user_id: &str, attribute: &str) -> Result<Vec<Conflict>> {
    Ok(pending_conflicts(conn, user_id)?
        .into_iter()
        .filter(|c| {
            c.details.as_ref().is_some_and(|d| {
                d["subject"] == "user" && d["attribute"] == attribute
            })
        })
        .collect())
}

/// Mark a pending conflict as confirmed by the user.
pub fn dismiss_conflict(conn: &Connection, user_id: &str, conflict_id: &str) -> Result<Conflict> {
    let conflict = conn
        .query_row(
            &format!("SELECT {CONFLICT_COLUMNS} FROM conflicts WHERE id = ?1 AND user_id = ?2"),
            params![conflict_id, user_id],
            conflict_from_row,
        )
        .optional()?
        .ok_or_else(|| FactError::not_found(format!("conflict {conflict_id}")))?;
    if conflict.resolution_status == ResolutionStatus::Resolved {
        return Ok(conflict);
    }

    let now = now_timestamp();
    conn.execute(
        "UPDATE conflicts SET resolution_status = 'resolved', resolution_method = 'user_confirmed', \
         resolved_at = ?1 WHERE id = ?2",
        params![now, conflict_id],
    )?;
    write_audit_log(
        conn,
        user_id,
        conflict.entities_involved.first().map(String::as_str),
        AuditAction::Resolve,
        Some(ResolutionStatus::Pending.as_str()),
        Some(ResolutionMethod::UserConfirmed.as_str()),
        None,
    )?;

    Ok(Conflict {
        resolution_status: ResolutionStatus::Resolved,
        resolution_method: ResolutionMethod::UserConfirmed,
        resolved_at: Some(now),
        ..conflict
    })
}
