//! Entity store: entities, aliases, attributes, and the audit log.
//!
//! Every write goes through a [`WriteScope`]: one transaction that also drops the
//! user's cached projections before it commits, so a cache row can never outlive
//! the store state it was derived from. Guaranteed-path reads ([`get_user_name`],
//! [`get_pet_names`]) are direct indexed lookups; they never fall back to
//! approximate matching.

use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde::Serialize;
use std::ops::Deref;

use super::types::{
    Alias, AliasType, Attribute, AttributeKind, AuditAction, AuditEntry,
    Entity, EntityCandidate, EntityStatus, EntityType, SourceType, Subject,
};
use super::{cache, new_id, normalize_name, now_timestamp};
use crate::config::FactsConfig;
use crate::error::{FactError, Result};

/// Subtype of the person entity that represents the user themself.
pub const USER_SUBTYPE: &str = "user";

/// Confidence rules applied on upsert.
#[derive(Debug, Clone, Copy)]
pub struct StorePolicy {
    pub activation_threshold: f64,
    pub reinforcement_increment: f64,
}

impl Default for StorePolicy {
    fn default() -> Self {
        Self::from(&FactsConfig::default())
    }
}

impl From<&FactsConfig> for StorePolicy {
    fn from(config: &FactsConfig) -> Self {
        Self {
            activation_threshold: config.activation_threshold,
            reinforcement_increment: config.reinforcement_increment,
        }
    }
}

// ── Write scope ──────────────────────────────────────────────────────────────

/// A transaction for one user's write. Committing invalidates every cached
/// projection for that user inside the same transaction.
pub struct WriteScope<'c> {
    tx: Transaction<'c>,
    user_id: String,
}

impl<'c> WriteScope<'c> {
    pub fn begin(conn: &'c mut Connection, user_id: &str) -> Result<Self> {
        let tx = conn.transaction()?;
        Ok(Self {
            tx,
            user_id: user_id.to_string(),
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Invalidate the user's cache and commit. Dropping the scope without
    /// committing rolls everything back.
    pub fn commit(self) -> Result<()> {
        let removed = cache::invalidate_user(&self.tx, &self.user_id)?;
        self.tx.commit()?;
        tracing::debug!(user_id = %self.user_id, cache_rows = removed, "write committed");
        Ok(())
    }
}

impl Deref for WriteScope<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.tx
    }
}

// ── Result types ─────────────────────────────────────────────────────────────

/// Result returned from [`upsert_entity`].
#[derive(Debug, Clone, Serialize)]
pub struct UpsertOutcome {
    pub entity_id: String,
    /// `false` when existing evidence was reinforced instead.
    pub created: bool,
    /// `true` if this call moved the entity from proposed to active.
    pub activated: bool,
    pub confidence: f64,
}

/// What [`set_attribute`] did with the new value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttributeOutcome {
    Created,
    /// Same value stated again.
    Reinforced,
    /// A different value became current; the old one is now history.
    Replaced { previous: String },
}

// ── Row mapping ──────────────────────────────────────────────────────────────

const ENTITY_COLUMNS: &str = "id, user_id, entity_type, entity_subtype, canonical_name, \
     confidence, source_type, status, merged_into, source_message_id, created_at, updated_at";

const ATTRIBUTE_COLUMNS: &str = "id, user_id, subject_entity_id, attribute_name, \
     attribute_value, attribute_type, confidence, is_current, source_message_id, \
     created_at, superseded_at, superseded_by";

/// Parse a TEXT column into one of the SQL enums.
fn parse_col<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let text: String = row.get(idx)?;
    text.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            e.into(),
        )
    })
}

pub(crate) fn entity_from_row(row: &Row) -> rusqlite::Result<Entity> {
    let subtype: String = row.get(3)?;
    Ok(Entity {
        id: row.get(0)?,
        user_id: row.get(1)?,
        entity_type: parse_col(row, 2)?,
        entity_subtype: (!subtype.is_empty()).then_some(subtype),
        canonical_name: row.get(4)?,
        confidence: row.get(5)?,
        source_type: parse_col(row, 6)?,
        status: parse_col(row, 7)?,
        merged_into: row.get(8)?,
        source_message_id: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn attribute_from_row(row: &Row) -> rusqlite::Result<Attribute> {
    let name: String = row.get(3)?;
    Ok(Attribute {
        id: row.get(0)?,
        user_id: row.get(1)?,
        subject: Subject::from_column(row.get(2)?),
        kind: AttributeKind::from(name),
        value: row.get(4)?,
        policy: parse_col(row, 5)?,
        confidence: row.get(6)?,
        is_current: row.get(7)?,
        source_message_id: row.get(8)?,
        created_at: row.get(9)?,
        superseded_at: row.get(10)?,
        superseded_by: row.get(11)?,
    })
}

pub(crate) fn validate_confidence(confidence: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&confidence) || confidence.is_nan() {
        return Err(FactError::validation(format!(
            "confidence must be between 0.0 and 1.0, got {confidence}"
        )));
    }
    Ok(())
}

fn clean_name(name: &str) -> Result<String> {
    let trimmed = name.split_whitespace().collect::<Vec<_>>().join(" ");
    if trimmed.is_empty() {
        return Err(FactError::validation("name must not be empty"));
    }
    Ok(trimmed)
}

/// Attribute values are stored on one line with whitespace collapsed.
fn clean_value(kind: &AttributeKind, value: &str) -> Result<String> {
    let value = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if value.is_empty() {
        return Err(FactError::validation(format!("{kind} value must not be empty")));
    }
    Ok(value)
}

// ── Entities ─────────────────────────────────────────────────────────────────

/// Insert a candidate, or reinforce the live entity it already describes.
///
/// Identity is (user, type, subtype, canonical name), or an exact alias of a
/// live entity with the same type and subtype. Repeating identical evidence
/// raises confidence by the policy increment (capped at 1.0) and never creates
/// a second row.
pub fn upsert_entity(
    conn: &Connection,
    candidate: &EntityCandidate,
    policy: StorePolicy,
) -> Result<UpsertOutcome> {
    validate_confidence(candidate.confidence)?;
    let name = clean_name(&candidate.name)?;
    let subtype = candidate.entity_subtype.as_deref().unwrap_or("");
    let now = now_timestamp();

    if let Some(existing) =
        find_live_entity(conn, &candidate.user_id, candidate.entity_type, subtype, &name)?
    {
        let confidence = (existing.confidence.max(candidate.confidence)
            + policy.reinforcement_increment)
            .min(1.0);
        let activated = existing.status == EntityStatus::Proposed
            && confidence >= policy.activation_threshold;
        let status = if activated {
            EntityStatus::Active
        } else {
            existing.status
        };

        conn.execute(
            "UPDATE entities SET confidence = ?1, status = ?2, updated_at = ?3 WHERE id = ?4",
            params![confidence, status.as_str(), now, existing.id],
        )?;
        write_audit_log(
            conn,
            &candidate.user_id,
            Some(&existing.id),
            AuditAction::Reinforce,
            Some(&existing.confidence.to_string()),
            Some(&confidence.to_string()),
            candidate.source_message_id.as_deref(),
        )?;
        if activated {
            write_audit_log(
                conn,
                &candidate.user_id,
                Some(&existing.id),
                AuditAction::Activate,
                Some(EntityStatus::Proposed.as_str()),
                Some(EntityStatus::Active.as_str()),
                candidate.source_message_id.as_deref(),
            )?;
        }

        tracing::debug!(entity_id = %existing.id, confidence, activated, "entity reinforced");
        return Ok(UpsertOutcome {
            entity_id: existing.id,
            created: false,
            activated,
            confidence,
        });
    }

    let id = new_id();
    let status = if candidate.confidence >= policy.activation_threshold {
        EntityStatus::Active
    } else {
        EntityStatus::Proposed
    };

    conn.execute(
        "INSERT INTO entities (id, user_id, entity_type, entity_subtype, canonical_name, \
         normalized_name, confidence, source_type, status, source_message_id, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
        params![
            id,
            candidate.user_id,
            candidate.entity_type.as_str(),
            subtype,
            name,
            normalize_name(&name),
            candidate.confidence,
            candidate.source_type.as_str(),
            status.as_str(),
            candidate.source_message_id,
            now,
        ],
    )?;
    write_audit_log(
        conn,
        &candidate.user_id,
        Some(&id),
        AuditAction::Create,
        None,
        Some(&name),
        candidate.source_message_id.as_deref(),
    )?;

    tracing::debug!(
        entity_id = %id,
        entity_type = %candidate.entity_type,
        status = %status,
        "entity created"
    );
    Ok(UpsertOutcome {
        entity_id: id,
        created: true,
        activated: status == EntityStatus::Active,
        confidence: candidate.confidence,
    })
}

/// Live entity matching the identity key exactly, by canonical name first, then alias.
fn find_live_entity(
    conn: &Connection,
    user_id: &str,
    entity_type: EntityType,
    subtype: &str,
    name: &str,
) -> Result<Option<Entity>> {
    let by_name = conn
        .query_row(
            &format!(
                "SELECT {ENTITY_COLUMNS} FROM entities \
                 WHERE user_id = ?1 AND entity_type = ?2 AND entity_subtype = ?3 \
                   AND canonical_name = ?4 AND status IN ('proposed','active')"
            ),
            params![user_id, entity_type.as_str(), subtype, name],
            entity_from_row,
        )
        .optional()?;
    if by_name.is_some() {
        return Ok(by_name);
    }

    let by_alias = conn
        .query_row(
            &format!(
                "SELECT {cols} FROM entities e \
                 WHERE e.user_id = ?1 AND e.entity_type = ?2 AND e.entity_subtype = ?3 \
                   AND e.status IN ('proposed','active') \
                   AND EXISTS (SELECT 1 FROM aliases a WHERE a.entity_id = e.id AND a.alias_name = ?4) \
                 ORDER BY e.confidence DESC, e.rowid LIMIT 1",
                cols = prefixed_entity_columns("e"),
            ),
            params![user_id, entity_type.as_str(), subtype, name],
            entity_from_row,
        )
        .optional()?;
    Ok(by_alias)
}

fn prefixed_entity_columns(alias: &str) -> String {
    ENTITY_COLUMNS
        .split(", ")
        .map(|c| format!("{alias}.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Fetch any entity (live or not) by ID.
pub fn get_entity_by_id(conn: &Connection, entity_id: &str) -> Result<Entity> {
    conn.query_row(
        &format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE id = ?1"),
        params![entity_id],
        entity_from_row,
    )
    .optional()?
    .ok_or_else(|| FactError::not_found(format!("entity {entity_id}")))
}

/// Exact lookup of a live entity. With `subtype = None` any subtype matches and
/// the most recently updated entity wins.
pub fn get_entity(
    conn: &Connection,
    user_id: &str,
    entity_type: EntityType,
    subtype: Option<&str>,
    name: &str,
) -> Result<Entity> {
    let name = clean_name(name)?;
    if let Some(subtype) = subtype {
        return find_live_entity(conn, user_id, entity_type, subtype, &name)?
            .ok_or_else(|| FactError::not_found(format!("{entity_type} named {name:?}")));
    }

    conn.query_row(
        &format!(
            "SELECT {cols} FROM entities e \
             WHERE e.user_id = ?1 AND e.entity_type = ?2 AND e.status IN ('proposed','active') \
               AND (e.canonical_name = ?3 \
                    OR EXISTS (SELECT 1 FROM aliases a WHERE a.entity_id = e.id AND a.alias_name = ?3)) \
             ORDER BY e.canonical_name = ?3 DESC, e.updated_at DESC, e.rowid DESC LIMIT 1",
            cols = prefixed_entity_columns("e"),
        ),
        params![user_id, entity_type.as_str(), name],
        entity_from_row,
    )
    .optional()?
    .ok_or_else(|| FactError::not_found(format!("{entity_type} named {name:?}")))
}

/// All live (proposed or active) entities of a type, oldest first.
pub fn list_entities(
    conn: &Connection,
    user_id: &str,
    entity_type: EntityType,
) -> Result<Vec<Entity>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTITY_COLUMNS} FROM entities \
         WHERE user_id = ?1 AND entity_type = ?2 AND status IN ('proposed','active') \
         ORDER BY created_at, rowid"
    ))?;
    let entities = stmt
        .query_map(params![user_id, entity_type.as_str()], entity_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entities)
}

/// Mark `entity_id` as merged into `into_id`. The row stays, with a back-reference.
pub fn mark_merged(
    conn: &Connection,
    entity_id: &str,
    into_id: &str,
    source_message_id: Option<&str>,
) -> Result<()> {
    if entity_id == into_id {
        return Err(FactError::validation("an entity cannot be merged into itself"));
    }
    let entity = get_entity_by_id(conn, entity_id)?;
    let target = get_entity_by_id(conn, into_id)?;
    if entity.user_id != target.user_id {
        return Err(FactError::validation("cannot merge entities across users"));
    }
    if !target.is_active() {
        return Err(FactError::validation(format!(
            "merge target {into_id} is {}",
            target.status
        )));
    }

    conn.execute(
        "UPDATE entities SET status = 'merged', merged_into = ?1, updated_at = ?2 WHERE id = ?3",
        params![into_id, now_timestamp(), entity_id],
    )?;
    write_audit_log(
        conn,
        &entity.user_id,
        Some(entity_id),
        AuditAction::Merge,
        Some(&entity.canonical_name),
        Some(into_id),
        source_message_id,
    )?;
    Ok(())
}

/// Replace an entity's canonical name, keeping the old name as a formal alias.
///
/// If another live entity already owns the new name, this entity is merged into
/// it instead and that entity's ID is returned.
pub fn rename_entity(
    conn: &Connection,
    entity_id: &str,
    new_name: &str,
    source_message_id: Option<&str>,
) -> Result<String> {
    let entity = get_entity_by_id(conn, entity_id)?;
    let new_name = clean_name(new_name)?;
    if entity.canonical_name == new_name {
        return Ok(entity.id);
    }
    let subtype = entity.entity_subtype.as_deref().unwrap_or("");

    let clash = conn
        .query_row(
            "SELECT id FROM entities WHERE user_id = ?1 AND entity_type = ?2 AND entity_subtype = ?3 \
             AND canonical_name = ?4 AND status IN ('proposed','active') AND id != ?5",
            params![entity.user_id, entity.entity_type.as_str(), subtype, new_name, entity.id],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    if let Some(owner) = clash {
        add_alias(conn, &owner, &entity.canonical_name, AliasType::Formal, entity.confidence, source_message_id)?;
        mark_merged(conn, &entity.id, &owner, source_message_id)?;
        return Ok(owner);
    }

    conn.execute(
        "UPDATE entities SET canonical_name = ?1, normalized_name = ?2, source_type = ?3, \
         updated_at = ?4 WHERE id = ?5",
        params![
            new_name,
            normalize_name(&new_name),
            SourceType::Corrected.as_str(),
            now_timestamp(),
            entity.id
        ],
    )?;
    // The new name is authoritative now; it must not linger as an alias.
    conn.execute(
        "DELETE FROM aliases WHERE entity_id = ?1 AND alias_name = ?2",
        params![entity.id, new_name],
    )?;
    add_alias(conn, &entity.id, &entity.canonical_name, AliasType::Formal, entity.confidence, source_message_id)?;
    write_audit_log(
        conn,
        &entity.user_id,
        Some(&entity.id),
        AuditAction::Rename,
        Some(&entity.canonical_name),
        Some(&new_name),
        source_message_id,
    )?;
    Ok(entity.id)
}

// ── Aliases ──────────────────────────────────────────────────────────────────

/// Add an alias. Returns `false` if it already existed (its confidence is raised
/// to the max of both). Aliases equal to the canonical name are ignored.
pub fn add_alias(
    conn: &Connection,
    entity_id: &str,
    alias_name: &str,
    alias_type: AliasType,
    confidence: f64,
    source_message_id: Option<&str>,
) -> Result<bool> {
    validate_confidence(confidence)?;
    let alias_name = clean_name(alias_name)?;
    let entity = get_entity_by_id(conn, entity_id)?;
    if entity.canonical_name == alias_name {
        return Ok(false);
    }

    let existed: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM aliases WHERE entity_id = ?1 AND alias_name = ?2",
        params![entity_id, alias_name],
        |row| row.get(0),
    )?;
    conn.execute(
        "INSERT INTO aliases (entity_id, alias_name, normalized_alias, alias_type, confidence, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
         ON CONFLICT(entity_id, alias_name) DO UPDATE SET confidence = MAX(confidence, excluded.confidence)",
        params![
            entity_id,
            alias_name,
            normalize_name(&alias_name),
            alias_type.as_str(),
            confidence,
            now_timestamp()
        ],
    )?;
    if !existed {
        write_audit_log(
            conn,
            &entity.user_id,
            Some(entity_id),
            AuditAction::Alias,
            None,
            Some(&alias_name),
            source_message_id,
        )?;
    }
    Ok(!existed)
}

pub fn aliases_of(conn: &Connection, entity_id: &str) -> Result<Vec<Alias>> {
    let mut stmt = conn.prepare(
        "SELECT entity_id, alias_name, alias_type, confidence FROM aliases \
         WHERE entity_id = ?1 ORDER BY created_at, alias_name",
    )?;
    let aliases = stmt
        .query_map(params![entity_id], |row| {
            Ok(Alias {
                entity_id: row.get(0)?,
                alias_name: row.get(1)?,
                alias_type: parse_col(row, 2)?,
                confidence: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(aliases)
}

// ── Attributes ───────────────────────────────────────────────────────────────

fn ensure_subject(conn: &Connection, user_id: &str, subject: &Subject) -> Result<()> {
    if let Some(id) = subject.entity_id() {
        let entity = get_entity_by_id(conn, id)?;
        if entity.user_id != user_id {
            return Err(FactError::not_found(format!("entity {id} for user {user_id}")));
        }
    }
    Ok(())
}

/// Record a new value for an attribute, following the kind's policy.
///
/// Single-valued kinds keep exactly one current row; a differing value demotes
/// the old row to history (`is_current = 0`) rather than overwriting it.
/// Cumulative kinds append each distinct value.
pub fn set_attribute(
    conn: &Connection,
    user_id: &str,
    subject: &Subject,
    kind: &AttributeKind,
    value: &str,
    confidence: f64,
    source_message_id: Option<&str>,
) -> Result<AttributeOutcome> {
    validate_confidence(confidence)?;
    let value = clean_value(kind, value)?;
    let value = value.as_str();
    ensure_subject(conn, user_id, subject)?;

    let policy = kind.policy();
    let current = current_attributes(conn, user_id, subject, kind)?;
    let normalized = normalize_name(value);

    if let Some(same) = current.iter().find(|a| normalize_name(&a.value) == normalized) {
        conn.execute(
            "UPDATE attributes SET confidence = MAX(confidence, ?1) WHERE id = ?2",
            params![confidence, same.id],
        )?;
        return Ok(AttributeOutcome::Reinforced);
    }

    let id = new_id();
    let previous = match (policy.is_single_valued(), current.into_iter().next()) {
        (true, Some(old)) => {
            conn.execute(
                "UPDATE attributes SET is_current = 0, superseded_at = ?1, superseded_by = ?2 \
                 WHERE id = ?3",
                params![now_timestamp(), id, old.id],
            )?;
            Some(old.value)
        }
        _ => None,
    };

    insert_attribute(conn, &id, user_id, subject, kind, value, confidence, true, source_message_id)?;
    write_audit_log(
        conn,
        user_id,
        subject.entity_id(),
        AuditAction::Attribute,
        previous.as_deref(),
        Some(&format!("{kind}={value}")),
        source_message_id,
    )?;

    Ok(match previous {
        Some(previous) => AttributeOutcome::Replaced { previous },
        None => AttributeOutcome::Created,
    })
}

/// Record a value that used to be true ("I used to live in Boston"). It goes
/// straight into history and never becomes current.
pub fn record_past_attribute(
    conn: &Connection,
    user_id: &str,
    subject: &Subject,
    kind: &AttributeKind,
    value: &str,
    confidence: f64,
    source_message_id: Option<&str>,
) -> Result<bool> {
    validate_confidence(confidence)?;
    let value = clean_value(kind, value)?;
    let value = value.as_str();
    ensure_subject(conn, user_id, subject)?;

    let normalized = normalize_name(value);
    let known = attribute_history(conn, user_id, subject, kind)?
        .iter()
        .any(|a| normalize_name(&a.value) == normalized);
    if known {
        return Ok(false);
    }

    insert_attribute(conn, &new_id(), user_id, subject, kind, value, confidence, false, source_message_id)?;
    write_audit_log(
        conn,
        user_id,
        subject.entity_id(),
        AuditAction::Attribute,
        Some(&format!("{kind}={value}")),
        None,
        source_message_id,
    )?;
    Ok(true)
}

#[allow(clippy::too_many_arguments)]
fn insert_attribute(
    conn: &Connection,
    id: &str,
    user_id: &str,
    subject: &Subject,
    kind: &AttributeKind,
    value: &str,
    confidence: f64,
    is_current: bool,
    source_message_id: Option<&str>,
) -> Result<()> {
    let now = now_timestamp();
    conn.execute(
        "INSERT INTO attributes (id, user_id, subject_entity_id, attribute_name, attribute_value, \
         attribute_type, confidence, is_current, source_message_id, created_at, superseded_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            id,
            user_id,
            subject.entity_id(),
            kind.as_str(),
            value,
            kind.policy().as_str(),
            confidence,
            is_current,
            source_message_id,
            now,
            (!is_current).then(|| now.clone()),
        ],
    )?;
    Ok(())
}

/// Current value(s) of an attribute, most recent first.
pub fn current_attributes(
    conn: &Connection,
    user_id: &str,
    subject: &Subject,
    kind: &AttributeKind,
) -> Result<Vec<Attribute>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ATTRIBUTE_COLUMNS} FROM attributes \
         WHERE user_id = ?1 AND COALESCE(subject_entity_id, '') = COALESCE(?2, '') \
           AND attribute_name = ?3 AND is_current = 1 \
         ORDER BY created_at DESC, rowid DESC"
    ))?;
    let rows = stmt
        .query_map(
            params![user_id, subject.entity_id(), kind.as_str()],
            attribute_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Every value ever stated for an attribute, oldest first.
pub fn attribute_history(
    conn: &Connection,
    user_id: &str,
    subject: &Subject,
    kind: &AttributeKind,
) -> Result<Vec<Attribute>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ATTRIBUTE_COLUMNS} FROM attributes \
         WHERE user_id = ?1 AND COALESCE(subject_entity_id, '') = COALESCE(?2, '') \
           AND attribute_name = ?3 \
         ORDER BY created_at, rowid"
    ))?;
    let rows = stmt
        .query_map(
            params![user_id, subject.entity_id(), kind.as_str()],
            attribute_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Every attribute row for a user (all subjects, current and historical).
pub(crate) fn all_attributes(conn: &Connection, user_id: &str) -> Result<Vec<Attribute>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ATTRIBUTE_COLUMNS} FROM attributes WHERE user_id = ?1 ORDER BY created_at, rowid"
    ))?;
    let rows = stmt
        .query_map(params![user_id], attribute_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Guaranteed-path reads ────────────────────────────────────────────────────

/// The active person entity representing the user, if one exists.
///
/// When several compete (an identity conflict), the most recently confirmed
/// one is current.
pub fn user_entity(conn: &Connection, user_id: &str) -> Result<Option<Entity>> {
    let entity = conn
        .query_row(
            &format!(
                "SELECT {ENTITY_COLUMNS} FROM entities \
                 WHERE user_id = ?1 AND entity_type = 'person' AND entity_subtype = ?2 \
                   AND status = 'active' \
                 ORDER BY updated_at DESC, confidence DESC, rowid DESC LIMIT 1"
            ),
            params![user_id, USER_SUBTYPE],
            entity_from_row,
        )
        .optional()?;
    Ok(entity)
}

/// The user's canonical name, verbatim. `NotFound` means ask the user.
pub fn get_user_name(conn: &Connection, user_id: &str) -> Result<String> {
    user_entity(conn, user_id)?
        .map(|e| e.canonical_name)
        .ok_or_else(|| FactError::not_found(format!("name for user {user_id}")))
}

/// Canonical names of the user's active pets, in the order they were first mentioned.
pub fn get_pet_names(conn: &Connection, user_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT canonical_name FROM entities \
         WHERE user_id = ?1 AND entity_type = 'pet' AND status = 'active' \
         ORDER BY created_at, rowid",
    )?;
    let names = stmt
        .query_map(params![user_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(names)
}

// ── Audit log ────────────────────────────────────────────────────────────────

/// Write an entry to the audit_log table.
pub(crate) fn write_audit_log(
    conn: &Connection,
    user_id: &str,
    entity_id: Option<&str>,
    action: AuditAction,
    old_value: Option<&str>,
    new_value: Option<&str>,
    source_message_id: Option<&str>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO audit_log (user_id, entity_id, action_type, old_value, new_value, source_message_id, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            user_id,
            entity_id,
            action.as_str(),
            old_value,
            new_value,
            source_message_id,
            now_timestamp()
        ],
    )?;
    Ok(())
}

/// Audit entries for one entity, oldest first.
pub fn audit_trail(conn: &Connection, entity_id: &str) -> Result<Vec<AuditEntry>> {
    let mut stmt = conn.prepare(
        "SELECT entity_id, action_type, old_value, new_value, source_message_id, created_at \
         FROM audit_log WHERE entity_id = ?1 ORDER BY id",
    )?;
    let entries = stmt
        .query_map(params![entity_id], |row| {
            Ok(AuditEntry {
                entity_id: row.get(0)?,
                action_type: parse_col(row, 1)?,
                old_value: row.get(2)?,
                new_value: row.get(3)?,
                source_message_id: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn test_db() -> Connection {
        db::open_memory_database().unwrap()
    }

    fn user_candidate(name: &str) -> EntityCandidate {
        EntityCandidate::new("u1", EntityType::Person, name, 0.9).subtype(USER_SUBTYPE)
    }

    #[test]
    fn test_upsert_creates_active_entity() {
        let conn = test_db();
        let outcome = upsert_entity(&conn, &user_candidate("Sarah"), StorePolicy::default()).unwrap();
        assert!(outcome.created);
        assert!(outcome.activated);

        let entity = get_entity_by_id(&conn, &outcome.entity_id).unwrap();
        assert_eq!(entity.canonical_name, "Sarah");
        assert_eq!(entity.status, EntityStatus::Active);
        assert_eq!(entity.entity_subtype.as_deref(), Some("user"));
    }

    #[test]
    fn test_upsert_is_idempotent_and_reinforces() {
        let conn = test_db();
        let first = upsert_entity(&conn, &user_candidate("Sarah"), StorePolicy::default()).unwrap();
        let second = upsert_entity(&conn, &user_candidate("Sarah"), StorePolicy::default()).unwrap();

        assert!(!second.created);
        assert_eq!(first.entity_id, second.entity_id);
        assert!((second.confidence - 1.0).abs() < 1e-9);

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM entities WHERE status IN ('proposed','active')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_low_confidence_is_proposed_until_reinforced() {
        let conn = test_db();
        let candidate = EntityCandidate::new("u1", EntityType::Pet, "Rex", 0.5);
        let first = upsert_entity(&conn, &candidate, StorePolicy::default()).unwrap();
        assert!(!first.activated);
        assert_eq!(
            get_entity_by_id(&conn, &first.entity_id).unwrap().status,
            EntityStatus::Proposed
        );
        assert!(get_pet_names(&conn, "u1").unwrap().is_empty());

        let policy = StorePolicy {
            activation_threshold: 0.7,
            reinforcement_increment: 0.25,
        };
        let second = upsert_entity(&conn, &candidate, policy).unwrap();
        assert!(second.activated);
        assert_eq!(get_pet_names(&conn, "u1").unwrap(), vec!["Rex"]);
    }

    #[test]
    fn test_upsert_rejects_invalid_confidence_and_empty_name() {
        let conn = test_db();
        let bad = EntityCandidate::new("u1", EntityType::Pet, "Rex", 1.5);
        assert!(matches!(
            upsert_entity(&conn, &bad, StorePolicy::default()),
            Err(FactError::Validation(_))
        ));
        let empty = EntityCandidate::new("u1", EntityType::Pet, "   ", 0.9);
        assert!(matches!(
            upsert_entity(&conn, &empty, StorePolicy::default()),
            Err(FactError::Validation(_))
        ));
    }

    #[test]
    fn test_upsert_matches_exact_alias() {
        let conn = test_db();
        let holly = upsert_entity(
            &conn,
            &EntityCandidate::new("u1", EntityType::Pet, "Holly", 0.9),
            StorePolicy::default(),
        )
        .unwrap();
        add_alias(&conn, &holly.entity_id, "Hols", AliasType::Nickname, 0.8, None).unwrap();

        let again = upsert_entity(
            &conn,
            &EntityCandidate::new("u1", EntityType::Pet, "Hols", 0.9),
            StorePolicy::default(),
        )
        .unwrap();
        assert!(!again.created);
        assert_eq!(again.entity_id, holly.entity_id);
    }

    #[test]
    fn test_get_user_name_not_found() {
        let conn = test_db();
        assert!(matches!(get_user_name(&conn, "nobody"), Err(FactError::NotFound(_))));
    }

    #[test]
    fn test_users_are_partitioned() {
        let conn = test_db();
        upsert_entity(&conn, &user_candidate("Sarah"), StorePolicy::default()).unwrap();
        let other = EntityCandidate::new("u2", EntityType::Person, "Tom", 0.9).subtype(USER_SUBTYPE);
        upsert_entity(&conn, &other, StorePolicy::default()).unwrap();

        assert_eq!(get_user_name(&conn, "u1").unwrap(), "Sarah");
        assert_eq!(get_user_name(&conn, "u2").unwrap(), "Tom");
    }

    #[test]
    fn test_set_attribute_keeps_history() {
        let conn = test_db();
        let kind = AttributeKind::Location;
        assert_eq!(
            set_attribute(&conn, "u1", &Subject::User, &kind, "Boston", 0.9, Some("m1")).unwrap(),
            AttributeOutcome::Created
        );
        assert_eq!(
            set_attribute(&conn, "u1", &Subject::User, &kind, "Portland", 0.9, Some("m2")).unwrap(),
            AttributeOutcome::Replaced {
                previous: "Boston".into()
            }
        );

        let current = current_attributes(&conn, "u1", &Subject::User, &kind).unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].value, "Portland");

        let history: Vec<String> = attribute_history(&conn, "u1", &Subject::User, &kind)
            .unwrap()
            .into_iter()
            .map(|a| a.value)
            .collect();
        assert_eq!(history, vec!["Boston", "Portland"]);
    }

    #[test]
    fn test_same_attribute_value_reinforces() {
        let conn = test_db();
        let kind = AttributeKind::Occupation;
        set_attribute(&conn, "u1", &Subject::User, &kind, "nurse", 0.6, None).unwrap();
        assert_eq!(
            set_attribute(&conn, "u1", &Subject::User, &kind, "Nurse", 0.9, None).unwrap(),
            AttributeOutcome::Reinforced
        );
        let current = current_attributes(&conn, "u1", &Subject::User, &kind).unwrap();
        assert_eq!(current.len(), 1);
        assert!((current[0].confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_attribute_whitespace_is_collapsed() {
        let conn = test_db();
        let kind = AttributeKind::Location;
        set_attribute(&conn, "u1", &Subject::User, &kind, "  New\n  York\t City ", 0.9, None).unwrap();
        let current = current_attributes(&conn, "u1", &Subject::User, &kind).unwrap();
        assert_eq!(current[0].value, "New York City");

        record_past_attribute(&conn, "u1", &Subject::User, &kind, "Old\r\nTown", 0.9, None).unwrap();
        let history: Vec<String> = attribute_history(&conn, "u1", &Subject::User, &kind)
            .unwrap()
            .into_iter()
            .map(|a| a.value)
            .collect();
        assert!(history.contains(&"Old Town".to_string()), "{history:?}");

        assert!(matches!(
            set_attribute(&conn, "u1", &Subject::User, &kind, "\n\t ", 0.9, None),
            Err(FactError::Validation(_))
        ));
    }

    #[test]
    fn test_cumulative_attribute_appends() {
        let conn = test_db();
        let kind = AttributeKind::Hobby;
        set_attribute(&conn, "u1", &Subject::User, &kind, "climbing", 0.9, None).unwrap();
        set_attribute(&conn, "u1", &Subject::User, &kind, "chess", 0.9, None).unwrap();
        assert_eq!(current_attributes(&conn, "u1", &Subject::User, &kind).unwrap().len(), 2);
    }

    #[test]
    fn test_past_attribute_never_becomes_current() {
        let conn = test_db();
        let kind = AttributeKind::Location;
        assert!(record_past_attribute(&conn, "u1", &Subject::User, &kind, "Boston", 0.9, None).unwrap());
        assert!(!record_past_attribute(&conn, "u1", &Subject::User, &kind, "boston", 0.9, None).unwrap());
        assert!(current_attributes(&conn, "u1", &Subject::User, &kind).unwrap().is_empty());
        assert_eq!(attribute_history(&conn, "u1", &Subject::User, &kind).unwrap().len(), 1);
    }

    #[test]
    fn test_mark_merged_keeps_row_with_back_reference() {
        let conn = test_db();
        let a = upsert_entity(&conn, &EntityCandidate::new("u1", EntityType::Pet, "Holly", 0.9), StorePolicy::default()).unwrap();
        let b = upsert_entity(&conn, &EntityCandidate::new("u1", EntityType::Pet, "holly", 0.8), StorePolicy::default()).unwrap();

        mark_merged(&conn, &b.entity_id, &a.entity_id, None).unwrap();
        let merged = get_entity_by_id(&conn, &b.entity_id).unwrap();
        assert_eq!(merged.status, EntityStatus::Merged);
        assert_eq!(merged.merged_into.as_deref(), Some(a.entity_id.as_str()));
        assert!(mark_merged(&conn, &a.entity_id, &a.entity_id, None).is_err());
    }

    #[test]
    fn test_rename_keeps_old_name_as_alias() {
        let conn = test_db();
        let user = upsert_entity(&conn, &user_candidate("Robert"), StorePolicy::default()).unwrap();
        rename_entity(&conn, &user.entity_id, "Bob", Some("m2")).unwrap();

        assert_eq!(get_user_name(&conn, "u1").unwrap(), "Bob");
        let aliases: Vec<String> = aliases_of(&conn, &user.entity_id)
            .unwrap()
            .into_iter()
            .map(|a| a.alias_name)
            .collect();
        assert_eq!(aliases, vec!["Robert"]);

        let entity = get_entity_by_id(&conn, &user.entity_id).unwrap();
        assert_eq!(entity.source_type, SourceType::Corrected);
    }

    #[test]
    fn test_get_entity_by_alias_and_subtype() {
        let conn = test_db();
        let dog = EntityCandidate::new("u1", EntityType::Pet, "Benny", 0.9).subtype("dog");
        let outcome = upsert_entity(&conn, &dog, StorePolicy::default()).unwrap();
        add_alias(&conn, &outcome.entity_id, "Ben", AliasType::Nickname, 0.9, None).unwrap();

        assert_eq!(get_entity(&conn, "u1", EntityType::Pet, None, "Ben").unwrap().id, outcome.entity_id);
        assert_eq!(
            get_entity(&conn, "u1", EntityType::Pet, Some("dog"), "Benny").unwrap().id,
            outcome.entity_id
        );
        assert!(matches!(
            get_entity(&conn, "u1", EntityType::Pet, Some("cat"), "Benny"),
            Err(FactError::NotFound(_))
        ));
    }

    #[test]
    fn test_write_scope_commit_invalidates_cache() {
        let mut conn = test_db();
        cache::put(&conn, "u1", cache::CacheKey::UserName, &serde_json::json!("Old"), chrono::Duration::hours(1)).unwrap();

        let scope = WriteScope::begin(&mut conn, "u1").unwrap();
        upsert_entity(&scope, &user_candidate("Sarah"), StorePolicy::default()).unwrap();
        scope.commit().unwrap();

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM fact_cache WHERE user_id = 'u1'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[test]
    fn test_dropped_write_scope_rolls_back() {
        let mut conn = test_db();
        {
            let scope = WriteScope::begin(&mut conn, "u1").unwrap();
            upsert_entity(&scope, &user_candidate("Sarah"), StorePolicy::default()).unwrap();
        }
        assert!(get_user_name(&conn, "u1").is_err());
    }

    #[test]
    fn test_audit_trail_records_lifecycle() {
        let conn = test_db();
        let outcome = upsert_entity(&conn, &user_candidate("Sarah").message(Some("m1")), StorePolicy::default()).unwrap();
        upsert_entity(&conn, &user_candidate("Sarah").message(Some("m2")), StorePolicy::default()).unwrap();

        let trail = audit_trail(&conn, &outcome.entity_id).unwrap();
        let actions: Vec<AuditAction> = trail.iter().map(|e| e.action_type).collect();
        assert_eq!(actions, vec![AuditAction::Create, AuditAction::Reinforce]);
        assert_eq!(trail[0].source_message_id.as_deref(), Some("m1"));
    }
}
