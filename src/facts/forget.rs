//! User-initiated deactivation.
//!
//! Entities are never hard-deleted. Forgetting moves an active entity to
//! `inactive`, which removes it from every guaranteed read while keeping its
//! aliases, attributes, and audit history in place.

use rusqlite::{params, Connection};
use serde::Serialize;

use super::now_timestamp;
use super::store::{get_entity_by_id, write_audit_log};
use super::types::{AuditAction, EntityStatus};
use crate::error::{FactError, Result};

/// Result returned from [`deactivate_entity`].
#[derive(Debug, Serialize)]
pub struct ForgetResult {
    pub id: String,
    pub canonical_name: String,
    /// `false` when the entity was already inactive.
    pub deactivated: bool,
}

/// Deactivate an entity owned by `user_id`. Merged entities cannot be forgotten
/// directly; forget the entity they were merged into.
pub fn deactivate_entity(
    conn: &Connection,
    user_id: &str,
    entity_id: &str,
    reason: Option<&str>,
) -> Result<ForgetResult> {
    let entity = get_entity_by_id(conn, entity_id)?;
    if entity.user_id != user_id {
        return Err(FactError::not_found(format!("entity {entity_id} for user {user_id}")));
    }

    match entity.status {
        EntityStatus::Inactive => {
            return Ok(ForgetResult {
                id: entity.id,
                canonical_name: entity.canonical_name,
                deactivated: false,
            })
        }
        EntityStatus::Merged => {
            return Err(FactError::validation(format!(
                "entity {entity_id} was merged into {}",
                entity.merged_into.as_deref().unwrap_or("another entity")
            )))
        }
        EntityStatus::Proposed | EntityStatus::Active => {}
    }

    conn.execute(
        "UPDATE entities SET status = 'inactive', updated_at = ?1 WHERE id = ?2",
        params![now_timestamp(), entity_id],
    )?;
    write_audit_log(
        conn,
        user_id,
        Some(entity_id),
        AuditAction::Deactivate,
        Some(entity.status.as_str()),
        reason.or(Some(EntityStatus::Inactive.as_str())),
        None,
    )?;

    tracing::info!(entity_id, user_id, "entity deactivated");
    Ok(ForgetResult {
        id: entity.id,
        canonical_name: entity.canonical_name,
        deactivated: true,
    })
}
