//! Relationship storage and deduplication.
//!
//! Stores directed (subject, relationship_type, object) triples where the
//! subject is the user or an entity and the object is either an entity or a
//! literal value. Storing the same triple twice raises its confidence instead
//! of adding a row.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use super::store::{get_entity_by_id, validate_confidence, write_audit_log};
use super::types::{AuditAction, Relationship, RelationshipObject, Subject};
use super::{new_id, now_timestamp};
use crate::error::{FactError, Result};

/// Result returned from [`add_relationship`].
#[derive(Debug, Serialize)]
pub struct AddRelationshipResult {
    /// ID of the created (or existing) relationship.
    pub id: String,
    /// `true` if this exact triple already existed.
    pub deduplicated: bool,
}

/// Store a relationship for a user.
///
/// Both entity ends (when present) must exist, belong to `user_id`, and be live.
pub fn add_relationship(
    conn: &Connection,
    user_id: &str,
    subject: &Subject,
    relationship_type: &str,
    object: &RelationshipObject,
    confidence: f64,
    source_message_id: Option<&str>,
) -> Result<AddRelationshipResult> {
    validate_confidence(confidence)?;
    let relationship_type = relationship_type.trim();
    if relationship_type.is_empty() {
        return Err(FactError::validation("relationship_type must not be empty"));
    }
    if let Some(id) = subject.entity_id() {
        validate_entity(conn, user_id, id, "subject")?;
    }
    if let RelationshipObject::Entity(id) = object {
        validate_entity(conn, user_id, id, "object")?;
    }
    let (object_entity_id, object_value) = object.columns();
    if object_value.is_some_and(|v| v.trim().is_empty()) {
        return Err(FactError::validation("relationship object value must not be empty"));
    }

    let existing_id: Option<String> = conn
        .query_row(
            "SELECT id FROM relationships \
             WHERE user_id = ?1 AND COALESCE(subject_entity_id, '') = COALESCE(?2, '') \
               AND relationship_type = ?3 \
               AND COALESCE(object_entity_id, '') = COALESCE(?4, '') \
               AND COALESCE(object_value, '') = COALESCE(?5, '')",
            params![user_id, subject.entity_id(), relationship_type, object_entity_id, object_value],
            |row| row.get(0),
        )
        .optional()?;

    let now = now_timestamp();
    if let Some(id) = existing_id {
        conn.execute(
            "UPDATE relationships SET confidence = MAX(confidence, ?1), updated_at = ?2 WHERE id = ?3",
            params![confidence, now, id],
        )?;
        return Ok(AddRelationshipResult {
            id,
            deduplicated: true,
        });
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO relationships (id, user_id, subject_entity_id, relationship_type, \
         object_entity_id, object_value, confidence, source_message_id, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
        params![
            id,
            user_id,
            subject.entity_id(),
            relationship_type,
            object_entity_id,
            object_value,
            confidence,
            source_message_id,
            now,
        ],
    )?;
    write_audit_log(
        conn,
        user_id,
        subject.entity_id(),
        AuditAction::Relationship,
        None,
        Some(&format!(
            "{relationship_type} -> {}",
            object_entity_id.or(object_value).unwrap_or_default()
        )),
        source_message_id,
    )?;

    Ok(AddRelationshipResult {
        id,
        deduplicated: false,
    })
}

/// All relationships of a user, oldest first.
pub fn list_relationships(conn: &Connection, user_id: &str) -> Result<Vec<Relationship>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, subject_entity_id, relationship_type, object_entity_id, object_value, \
         confidence, source_message_id, created_at \
         FROM relationships WHERE user_id = ?1 ORDER BY created_at, rowid",
    )?;
    let rows = stmt
        .query_map(params![user_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, f64>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, String>(8)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, user_id, subject, relationship_type, object_entity, object_value, confidence, source_message_id, created_at)| {
            Ok(Relationship {
                id,
                user_id,
                subject: Subject::from_column(subject),
                relationship_type,
                object: RelationshipObject::from_parts(object_entity, object_value)?,
                confidence,
                source_message_id,
                created_at,
            })
        })
        .collect()
}

/// Validate that an entity exists, belongs to the user, and is live.
fn validate_entity(conn: &Connection, user_id: &str, entity_id: &str, role: &str) -> Result<()> {
    let entity = get_entity_by_id(conn, entity_id)
        .map_err(|_| FactError::not_found(format!("{role} entity {entity_id}")))?;
    if entity.user_id != user_id {
        return Err(FactError::not_found(format!("{role} entity {entity_id} for user {user_id}")));
    }
    if !entity.is_active() {
        return Err(FactError::validation(format!(
            "{role} entity {entity_id} is {}",
            entity.status
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::facts::store::{upsert_entity, StorePolicy};
    use crate::facts::types::{EntityCandidate, EntityType};

    fn test_db() -> Connection {
        db::open_memory_database().unwrap()
    }

    fn insert_pet(conn: &Connection, user_id: &str, name: &str) -> String {
        upsert_entity(
            conn,
            &EntityCandidate::new(user_id, EntityType::Pet, name, 0.9),
            StorePolicy::default(),
        )
        .unwrap()
        .entity_id
    }

    #[test]
    fn test_add_relationship_to_entity() {
        let conn = test_db();
        let holly = insert_pet(&conn, "u1", "Holly");
        let result = add_relationship(
            &conn,
            "u1",
            &Subject::User,
            "owns",
            &RelationshipObject::Entity(holly.clone()),
            0.9,
            Some("m1"),
        )
        .unwrap();
        assert!(!result.deduplicated);

        let all = list_relationships(&conn, "u1").unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].subject, Subject::User);
        assert_eq!(all[0].object, RelationshipObject::Entity(holly));
    }

    #[test]
    fn test_same_triple_is_idempotent() {
        let conn = test_db();
        let object = RelationshipObject::Value("Portland".into());
        let first = add_relationship(&conn, "u1", &Subject::User, "lives_in", &object, 0.7, None).unwrap();
        let second = add_relationship(&conn, "u1", &Subject::User, "lives_in", &object, 0.9, None).unwrap();

        assert!(second.deduplicated);
        assert_eq!(first.id, second.id);
        let all = list_relationships(&conn, "u1").unwrap();
        assert_eq!(all.len(), 1);
        assert!((all[0].confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_missing_or_foreign_entities() {
        let conn = test_db();
        let result = add_relationship(
            &conn,
            "u1",
            &Subject::User,
            "owns",
            &RelationshipObject::Entity("no-such-id".into()),
            0.9,
            None,
        );
        assert!(matches!(result, Err(FactError::NotFound(_))));

        let other_users_pet = insert_pet(&conn, "u2", "Rex");
        let result = add_relationship(
            &conn,
            "u1",
            &Subject::User,
            "owns",
            &RelationshipObject::Entity(other_users_pet),
            0.9,
            None,
        );
        assert!(matches!(result, Err(FactError::NotFound(_))));
    }

    #[test]
    fn test_rejects_bad_confidence_and_blank_values() {
        let conn = test_db();
        let object = RelationshipObject::Value("Portland".into());
        assert!(matches!(
            add_relationship(&conn, "u1", &Subject::User, "lives_in", &object, -0.1, None),
            Err(FactError::Validation(_))
        ));
        assert!(matches!(
            add_relationship(&conn, "u1", &Subject::User, "  ", &object, 0.9, None),
            Err(FactError::Validation(_))
        ));
        assert!(matches!(
            add_relationship(
                &conn,
                "u1",
                &Subject::User,
                "lives_in",
                &RelationshipObject::Value(" ".into()),
                0.9,
                None
            ),
            Err(FactError::Validation(_))
        ));
    }
}
