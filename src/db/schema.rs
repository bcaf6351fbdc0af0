//! SQL DDL for all Verity tables.
//!
//! Defines `entities`, `aliases`, `relationships`, `attributes`, `fact_cache`,
//! `conflicts`, `audit_log`, and `schema_meta`. Every table is partitioned by
//! `user_id`. All DDL uses `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

/// All schema DDL statements for Verity's core tables.
const SCHEMA_SQL: &str = r#"
-- Entities: people, pets, places, things the user has told us about
CREATE TABLE IF NOT EXISTS entities (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    entity_type TEXT NOT NULL CHECK(entity_type IN ('person','pet','place','thing')),
    entity_subtype TEXT NOT NULL DEFAULT '',
    canonical_name TEXT NOT NULL,
    normalized_name TEXT NOT NULL,
    confidence REAL NOT NULL CHECK(confidence >= 0.0 AND confidence <= 1.0),
    source_type TEXT NOT NULL CHECK(source_type IN ('user_stated','inferred','corrected')),
    status TEXT NOT NULL DEFAULT 'proposed' CHECK(status IN ('proposed','active','merged','inactive')),
    merged_into TEXT REFERENCES entities(id),
    source_message_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_entities_identity
    ON entities(user_id, entity_type, entity_subtype, canonical_name)
    WHERE status IN ('proposed','active');
CREATE INDEX IF NOT EXISTS idx_entities_lookup
    ON entities(user_id, entity_type, entity_subtype, status);
CREATE INDEX IF NOT EXISTS idx_entities_normalized
    ON entities(user_id, entity_type, normalized_name);

-- Alternate names; never authoritative
CREATE TABLE IF NOT EXISTS aliases (
    entity_id TEXT NOT NULL REFERENCES entities(id),
    alias_name TEXT NOT NULL,
    normalized_alias TEXT NOT NULL,
    alias_type TEXT NOT NULL CHECK(alias_type IN ('nickname','formal','variant')),
    confidence REAL NOT NULL CHECK(confidence >= 0.0 AND confidence <= 1.0),
    created_at TEXT NOT NULL,
    PRIMARY KEY (entity_id, alias_name)
);

CREATE INDEX IF NOT EXISTS idx_aliases_normalized ON aliases(normalized_alias);

-- Relationships: subject_entity_id NULL means the user themself
CREATE TABLE IF NOT EXISTS relationships (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    subject_entity_id TEXT REFERENCES entities(id),
    relationship_type TEXT NOT NULL,
    object_entity_id TEXT REFERENCES entities(id),
    object_value TEXT,
    confidence REAL NOT NULL CHECK(confidence >= 0.0 AND confidence <= 1.0),
    source_message_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK ((object_entity_id IS NULL) <> (object_value IS NULL))
);

CREATE INDEX IF NOT EXISTS idx_relationships_user ON relationships(user_id, relationship_type);
CREATE INDEX IF NOT EXISTS idx_relationships_subject ON relationships(subject_entity_id);
CREATE INDEX IF NOT EXISTS idx_relationships_object ON relationships(object_entity_id);

-- Attributes with full history: one row per stated value
CREATE TABLE IF NOT EXISTS attributes (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    subject_entity_id TEXT REFERENCES entities(id),
    attribute_name TEXT NOT NULL,
    attribute_value TEXT NOT NULL,
    attribute_type TEXT NOT NULL CHECK(attribute_type IN ('mutable','stable','cumulative')),
    confidence REAL NOT NULL CHECK(confidence >= 0.0 AND confidence <= 1.0),
    is_current INTEGER NOT NULL DEFAULT 1,
    source_message_id TEXT,
    created_at TEXT NOT NULL,
    superseded_at TEXT,
    superseded_by TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_attributes_single_current
    ON attributes(user_id, COALESCE(subject_entity_id, ''), attribute_name)
    WHERE is_current = 1 AND attribute_type IN ('mutable','stable');
CREATE INDEX IF NOT EXISTS idx_attributes_lookup
    ON attributes(user_id, attribute_name, is_current);

-- Read-through projection of critical facts; never authoritative
CREATE TABLE IF NOT EXISTS fact_cache (
    user_id TEXT NOT NULL,
    cache_key TEXT NOT NULL,
    cache_value TEXT NOT NULL,
    expires_at INTEGER NOT NULL,
    PRIMARY KEY (user_id, cache_key)
);

-- Duplicate / contradiction records
CREATE TABLE IF NOT EXISTS conflicts (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    conflict_key TEXT NOT NULL UNIQUE,
    conflict_type TEXT NOT NULL CHECK(conflict_type IN ('duplicate','contradiction','identity')),
    entities_involved TEXT NOT NULL,
    resolution_status TEXT NOT NULL CHECK(resolution_status IN ('pending','resolved')),
    resolution_method TEXT NOT NULL CHECK(resolution_method IN ('merge','most_recent','user_confirmed','none')),
    details TEXT,
    created_at TEXT NOT NULL,
    resolved_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_conflicts_user ON conflicts(user_id, resolution_status);

-- Audit log
CREATE TABLE IF NOT EXISTS audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    entity_id TEXT,
    action_type TEXT NOT NULL CHECK(action_type IN ('create','reinforce','activate','alias','attribute','relationship','merge','rename','deactivate','resolve')),
    old_value TEXT,
    new_value TEXT,
    source_message_id TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_entity ON audit_log(entity_id);
CREATE INDEX IF NOT EXISTS idx_audit_user ON audit_log(user_id);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_creates_all_tables() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        for table in [
            "entities",
            "aliases",
            "relationships",
            "attributes",
            "fact_cache",
            "conflicts",
            "audit_log",
            "schema_meta",
        ] {
            assert!(tables.contains(&table.to_string()), "missing table {table}");
        }
    }

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap(); // second call should not error
    }

    #[test]
    fn relationship_requires_exactly_one_object_form() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let both_missing = conn.execute(
            "INSERT INTO relationships (id, user_id, relationship_type, confidence, created_at, updated_at) \
             VALUES ('r1', 'u1', 'lives_in', 0.9, 'now', 'now')",
            [],
        );
        assert!(both_missing.is_err());

        let value_only = conn.execute(
            "INSERT INTO relationships (id, user_id, relationship_type, object_value, confidence, created_at, updated_at) \
             VALUES ('r2', 'u1', 'lives_in', 'Portland', 0.9, 'now', 'now')",
            [],
        );
        assert!(value_only.is_ok());
    }
}
