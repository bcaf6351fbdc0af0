//! The critical-fact projection served by the guaranteed path.

use std::collections::BTreeMap;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use super::store;
use super::types::{AttributeKind, Subject};
use crate::error::{FactError, Result};

/// A fact category that gets the exact-retrieval guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticalCategory {
    UserName,
    PetNames,
    Location,
    Occupation,
}

impl CriticalCategory {
    pub const ALL: [CriticalCategory; 4] = [
        Self::UserName,
        Self::PetNames,
        Self::Location,
        Self::Occupation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserName => "user_name",
            Self::PetNames => "pet_names",
            Self::Location => "location",
            Self::Occupation => "occupation",
        }
    }

    /// Label used in the prompt block.
    pub fn label(&self) -> &'static str {
        match self {
            Self::UserName => "User's name",
            Self::PetNames => "User's pets",
            Self::Location => "User lives in",
            Self::Occupation => "User works as",
        }
    }
}

impl std::fmt::Display for CriticalCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the guaranteed path knows about a user, read in one transaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CriticalFacts {
    pub user_name: Option<String>,
    pub pet_names: Vec<String>,
    pub location: Option<String>,
    pub occupation: Option<String>,
}

impl CriticalFacts {
    /// Read directly from the store.
    pub fn load(conn: &Connection, user_id: &str) -> Result<Self> {
        let user_name = match store::get_user_name(conn, user_id) {
            Ok(name) => Some(name),
            Err(FactError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        let current = |kind: AttributeKind| -> Result<Option<String>> {
            Ok(store::current_attributes(conn, user_id, &Subject::User, &kind)?
                .into_iter()
                .next()
                .map(|a| a.value))
        };

        Ok(Self {
            user_name,
            pet_names: store::get_pet_names(conn, user_id)?,
            location: current(AttributeKind::Location)?,
            occupation: current(AttributeKind::Occupation)?,
        })
    }

    pub fn is_present(&self, category: CriticalCategory) -> bool {
        match category {
            CriticalCategory::UserName => self.user_name.is_some(),
            CriticalCategory::PetNames => !self.pet_names.is_empty(),
            CriticalCategory::Location => self.location.is_some(),
            CriticalCategory::Occupation => self.occupation.is_some(),
        }
    }

    /// Required categories with no value, in the order given.
    pub fn missing(&self, required: &[CriticalCategory]) -> Vec<CriticalCategory> {
        required
            .iter()
            .copied()
            .filter(|c| !self.is_present(*c))
            .collect()
    }

    /// Fraction of required categories present. An empty requirement set scores 1.0.
    pub fn confidence(&self, required: &[CriticalCategory]) -> f64 {
        if required.is_empty() {
            return 1.0;
        }
        let present = required.iter().filter(|c| self.is_present(**c)).count();
        present as f64 / required.len() as f64
    }

    /// Present categories as a JSON-ready map keyed by category name.
    pub fn to_map(&self) -> BTreeMap<String, serde_json::Value> {
        let mut map = BTreeMap::new();
        if let Some(name) = &self.user_name {
            map.insert("user_name".to_string(), serde_json::json!(name));
        }
        if !self.pet_names.is_empty() {
            map.insert("pet_names".to_string(), serde_json::json!(self.pet_names));
        }
        if let Some(location) = &self.location {
            map.insert("location".to_string(), serde_json::json!(location));
        }
        if let Some(occupation) = &self.occupation {
            map.insert("occupation".to_string(), serde_json::json!(occupation));
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::facts::store::{set_attribute, upsert_entity, StorePolicy, USER_SUBTYPE};
    use crate::facts::types::{EntityCandidate, EntityType};

    #[test]
    fn load_empty_user() {
        let conn = db::open_memory_database().unwrap();
        let facts = CriticalFacts::load(&conn, "u1").unwrap();
        assert_eq!(facts, CriticalFacts::default());
        assert!(facts.to_map().is_empty());
        assert_eq!(facts.confidence(&[CriticalCategory::UserName, CriticalCategory::PetNames]), 0.0);
    }

    #[test]
    fn load_full_user() {
        let conn = db::open_memory_database().unwrap();
        let policy = StorePolicy::default();
        upsert_entity(
            &conn,
            &EntityCandidate::new("u1", EntityType::Person, "Clemens", 0.9).subtype(USER_SUBTYPE),
            policy,
        )
        .unwrap();
        upsert_entity(&conn, &EntityCandidate::new("u1", EntityType::Pet, "Holly", 0.9), policy).unwrap();
        set_attribute(&conn, "u1", &Subject::User, &AttributeKind::Location, "Vienna", 0.9, None).unwrap();

        let facts = CriticalFacts::load(&conn, "u1").unwrap();
        assert_eq!(facts.user_name.as_deref(), Some("Clemens"));
        assert_eq!(facts.pet_names, vec!["Holly"]);
        assert_eq!(facts.location.as_deref(), Some("Vienna"));
        assert_eq!(facts.missing(&CriticalCategory::ALL), vec![CriticalCategory::Occupation]);

        let map = facts.to_map();
        assert_eq!(map["user_name"], serde_json::json!("Clemens"));
        assert_eq!(map["pet_names"], serde_json::json!(["Holly"]));
    }

    #[test]
    fn confidence_is_ratio_of_required() {
        let facts = CriticalFacts {
            user_name: Some("Sarah".into()),
            ..Default::default()
        };
        assert_eq!(facts.confidence(&[CriticalCategory::UserName, CriticalCategory::PetNames]), 0.5);
        assert_eq!(facts.confidence(&[]), 1.0);
    }

    #[test]
    fn categories_deserialize_from_config_names() {
        let parsed: Vec<CriticalCategory> = serde_json::from_str(r#"["user_name","location"]"#).unwrap();
        assert_eq!(parsed, vec![CriticalCategory::UserName, CriticalCategory::Location]);
    }
}
