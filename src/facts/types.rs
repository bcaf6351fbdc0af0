//! Core fact type definitions.
//!
//! Defines [`EntityType`], [`EntityStatus`] (the entity lifecycle), [`Entity`],
//! [`Alias`], [`Relationship`], [`Attribute`] with its [`AttributeKind`] tagged
//! union, [`Conflict`], and [`AuditEntry`].

use serde::{Deserialize, Serialize};

use crate::error::{FactError, Result};

/// Generates `as_str`, `Display`, and `FromStr` for a fieldless enum stored as TEXT.
macro_rules! sql_enum {
    ($name:ident, $what:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// SQL-compatible string representation.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(format!(concat!("unknown ", $what, ": {}"), s)),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Pet,
    Place,
    Thing,
}

sql_enum!(EntityType, "entity type", {
    Person => "person",
    Pet => "pet",
    Place => "place",
    Thing => "thing",
});

/// How a fact entered the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Said directly by the user and matched by a deterministic rule.
    UserStated,
    /// Produced by the structured-extraction model.
    Inferred,
    /// A later statement that replaced an earlier one ("call me Sam").
    Corrected,
}

sql_enum!(SourceType, "source type", {
    UserStated => "user_stated",
    Inferred => "inferred",
    Corrected => "corrected",
});

/// Entity lifecycle: `Proposed → Active → Merged`, or `Active → Inactive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Proposed,
    Active,
    /// Absorbed into another entity during conflict resolution.
    Merged,
    /// Deactivated at the user's request.
    Inactive,
}

sql_enum!(EntityStatus, "entity status", {
    Proposed => "proposed",
    Active => "active",
    Merged => "merged",
    Inactive => "inactive",
});

impl EntityStatus {
    /// Proposed and active entities take part in the identity invariant.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Proposed | Self::Active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasType {
    Nickname,
    Formal,
    Variant,
}

sql_enum!(AliasType, "alias type", {
    Nickname => "nickname",
    Formal => "formal",
    Variant => "variant",
});

/// How successive values of one attribute relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributePolicy {
    /// One current value; the most recent statement wins and earlier values become history.
    Mutable,
    /// One current value that is not expected to change. A differing
    /// high-confidence value becomes current but is held for review.
    Stable,
    /// Append-only; every distinct value stays current.
    Cumulative,
}

sql_enum!(AttributePolicy, "attribute policy", {
    Mutable => "mutable",
    Stable => "stable",
    Cumulative => "cumulative",
});

impl AttributePolicy {
    pub fn is_single_valued(&self) -> bool {
        !matches!(self, Self::Cumulative)
    }
}

/// Known attribute kinds plus a generic fallback for names we have no rule for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AttributeKind {
    Location,
    Occupation,
    Employer,
    Birthday,
    PersonalFact,
    Hobby,
    Custom(String),
}

impl AttributeKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Location => "location",
            Self::Occupation => "occupation",
            Self::Employer => "employer",
            Self::Birthday => "birthday",
            Self::PersonalFact => "personal_fact",
            Self::Hobby => "hobby",
            Self::Custom(name) => name,
        }
    }

    pub fn policy(&self) -> AttributePolicy {
        match self {
            Self::Location | Self::Occupation | Self::Employer | Self::Custom(_) => {
                AttributePolicy::Mutable
            }
            Self::Birthday => AttributePolicy::Stable,
            Self::PersonalFact | Self::Hobby => AttributePolicy::Cumulative,
        }
    }
}

impl From<&str> for AttributeKind {
    fn from(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "location" | "city" | "lives_in" => Self::Location,
            "occupation" | "job" | "profession" => Self::Occupation,
            "employer" | "works_at" | "company" => Self::Employer,
            "birthday" | "date_of_birth" => Self::Birthday,
            "personal_fact" | "fact" => Self::PersonalFact,
            "hobby" | "interest" => Self::Hobby,
            other => Self::Custom(other.replace(' ', "_")),
        }
    }
}

impl From<String> for AttributeKind {
    fn from(name: String) -> Self {
        Self::from(name.as_str())
    }
}

impl From<AttributeKind> for String {
    fn from(kind: AttributeKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who an attribute or relationship is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    /// The user themself.
    User,
    Entity(String),
}

impl Subject {
    pub fn entity_id(&self) -> Option<&str> {
        match self {
            Self::User => None,
            Self::Entity(id) => Some(id),
        }
    }

    pub(crate) fn from_column(entity_id: Option<String>) -> Self {
        entity_id.map_or(Self::User, Self::Entity)
    }
}

/// The object end of a relationship. Exactly one form exists by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipObject {
    Entity(String),
    Value(String),
}

impl RelationshipObject {
    /// Build from the two nullable columns/fields, rejecting none-or-both.
    pub fn from_parts(entity_id: Option<String>, value: Option<String>) -> Result<Self> {
        match (entity_id, value) {
            (Some(id), None) => Ok(Self::Entity(id)),
            (None, Some(v)) if !v.trim().is_empty() => Ok(Self::Value(v)),
            (None, _) => Err(FactError::validation(
                "relationship needs an object entity or an object value",
            )),
            (Some(_), Some(_)) => Err(FactError::validation(
                "relationship cannot have both an object entity and an object value",
            )),
        }
    }

    pub(crate) fn columns(&self) -> (Option<&str>, Option<&str>) {
        match self {
            Self::Entity(id) => (Some(id), None),
            Self::Value(v) => (None, Some(v)),
        }
    }
}

/// An entity record, matching the `entities` table schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// UUID v7 (time-sortable) primary key.
    pub id: String,
    pub user_id: String,
    pub entity_type: EntityType,
    /// Narrower kind, e.g. `"user"` for the user's own person entity or `"dog"` for a pet.
    pub entity_subtype: Option<String>,
    /// The authoritative name, returned verbatim by guaranteed reads.
    pub canonical_name: String,
    pub confidence: f64,
    pub source_type: SourceType,
    pub status: EntityStatus,
    /// Set when `status` is `Merged`: the entity this one was folded into.
    pub merged_into: Option<String>,
    pub source_message_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Entity {
    pub fn is_active(&self) -> bool {
        self.status.is_live()
    }
}

/// An entity as proposed by the extractor, before it reaches the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityCandidate {
    pub user_id: String,
    pub entity_type: EntityType,
    pub entity_subtype: Option<String>,
    pub name: String,
    pub confidence: f64,
    pub source_type: SourceType,
    pub source_message_id: Option<String>,
}

impl EntityCandidate {
    pub fn new(user_id: &str, entity_type: EntityType, name: &str, confidence: f64) -> Self {
        Self {
            user_id: user_id.to_string(),
            entity_type,
            entity_subtype: None,
            name: name.to_string(),
            confidence,
            source_type: SourceType::UserStated,
            source_message_id: None,
        }
    }

    pub fn subtype(mut self, subtype: &str) -> Self {
        self.entity_subtype = Some(subtype.to_string());
        self
    }

    pub fn source(mut self, source_type: SourceType) -> Self {
        self.source_type = source_type;
        self
    }

    pub fn message(mut self, message_id: Option<&str>) -> Self {
        self.source_message_id = message_id.map(str::to_string);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alias {
    pub entity_id: String,
    pub alias_name: String,
    pub alias_type: AliasType,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub user_id: String,
    pub subject: Subject,
    pub relationship_type: String,
    pub object: RelationshipObject,
    pub confidence: f64,
    pub source_message_id: Option<String>,
    pub created_at: String,
}

/// One stated value of an attribute. Superseded values keep their row with
/// `is_current = false`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attribute {
    pub id: String,
    pub user_id: String,
    pub subject: Subject,
    pub kind: AttributeKind,
    pub value: String,
    pub policy: AttributePolicy,
    pub confidence: f64,
    pub is_current: bool,
    pub source_message_id: Option<String>,
    pub created_at: String,
    pub superseded_at: Option<String>,
    /// The row that replaced this one. `None` for values recorded as past facts.
    pub superseded_by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    Duplicate,
    Contradiction,
    /// More than one live entity claims to be the user.
    Identity,
}

sql_enum!(ConflictType, "conflict type", {
    Duplicate => "duplicate",
    Contradiction => "contradiction",
    Identity => "identity",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    Pending,
    Resolved,
}

sql_enum!(ResolutionStatus, "resolution status", {
    Pending => "pending",
    Resolved => "resolved",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    Merge,
    MostRecent,
    UserConfirmed,
    /// Pending conflicts have no method yet.
    Unresolved,
}

sql_enum!(ResolutionMethod, "resolution method", {
    Merge => "merge",
    MostRecent => "most_recent",
    UserConfirmed => "user_confirmed",
    Unresolved => "none",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub id: String,
    pub user_id: String,
    pub conflict_type: ConflictType,
    pub entities_involved: Vec<String>,
    pub resolution_status: ResolutionStatus,
    pub resolution_method: ResolutionMethod,
    pub details: Option<serde_json::Value>,
    pub created_at: String,
    pub resolved_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Reinforce,
    Activate,
    Alias,
    Attribute,
    Relationship,
    Merge,
    Rename,
    Deactivate,
    Resolve,
}

sql_enum!(AuditAction, "audit action", {
    Create => "create",
    Reinforce => "reinforce",
    Activate => "activate",
    Alias => "alias",
    Attribute => "attribute",
    Relationship => "relationship",
    Merge => "merge",
    Rename => "rename",
    Deactivate => "deactivate",
    Resolve => "resolve",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entity_id: Option<String>,
    pub action_type: AuditAction,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub source_message_id: Option<String>,
    pub created_at: String,
}
