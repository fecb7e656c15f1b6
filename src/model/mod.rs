//! Core domain identifiers: object types, row values, and caller identity

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier for every stored object. Callers may supply their own ids on
/// create (required for self-referential batches); missing ids are generated.
pub type Id = Uuid;

/// A store row or write payload: a JSON object keyed by field name.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Tag identifying one entity kind. Every queryable/mutable entity has
/// exactly one `ObjectType` and exactly one registered format converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectType {
    User,
    Organization,
    Member,
    Project,
    Routine,
    RoutineNode,
    NodeLink,
    Standard,
    StandardVersion,
    Tag,
    Comment,
    Star,
    Vote,
}

impl ObjectType {
    /// All registered object types, in registration order.
    pub fn all() -> &'static [ObjectType] {
        use ObjectType::*;
        &[
            User,
            Organization,
            Member,
            Project,
            Routine,
            RoutineNode,
            NodeLink,
            Standard,
            StandardVersion,
            Tag,
            Comment,
            Star,
            Vote,
        ]
    }

    /// PascalCase name as it appears in `__typename` tags and union keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::User => "User",
            ObjectType::Organization => "Organization",
            ObjectType::Member => "Member",
            ObjectType::Project => "Project",
            ObjectType::Routine => "Routine",
            ObjectType::RoutineNode => "RoutineNode",
            ObjectType::NodeLink => "NodeLink",
            ObjectType::Standard => "Standard",
            ObjectType::StandardVersion => "StandardVersion",
            ObjectType::Tag => "Tag",
            ObjectType::Comment => "Comment",
            ObjectType::Star => "Star",
            ObjectType::Vote => "Vote",
        }
    }

    /// camelCase singular name used for top-level query fields.
    pub fn camel(&self) -> &'static str {
        match self {
            ObjectType::User => "user",
            ObjectType::Organization => "organization",
            ObjectType::Member => "member",
            ObjectType::Project => "project",
            ObjectType::Routine => "routine",
            ObjectType::RoutineNode => "routineNode",
            ObjectType::NodeLink => "nodeLink",
            ObjectType::Standard => "standard",
            ObjectType::StandardVersion => "standardVersion",
            ObjectType::Tag => "tag",
            ObjectType::Comment => "comment",
            ObjectType::Star => "star",
            ObjectType::Vote => "vote",
        }
    }

    /// camelCase plural name used for list query fields.
    pub fn plural_camel(&self) -> &'static str {
        match self {
            ObjectType::User => "users",
            ObjectType::Organization => "organizations",
            ObjectType::Member => "members",
            ObjectType::Project => "projects",
            ObjectType::Routine => "routines",
            ObjectType::RoutineNode => "routineNodes",
            ObjectType::NodeLink => "nodeLinks",
            ObjectType::Standard => "standards",
            ObjectType::StandardVersion => "standardVersions",
            ObjectType::Tag => "tags",
            ObjectType::Comment => "comments",
            ObjectType::Star => "stars",
            ObjectType::Vote => "votes",
        }
    }

    /// Short key used to tag per-type partitions in heterogeneous result
    /// sets, so callers can interleave results without losing per-type
    /// pagination cursors.
    pub fn short_key(&self) -> &'static str {
        match self {
            ObjectType::User => "u",
            ObjectType::Organization => "o",
            ObjectType::Member => "m",
            ObjectType::Project => "p",
            ObjectType::Routine => "r",
            ObjectType::RoutineNode => "rn",
            ObjectType::NodeLink => "nl",
            ObjectType::Standard => "s",
            ObjectType::StandardVersion => "sv",
            ObjectType::Tag => "t",
            ObjectType::Comment => "c",
            ObjectType::Star => "st",
            ObjectType::Vote => "v",
        }
    }

    /// Resolve a PascalCase name (e.g. a union key) back to an ObjectType.
    pub fn from_name(name: &str) -> Option<ObjectType> {
        ObjectType::all().iter().copied().find(|t| t.as_str() == name)
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the caller, resolved by the external authentication
/// collaborator before a request reaches the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Caller {
    /// Account id, `None` for anonymous callers.
    pub id: Option<Id>,
    /// Preferred languages, most preferred first.
    pub languages: Vec<String>,
    /// Network address, used as the rate-limit principal for anonymous
    /// callers.
    pub address: Option<String>,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn for_user(id: Id) -> Self {
        Self {
            id: Some(id),
            languages: Vec::new(),
            address: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.id.is_some()
    }
}

/// Parse an id out of a JSON value (ids travel as strings in rows).
pub fn id_from_value(value: &serde_json::Value) -> Option<Id> {
    value.as_str().and_then(|s| Uuid::parse_str(s).ok())
}

/// Render an id as the JSON value stored in rows.
pub fn id_to_value(id: Id) -> serde_json::Value {
    serde_json::Value::String(id.to_string())
}

/// True when `value` holds the string form of `id`.
pub fn value_is_id(value: &serde_json::Value, id: Id) -> bool {
    id_from_value(value) == Some(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_type_name_roundtrip() {
        for ty in ObjectType::all() {
            assert_eq!(ObjectType::from_name(ty.as_str()), Some(*ty));
        }
    }

    #[test]
    fn test_short_keys_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for ty in ObjectType::all() {
            assert!(seen.insert(ty.short_key()), "duplicate key {}", ty.short_key());
        }
    }

    #[test]
    fn test_id_value_roundtrip() {
        let id = Uuid::new_v4();
        let value = id_to_value(id);
        assert_eq!(id_from_value(&value), Some(id));
        assert!(value_is_id(&value, id));
        assert!(!value_is_id(&serde_json::Value::Null, id));
    }
}
