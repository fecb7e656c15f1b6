//! Type registry: per-entity-kind format converters
//!
//! One [`FormatConverter`] per [`ObjectType`], built once at startup into an
//! immutable [`TypeRegistry`] that is passed by reference into every
//! component needing it. There is no ambient global lookup; a registry miss
//! is a programming error and panics.

mod converters;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ApiError;
use crate::model::{Caller, Id, ObjectType, Row};
use crate::selection::AnnotatedShape;
use crate::store::StoreClient;

/// Reserved relationship key for fields that live on the unversioned root
/// table of a versioned entity (e.g. `StandardVersion.root` → `Standard`).
pub const ROOT_FIELD: &str = "root";

/// Picks the concrete type of a polymorphic value. Registered per union
/// field by each converter; the disambiguating rules mirror the documented
/// fallback logic (no schema-level discriminator tag exists in the wire
/// format).
pub type Discriminator = fn(&Row) -> Option<ObjectType>;

/// How a requested field name maps onto the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rel {
    /// To-one relation to another object type.
    One(ObjectType),
    /// To-many relation to another object type.
    Many(ObjectType),
    /// Many-to-many relation through a join table that is invisible in the
    /// public shape. `through` is the join-row field holding the real child.
    Joined {
        through: &'static str,
        to: ObjectType,
    },
    /// Translation sub-objects: a join table keyed by language, carried
    /// structurally without a type tag of its own.
    Translations,
    /// Polymorphic field; the concrete type is resolved per row by the
    /// registered discriminator.
    Union {
        options: &'static [ObjectType],
        discriminate: Discriminator,
    },
}

/// Which row fields identify the owner of an object.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ownership {
    /// Field holding the owning user's id, when user-ownable.
    pub user_field: Option<&'static str>,
    /// Field holding the owning organization's id, when org-ownable.
    pub org_field: Option<&'static str>,
}

/// Per-type structural schema: required fields and string bounds, checked
/// by the structural-validation stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralSchema {
    pub required_on_create: &'static [&'static str],
    /// (field, min chars, max chars)
    pub string_bounds: &'static [(&'static str, usize, usize)],
}

/// Pluggable validator for ownership-transfer-sensitive fields. Without a
/// registered validator, updates touching ownership fields are rejected.
#[async_trait]
pub trait TransferValidator: Send + Sync {
    async fn validate(
        &self,
        store: &dyn StoreClient,
        caller: &Caller,
        current: &Row,
        data: &Row,
    ) -> Result<(), ApiError>;
}

/// Batch computer for supplemental fields: one extra store read for the
/// whole id set of one type, merged back by id.
#[async_trait]
pub trait SupplementalComputer: Send + Sync {
    async fn compute(
        &self,
        store: &dyn StoreClient,
        caller: &Caller,
        ids: &[Id],
        shape: &AnnotatedShape,
    ) -> anyhow::Result<HashMap<Id, Row>>;
}

/// Static descriptor for one entity kind. Immutable after startup.
pub struct FormatConverter {
    pub object_type: ObjectType,
    /// Field name → relationship. Fields absent here and from
    /// `stored_fields` are dropped silently when translating shapes.
    pub relationships: HashMap<&'static str, Rel>,
    /// Physically stored scalar columns.
    pub stored_fields: &'static [&'static str],
    /// Fields computed post-query by the supplemental computer; never sent
    /// to the store.
    pub supplemental_fields: &'static [&'static str],
    /// (api field, relation) pairs: `commentsCount` → count of `comments`.
    pub count_fields: &'static [(&'static str, &'static str)],
    /// Free-text fields the content-safety scan always covers (e.g. handle,
    /// tag text).
    pub flagged_fields: &'static [&'static str],
    /// Whether the entity carries translation sub-objects.
    pub translated: bool,
    /// Stored field whose presence identifies this type when it appears in
    /// a polymorphic value. Union translation always selects the probe
    /// fields of every branch so discrimination never depends on what the
    /// caller happened to request.
    pub probe_field: Option<&'static str>,
    pub ownership: Option<Ownership>,
    /// Per-type override of the cardinality ceiling.
    pub max_objects: Option<u64>,
    /// Whether the type supports mutation at all.
    pub mutable: bool,
    pub schema: StructuralSchema,
    pub transfer: Option<Arc<dyn TransferValidator>>,
    pub supplemental: Option<Arc<dyn SupplementalComputer>>,
}

impl FormatConverter {
    pub fn rel(&self, field: &str) -> Option<&Rel> {
        self.relationships.get(field)
    }

    pub fn is_stored(&self, field: &str) -> bool {
        self.stored_fields.contains(&field)
    }

    pub fn is_supplemental(&self, field: &str) -> bool {
        self.supplemental_fields.contains(&field)
    }

    pub fn is_flagged(&self, field: &str) -> bool {
        self.flagged_fields.contains(&field)
    }

    /// Relation a count placeholder aggregates, if `field` is one.
    pub fn count_source(&self, field: &str) -> Option<&'static str> {
        self.count_fields
            .iter()
            .find(|(api, _)| *api == field)
            .map(|(_, rel)| *rel)
    }
}

impl std::fmt::Debug for FormatConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormatConverter")
            .field("object_type", &self.object_type)
            .field("stored_fields", &self.stored_fields)
            .field("mutable", &self.mutable)
            .finish_non_exhaustive()
    }
}

/// Immutable ObjectType → FormatConverter map, built once at startup.
pub struct TypeRegistry {
    converters: HashMap<ObjectType, FormatConverter>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        let mut converters = HashMap::new();
        for mut converter in converters::all() {
            if converter.translated {
                converter.relationships.insert("translations", Rel::Translations);
            }
            let prev = converters.insert(converter.object_type, converter);
            assert!(prev.is_none(), "duplicate converter registration");
        }
        Self { converters }
    }

    /// O(1) lookup. A miss is a programming error: registration is fixed at
    /// startup, so every ObjectType handed to the pipeline must resolve.
    pub fn get(&self, object_type: ObjectType) -> &FormatConverter {
        self.converters.get(&object_type).unwrap_or_else(|| {
            panic!("no format converter registered for {object_type}")
        })
    }

    pub fn types(&self) -> impl Iterator<Item = ObjectType> + '_ {
        self.converters.keys().copied()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_object_type_has_a_converter() {
        let registry = TypeRegistry::new();
        for ty in ObjectType::all() {
            let converter = registry.get(*ty);
            assert_eq!(converter.object_type, *ty);
            assert!(converter.is_stored("id"), "{ty} must store an id");
        }
    }

    #[test]
    fn test_count_fields_reference_relations() {
        let registry = TypeRegistry::new();
        for ty in ObjectType::all() {
            let converter = registry.get(*ty);
            for (api, rel) in converter.count_fields {
                assert!(
                    converter.rel(rel).is_some(),
                    "{ty}.{api} counts unknown relation {rel}"
                );
            }
        }
    }

    #[test]
    fn test_versioned_entity_has_root_hop() {
        let registry = TypeRegistry::new();
        let converter = registry.get(ObjectType::StandardVersion);
        assert_eq!(
            converter.rel(ROOT_FIELD),
            Some(&Rel::One(ObjectType::Standard))
        );
    }
}
