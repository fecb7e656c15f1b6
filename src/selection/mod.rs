//! Selection shapes: the four progressive forms of a field-selection tree
//!
//! A request travels through four forms on the read path:
//!
//! 1. [`SelectionShape`]: the raw requested field tree,
//! 2. [`AnnotatedShape`]: every nested object resolved to a concrete
//!    [`ObjectType`] via the registry's relationship maps,
//! 3. / 4. [`StoreSelect`]: type tags stripped, join tables and count
//!    placeholders adjusted, every nested object wrapped in the store's
//!    native select envelope.
//!
//! [`translate::from_row`] undoes forms 3–1 for rows coming back.
//! Shapes are created per request and discarded with the response.

pub mod translate;

use std::collections::BTreeMap;

use serde_json::Value;

use crate::model::ObjectType;
use crate::registry::Discriminator;
use crate::store::Filter;

pub use translate::{annotate, from_row, to_store_shape};

/// Form 1: the raw requested field tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionShape {
    pub fields: BTreeMap<String, FieldSelection>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldSelection {
    Leaf,
    Nested(SelectionShape),
}

impl SelectionShape {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn with_leaf(mut self, name: impl Into<String>) -> Self {
        self.fields.insert(name.into(), FieldSelection::Leaf);
        self
    }

    pub fn with_nested(mut self, name: impl Into<String>, shape: SelectionShape) -> Self {
        self.fields.insert(name.into(), FieldSelection::Nested(shape));
        self
    }

    /// Merge another shape into this one at the same level; nested shapes
    /// under the same key are merged recursively. Used when fragment
    /// spreads fold into the surrounding selection.
    pub fn merge(&mut self, other: SelectionShape) {
        for (name, incoming) in other.fields {
            match self.fields.get_mut(&name) {
                None => {
                    self.fields.insert(name, incoming);
                }
                Some(existing) => match (existing, incoming) {
                    (FieldSelection::Nested(a), FieldSelection::Nested(b)) => a.merge(b),
                    // A leaf widened by a nested selection takes the nested form.
                    (existing @ FieldSelection::Leaf, incoming @ FieldSelection::Nested(_)) => {
                        *existing = incoming;
                    }
                    _ => {}
                },
            }
        }
    }

    /// Build a shape from JSON: `true` marks a leaf, an object marks a
    /// nested selection. Anything else is ignored.
    pub fn from_value(value: &Value) -> SelectionShape {
        let mut shape = SelectionShape::new();
        if let Value::Object(map) = value {
            for (name, entry) in map {
                match entry {
                    Value::Bool(true) => {
                        shape.fields.insert(name.clone(), FieldSelection::Leaf);
                    }
                    Value::Object(_) => {
                        shape.fields.insert(
                            name.clone(),
                            FieldSelection::Nested(SelectionShape::from_value(entry)),
                        );
                    }
                    _ => {}
                }
            }
        }
        shape
    }
}

/// Form 2: every nested object carries its resolved ObjectType.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedShape {
    pub object_type: ObjectType,
    pub fields: BTreeMap<String, AnnotatedField>,
}

impl AnnotatedShape {
    pub fn empty(object_type: ObjectType) -> Self {
        Self {
            object_type,
            fields: BTreeMap::new(),
        }
    }

    /// Names of the supplemental fields this shape requests.
    pub fn supplemental_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, f)| matches!(f, AnnotatedField::Supplemental))
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnnotatedField {
    /// Physically stored scalar column.
    Scalar,
    /// Relation to one concrete type.
    Object { shape: AnnotatedShape, many: bool },
    /// Many-to-many relation through a join row; `through` is the join-row
    /// field holding the real child.
    Joined { through: String, shape: AnnotatedShape },
    /// Translation sub-objects, carried structurally without a type tag.
    Translations(SelectionShape),
    /// Polymorphic field: one sub-selection per possible concrete type.
    Union {
        branches: BTreeMap<ObjectType, AnnotatedShape>,
        discriminate: Discriminator,
    },
    /// Count placeholder aggregating the named relation.
    Count { source: String },
    /// Not physically stored; filled in by the augmentor after the query.
    Supplemental,
}

/// Forms 3–4: the store-native select tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSelect {
    pub fields: BTreeMap<String, StoreField>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreField {
    Column,
    Relation {
        select: StoreSelect,
        /// Row-level filter on the related rows, used by supplemental
        /// computers (e.g. stars restricted to the viewer).
        filter: Option<Filter>,
    },
}

impl StoreSelect {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_column(mut self, name: impl Into<String>) -> Self {
        self.fields.insert(name.into(), StoreField::Column);
        self
    }

    pub fn with_relation(mut self, name: impl Into<String>, select: StoreSelect) -> Self {
        self.fields.insert(
            name.into(),
            StoreField::Relation {
                select,
                filter: None,
            },
        );
        self
    }

    pub fn with_filtered_relation(
        mut self,
        name: impl Into<String>,
        select: StoreSelect,
        filter: Filter,
    ) -> Self {
        self.fields.insert(
            name.into(),
            StoreField::Relation {
                select,
                filter: Some(filter),
            },
        );
        self
    }

    /// Merge another select into this one; overlapping relations merge
    /// recursively. Used when union branches share the select envelope.
    pub fn merge(&mut self, other: StoreSelect) {
        for (name, incoming) in other.fields {
            match (self.fields.get_mut(&name), incoming) {
                (
                    Some(StoreField::Relation { select: existing, .. }),
                    StoreField::Relation { select, .. },
                ) => existing.merge(select),
                (Some(_), _) => {}
                (None, incoming) => {
                    self.fields.insert(name, incoming);
                }
            }
        }
    }

    /// Debug/wire rendering under the store's `select` envelope.
    pub fn to_value(&self) -> Value {
        let mut select = serde_json::Map::new();
        for (name, field) in &self.fields {
            match field {
                StoreField::Column => {
                    select.insert(name.clone(), Value::Bool(true));
                }
                StoreField::Relation { select: child, .. } => {
                    select.insert(name.clone(), child.to_value());
                }
            }
        }
        let mut envelope = serde_json::Map::new();
        envelope.insert("select".to_string(), Value::Object(select));
        Value::Object(envelope)
    }
}
