//! Selection translation: requested shape → store select tree → response
//!
//! `annotate` resolves the raw tree against the registry (form 1 → 2),
//! `to_store_shape` produces the store-native select (form 2 → 4), and
//! `from_row` undoes the store shaping for returned rows, restoring type
//! tags and count placeholders and leaving supplemental fields empty for
//! the augmentor.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::model::{ObjectType, Row};
use crate::registry::{Discriminator, Rel, TypeRegistry};
use crate::selection::{
    AnnotatedField, AnnotatedShape, FieldSelection, SelectionShape, StoreField, StoreSelect,
};

fn subshape(selection: &FieldSelection) -> SelectionShape {
    match selection {
        FieldSelection::Leaf => SelectionShape::new(),
        FieldSelection::Nested(shape) => shape.clone(),
    }
}

/// Form 1 → form 2: resolve every nested field to a concrete ObjectType.
/// Fields that are neither stored, supplemental, count placeholders, nor
/// relationships are dropped silently: additive-safe, never an error.
/// Recursion is bounded by the depth already enforced by the depth guard.
pub fn annotate(
    registry: &TypeRegistry,
    shape: &SelectionShape,
    object_type: ObjectType,
) -> AnnotatedShape {
    let converter = registry.get(object_type);
    let mut out = AnnotatedShape::empty(object_type);

    for (name, selection) in &shape.fields {
        if converter.is_supplemental(name) {
            out.fields.insert(name.clone(), AnnotatedField::Supplemental);
            continue;
        }
        if let Some(source) = converter.count_source(name) {
            out.fields.insert(
                name.clone(),
                AnnotatedField::Count {
                    source: source.to_string(),
                },
            );
            continue;
        }
        match converter.rel(name) {
            Some(Rel::One(to)) => {
                out.fields.insert(
                    name.clone(),
                    AnnotatedField::Object {
                        shape: annotate(registry, &subshape(selection), *to),
                        many: false,
                    },
                );
            }
            Some(Rel::Many(to)) => {
                out.fields.insert(
                    name.clone(),
                    AnnotatedField::Object {
                        shape: annotate(registry, &subshape(selection), *to),
                        many: true,
                    },
                );
            }
            Some(Rel::Joined { through, to }) => {
                out.fields.insert(
                    name.clone(),
                    AnnotatedField::Joined {
                        through: (*through).to_string(),
                        shape: annotate(registry, &subshape(selection), *to),
                    },
                );
            }
            Some(Rel::Translations) => {
                out.fields.insert(
                    name.clone(),
                    AnnotatedField::Translations(subshape(selection)),
                );
            }
            Some(Rel::Union {
                options,
                discriminate,
            }) => {
                out.fields.insert(
                    name.clone(),
                    annotate_union(registry, options, *discriminate, &subshape(selection)),
                );
            }
            None => {
                if converter.is_stored(name) {
                    out.fields.insert(name.clone(), AnnotatedField::Scalar);
                }
            }
        }
    }
    out
}

/// Union sub-selections key branch-specific fields by concrete type name
/// (inline fragments on the wire); every other key is a common field
/// applied to each branch. Each branch also selects its probe field so
/// discrimination never depends on what the caller requested.
fn annotate_union(
    registry: &TypeRegistry,
    options: &[ObjectType],
    discriminate: Discriminator,
    sub: &SelectionShape,
) -> AnnotatedField {
    let mut per_type: BTreeMap<ObjectType, SelectionShape> = BTreeMap::new();
    let mut common = SelectionShape::new();

    for (key, selection) in &sub.fields {
        if let Some(ty) = ObjectType::from_name(key) {
            if options.contains(&ty) {
                per_type.entry(ty).or_default().merge(subshape(selection));
                continue;
            }
        }
        common.fields.insert(key.clone(), selection.clone());
    }

    let mut branches = BTreeMap::new();
    for ty in options {
        let mut branch = per_type.remove(ty).unwrap_or_default();
        branch.merge(common.clone());
        if let Some(probe) = registry.get(*ty).probe_field {
            branch = branch.with_leaf(probe);
        }
        branches.insert(*ty, annotate(registry, &branch, *ty));
    }

    AnnotatedField::Union {
        branches,
        discriminate,
    }
}

/// Form 2 → form 4: strip type tags, drop supplemental fields, inject join
/// hops and the `_count` aggregate, and wrap nested objects in the store's
/// select envelope. Always selects `id`.
pub fn to_store_shape(annotated: &AnnotatedShape) -> StoreSelect {
    let mut select = StoreSelect::new().with_column("id");
    let mut counts = StoreSelect::new();

    for (name, field) in &annotated.fields {
        match field {
            AnnotatedField::Scalar => {
                select.fields.insert(name.clone(), StoreField::Column);
            }
            AnnotatedField::Object { shape, .. } => {
                select.fields.insert(
                    name.clone(),
                    StoreField::Relation {
                        select: to_store_shape(shape),
                        filter: None,
                    },
                );
            }
            AnnotatedField::Joined { through, shape } => {
                let join = StoreSelect::new()
                    .with_column("id")
                    .with_relation(through.clone(), to_store_shape(shape));
                select.fields.insert(
                    name.clone(),
                    StoreField::Relation {
                        select: join,
                        filter: None,
                    },
                );
            }
            AnnotatedField::Translations(sub) => {
                select.fields.insert(
                    name.clone(),
                    StoreField::Relation {
                        select: translations_select(sub),
                        filter: None,
                    },
                );
            }
            AnnotatedField::Union { branches, .. } => {
                let mut merged = StoreSelect::new();
                for branch in branches.values() {
                    merged.merge(to_store_shape(branch));
                }
                select.fields.insert(
                    name.clone(),
                    StoreField::Relation {
                        select: merged,
                        filter: None,
                    },
                );
            }
            AnnotatedField::Count { source } => {
                counts.fields.insert(source.clone(), StoreField::Column);
            }
            AnnotatedField::Supplemental => {}
        }
    }

    if !counts.fields.is_empty() {
        select.fields.insert(
            "_count".to_string(),
            StoreField::Relation {
                select: counts,
                filter: None,
            },
        );
    }
    select
}

fn translations_select(sub: &SelectionShape) -> StoreSelect {
    let mut select = StoreSelect::new().with_column("id").with_column("language");
    for (name, selection) in &sub.fields {
        if matches!(selection, FieldSelection::Leaf) {
            select.fields.insert(name.clone(), StoreField::Column);
        }
    }
    select
}

/// Inverse of `to_store_shape` for one returned row: removes join-table
/// envelope levels, restores count fields as integers and `__typename`
/// tags, and leaves supplemental fields empty for later enrichment.
pub fn from_row(row: &Row, annotated: &AnnotatedShape) -> Row {
    let mut out = Row::new();
    out.insert(
        "__typename".to_string(),
        Value::String(annotated.object_type.as_str().to_string()),
    );
    if let Some(id) = row.get("id") {
        out.insert("id".to_string(), id.clone());
    }

    for (name, field) in &annotated.fields {
        match field {
            AnnotatedField::Scalar => {
                if let Some(value) = row.get(name) {
                    out.insert(name.clone(), value.clone());
                }
            }
            AnnotatedField::Object { shape, .. } => match row.get(name) {
                Some(Value::Array(items)) => {
                    let converted: Vec<Value> = items
                        .iter()
                        .filter_map(|item| item.as_object())
                        .map(|obj| Value::Object(from_row(obj, shape)))
                        .collect();
                    out.insert(name.clone(), Value::Array(converted));
                }
                Some(Value::Object(obj)) => {
                    out.insert(name.clone(), Value::Object(from_row(obj, shape)));
                }
                Some(Value::Null) => {
                    out.insert(name.clone(), Value::Null);
                }
                _ => {}
            },
            AnnotatedField::Joined { through, shape } => {
                if let Some(Value::Array(items)) = row.get(name) {
                    let unwrapped: Vec<Value> = items
                        .iter()
                        .filter_map(|item| item.as_object())
                        .filter_map(|join_row| join_row.get(through))
                        .filter_map(|child| child.as_object())
                        .map(|child| Value::Object(from_row(child, shape)))
                        .collect();
                    out.insert(name.clone(), Value::Array(unwrapped));
                }
            }
            AnnotatedField::Translations(sub) => {
                if let Some(Value::Array(items)) = row.get(name) {
                    let filtered: Vec<Value> = items
                        .iter()
                        .filter_map(|item| item.as_object())
                        .map(|translation| {
                            Value::Object(filter_translation(translation, sub))
                        })
                        .collect();
                    out.insert(name.clone(), Value::Array(filtered));
                }
            }
            AnnotatedField::Union {
                branches,
                discriminate,
            } => match row.get(name) {
                Some(Value::Array(items)) => {
                    let converted: Vec<Value> = items
                        .iter()
                        .filter_map(|item| item.as_object())
                        .map(|obj| resolve_union(obj, branches, *discriminate))
                        .collect();
                    out.insert(name.clone(), Value::Array(converted));
                }
                Some(Value::Object(obj)) => {
                    out.insert(name.clone(), resolve_union(obj, branches, *discriminate));
                }
                Some(Value::Null) => {
                    out.insert(name.clone(), Value::Null);
                }
                _ => {}
            },
            AnnotatedField::Count { source } => {
                let count = row
                    .get("_count")
                    .and_then(|counts| counts.get(source))
                    .cloned()
                    .unwrap_or(Value::Number(0.into()));
                out.insert(name.clone(), count);
            }
            AnnotatedField::Supplemental => {
                out.insert(name.clone(), Value::Null);
            }
        }
    }
    out
}

fn filter_translation(translation: &Row, sub: &SelectionShape) -> Row {
    let mut out = Row::new();
    for key in ["id", "language"] {
        if let Some(value) = translation.get(key) {
            out.insert(key.to_string(), value.clone());
        }
    }
    for (name, selection) in &sub.fields {
        if matches!(selection, FieldSelection::Leaf) {
            if let Some(value) = translation.get(name) {
                out.insert(name.clone(), value.clone());
            }
        }
    }
    out
}

fn resolve_union(
    obj: &Row,
    branches: &BTreeMap<ObjectType, AnnotatedShape>,
    discriminate: Discriminator,
) -> Value {
    match discriminate(obj).and_then(|ty| branches.get(&ty)) {
        Some(branch) => Value::Object(from_row(obj, branch)),
        None => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TypeRegistry;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn registry() -> TypeRegistry {
        TypeRegistry::new()
    }

    fn project_shape() -> SelectionShape {
        SelectionShape::from_value(&json!({
            "id": true,
            "handle": true,
            "isStarred": true,
            "commentsCount": true,
            "tags": { "tag": true },
            "translations": { "name": true },
            "bogusField": true
        }))
    }

    #[test]
    fn test_translation_is_pure() {
        let registry = registry();
        let shape = project_shape();
        let a = to_store_shape(&annotate(&registry, &shape, ObjectType::Project));
        let b = to_store_shape(&annotate(&registry, &shape, ObjectType::Project));
        assert_eq!(a, b);
    }

    #[test]
    fn test_store_shape_drops_virtual_fields() {
        let registry = registry();
        let annotated = annotate(&registry, &project_shape(), ObjectType::Project);
        let select = to_store_shape(&annotated);

        // Supplemental and unknown fields never reach the store.
        assert!(!select.fields.contains_key("isStarred"));
        assert!(!select.fields.contains_key("bogusField"));
        // The count placeholder becomes a _count aggregate.
        assert!(!select.fields.contains_key("commentsCount"));
        assert!(matches!(
            select.fields.get("_count"),
            Some(StoreField::Relation { select, .. }) if select.fields.contains_key("comments")
        ));
        // The join hop is injected under the public field name.
        match select.fields.get("tags") {
            Some(StoreField::Relation { select, .. }) => {
                assert!(matches!(
                    select.fields.get("tag"),
                    Some(StoreField::Relation { .. })
                ));
            }
            other => panic!("tags should be a relation, got {other:?}"),
        }
    }

    #[test]
    fn test_from_row_restores_requested_fields() {
        let registry = registry();
        let annotated = annotate(&registry, &project_shape(), ObjectType::Project);

        let row = json!({
            "id": "5f2e1b74-3e7e-4a3b-9f6a-111111111111",
            "handle": "atlas",
            "_count": { "comments": 3 },
            "tags": [ { "id": "j1", "tag": { "id": "5f2e1b74-3e7e-4a3b-9f6a-222222222222", "tag": "science" } } ],
            "translations": [ { "id": "t1", "language": "en", "name": "Atlas", "description": "hidden" } ]
        });
        let row = row.as_object().unwrap().clone();
        let out = from_row(&row, &annotated);

        assert_eq!(out.get("__typename"), Some(&json!("Project")));
        assert_eq!(out.get("handle"), Some(&json!("atlas")));
        assert_eq!(out.get("commentsCount"), Some(&json!(3)));
        // Join envelope removed: tags are bare tag objects.
        assert_eq!(
            out.get("tags").and_then(|t| t.get(0)).and_then(|t| t.get("tag")),
            Some(&json!("science"))
        );
        // Translations filtered to the requested leaves.
        let translation = out.get("translations").and_then(|t| t.get(0)).unwrap();
        assert_eq!(translation.get("name"), Some(&json!("Atlas")));
        assert_eq!(translation.get("description"), None);
        // Supplemental left empty for the augmentor.
        assert_eq!(out.get("isStarred"), Some(&Value::Null));
    }

    #[test]
    fn test_versioned_entities_reach_root_table_fields() {
        let registry = registry();
        let shape = SelectionShape::from_value(&json!({
            "id": true,
            "versionIndex": true,
            "root": { "name": true }
        }));
        let annotated = annotate(&registry, &shape, ObjectType::StandardVersion);
        let select = to_store_shape(&annotated);
        assert!(matches!(
            select.fields.get("root"),
            Some(StoreField::Relation { select, .. }) if select.fields.contains_key("name")
        ));

        let row = json!({
            "id": "5f2e1b74-3e7e-4a3b-9f6a-555555555555",
            "versionIndex": 3,
            "root": { "id": "5f2e1b74-3e7e-4a3b-9f6a-666666666666", "name": "CSV schema" }
        });
        let out = from_row(row.as_object().unwrap(), &annotated);
        assert_eq!(
            out.get("root").and_then(|r| r.get("name")),
            Some(&json!("CSV schema"))
        );
        assert_eq!(
            out.get("root").and_then(|r| r.get("__typename")),
            Some(&json!("Standard"))
        );
    }

    #[test]
    fn test_union_discrimination_restores_type_tags() {
        let registry = registry();
        let shape = SelectionShape::from_value(&json!({
            "id": true,
            "owner": {
                "id": true,
                "User": { "name": true },
                "Organization": { "handle": true }
            }
        }));
        let annotated = annotate(&registry, &shape, ObjectType::Project);

        let as_org = json!({
            "id": "5f2e1b74-3e7e-4a3b-9f6a-333333333333",
            "owner": { "id": "o1", "handle": "guild", "isOpenToNewMembers": true }
        });
        let out = from_row(as_org.as_object().unwrap(), &annotated);
        assert_eq!(
            out.get("owner").and_then(|o| o.get("__typename")),
            Some(&json!("Organization"))
        );

        let as_user = json!({
            "id": "5f2e1b74-3e7e-4a3b-9f6a-444444444444",
            "owner": { "id": "u1", "name": "Ada" }
        });
        let out = from_row(as_user.as_object().unwrap(), &annotated);
        assert_eq!(
            out.get("owner").and_then(|o| o.get("__typename")),
            Some(&json!("User"))
        );
    }
}
