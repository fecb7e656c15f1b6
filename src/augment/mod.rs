//! Supplemental field augmentation
//!
//! Viewer-relative flags (starred/voted/role) and other non-stored fields
//! are computed after the base query, one batched extra read per distinct
//! ObjectType for the whole input set: O(1) extra round trips per type
//! per page, never O(n). Heterogeneous result sets are partitioned per
//! type; each partition is tagged with the type's short key so callers can
//! interleave results without losing per-type pagination cursors.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ApiError;
use crate::model::{id_from_value, Caller, Id, ObjectType, Row};
use crate::registry::{SupplementalComputer, TypeRegistry};
use crate::selection::{AnnotatedShape, StoreSelect};
use crate::store::{Filter, StoreClient};

/// Enrich a homogeneous set of converted response objects in place. Skips
/// the store entirely when the shape requests no supplemental fields.
pub async fn enrich(
    registry: &TypeRegistry,
    store: &dyn StoreClient,
    caller: &Caller,
    shape: &AnnotatedShape,
    objects: &mut [Row],
) -> Result<(), ApiError> {
    if objects.is_empty() || shape.supplemental_fields().is_empty() {
        return Ok(());
    }
    let converter = registry.get(shape.object_type);
    let Some(computer) = &converter.supplemental else {
        return Ok(());
    };

    let ids: Vec<Id> = objects
        .iter()
        .filter_map(|obj| obj.get("id").and_then(id_from_value))
        .collect();
    let computed = computer
        .compute(store, caller, &ids, shape)
        .await
        .map_err(ApiError::from)?;

    for obj in objects.iter_mut() {
        let Some(id) = obj.get("id").and_then(id_from_value) else {
            continue;
        };
        if let Some(extra) = computed.get(&id) {
            for (field, value) in extra {
                obj.insert(field.clone(), value.clone());
            }
        }
    }
    Ok(())
}

/// One per-type slice of a heterogeneous result set.
#[derive(Debug)]
pub struct Partition {
    /// Short type key, stable across pages.
    pub key: &'static str,
    pub object_type: ObjectType,
    pub objects: Vec<Row>,
}

/// Enrich a mixed result set (e.g. a combined feed): one partition per
/// type, per-type reads running concurrently, all complete before the
/// response is assembled.
pub async fn enrich_mixed(
    registry: &TypeRegistry,
    store: &dyn StoreClient,
    caller: &Caller,
    items: Vec<(ObjectType, Row)>,
    shapes: &HashMap<ObjectType, AnnotatedShape>,
) -> Result<Vec<Partition>, ApiError> {
    let mut partitions: BTreeMap<ObjectType, Vec<Row>> = BTreeMap::new();
    for (object_type, row) in items {
        partitions.entry(object_type).or_default().push(row);
    }

    let enriched = futures::future::try_join_all(partitions.into_iter().map(
        |(object_type, mut objects)| async move {
            if let Some(shape) = shapes.get(&object_type) {
                enrich(registry, store, caller, shape, &mut objects).await?;
            }
            Ok::<_, ApiError>((object_type, objects))
        },
    ))
    .await?;

    Ok(enriched
        .into_iter()
        .map(|(object_type, objects)| Partition {
            key: object_type.short_key(),
            object_type,
            objects,
        })
        .collect())
}

/// Standard supplemental computer: viewer star/vote state and membership
/// role, all gathered by one read of the type's own table with
/// viewer-filtered relation selects.
pub struct ViewerStateComputer {
    pub star_relation: Option<&'static str>,
    pub vote_relation: Option<&'static str>,
    pub role_relation: Option<&'static str>,
}

const STARRED_BY: &str = "starredById";
const VOTED_BY: &str = "votedById";
const MEMBER_USER: &str = "userId";

#[async_trait]
impl SupplementalComputer for ViewerStateComputer {
    async fn compute(
        &self,
        store: &dyn StoreClient,
        caller: &Caller,
        ids: &[Id],
        shape: &AnnotatedShape,
    ) -> anyhow::Result<HashMap<Id, Row>> {
        let requested = shape.supplemental_fields();
        let want_star = self.star_relation.is_some() && requested.contains(&"isStarred");
        let want_vote = self.vote_relation.is_some() && requested.contains(&"isUpvoted");
        let want_role = self.role_relation.is_some() && requested.contains(&"role");
        if !(want_star || want_vote || want_role) {
            return Ok(HashMap::new());
        }

        // Anonymous viewers get defaults without touching the store.
        let Some(viewer) = caller.id else {
            let mut out = HashMap::new();
            for id in ids {
                out.insert(*id, anonymous_defaults(want_star, want_vote, want_role));
            }
            return Ok(out);
        };
        let viewer = viewer.to_string();

        let mut select = StoreSelect::new().with_column("id");
        if want_star {
            select = select.with_filtered_relation(
                self.star_relation.unwrap_or_default(),
                StoreSelect::new().with_column("id"),
                Filter::default().with_eq(STARRED_BY, viewer.clone()),
            );
        }
        if want_vote {
            select = select.with_filtered_relation(
                self.vote_relation.unwrap_or_default(),
                StoreSelect::new().with_column("id").with_column("isUpvote"),
                Filter::default().with_eq(VOTED_BY, viewer.clone()),
            );
        }
        if want_role {
            select = select.with_filtered_relation(
                self.role_relation.unwrap_or_default(),
                StoreSelect::new()
                    .with_column("id")
                    .with_column("role")
                    .with_column("isAccepted"),
                Filter::default().with_eq(MEMBER_USER, viewer.clone()),
            );
        }

        // The single extra read for this type partition.
        let rows = store
            .find_many(shape.object_type, &Filter::ids(ids.to_vec()), &select)
            .await?;

        let mut out: HashMap<Id, Row> = HashMap::new();
        for id in ids {
            out.insert(*id, anonymous_defaults(want_star, want_vote, want_role));
        }
        for row in rows {
            let Some(id) = row.get("id").and_then(id_from_value) else {
                continue;
            };
            let mut extra = Row::new();
            if want_star {
                let starred = matches!(
                    row.get(self.star_relation.unwrap_or_default()),
                    Some(Value::Array(items)) if !items.is_empty()
                );
                extra.insert("isStarred".to_string(), Value::Bool(starred));
            }
            if want_vote {
                let vote = match row.get(self.vote_relation.unwrap_or_default()) {
                    Some(Value::Array(items)) => items
                        .first()
                        .and_then(|v| v.get("isUpvote"))
                        .cloned()
                        .unwrap_or(Value::Null),
                    _ => Value::Null,
                };
                extra.insert("isUpvoted".to_string(), vote);
            }
            if want_role {
                let role = match row.get(self.role_relation.unwrap_or_default()) {
                    Some(Value::Array(items)) => items
                        .first()
                        .and_then(|m| m.get("role"))
                        .cloned()
                        .unwrap_or(Value::Null),
                    _ => Value::Null,
                };
                extra.insert("role".to_string(), role);
            }
            out.insert(id, extra);
        }
        Ok(out)
    }
}

fn anonymous_defaults(want_star: bool, want_vote: bool, want_role: bool) -> Row {
    let mut extra = Row::new();
    if want_star {
        extra.insert("isStarred".to_string(), Value::Bool(false));
    }
    if want_vote {
        extra.insert("isUpvoted".to_string(), Value::Null);
    }
    if want_role {
        extra.insert("role".to_string(), Value::Null);
    }
    extra
}
