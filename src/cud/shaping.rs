//! Stage 5: payload shaping
//!
//! Converts API payloads into store-native write payloads: relation keys
//! (`…Create` / `…Connect` / `…Disconnect` / `…Update`) become nested write
//! ops, join-table hops are wrapped in, supplemental and unknown fields are
//! dropped, and every to-be-created object gets an id up front so later
//! batch items can reference earlier ones.
//!
//! Declared tag creates are rewritten into connects when a tag with the
//! same text already exists, resolved with one batched lookup per batch.
//! Shaped creates are ordered so items referencing other items' ids execute
//! after them.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::Value;
use uuid::Uuid;

use crate::cud::CudContext;
use crate::error::ApiError;
use crate::model::{id_from_value, Caller, Id, ObjectType, Row};
use crate::registry::{FormatConverter, Rel, TypeRegistry};
use crate::selection::StoreSelect;
use crate::store::{Filter, StoreClient};

pub(crate) async fn run(cx: &mut CudContext) -> Result<(), ApiError> {
    let converter = cx.registry.get(cx.batch.object_type);

    let tag_names = collect_tag_names(converter, &cx.batch);
    let tags_by_name = resolve_tags(cx.store.as_ref(), tag_names).await?;

    let mut shaped = Vec::with_capacity(cx.batch.create.len());
    for data in &cx.batch.create {
        shaped.push(shape_write(
            &cx.registry,
            converter,
            data.clone(),
            &tags_by_name,
            &cx.caller,
            true,
        ));
    }
    cx.shaped_creates = order_by_references(shaped);

    for item in &cx.batch.update {
        let data = shape_write(
            &cx.registry,
            converter,
            item.data.clone(),
            &tags_by_name,
            &cx.caller,
            false,
        );
        cx.shaped_updates.push((item.id, data));
    }
    Ok(())
}

/// All tag texts a batch connects or creates, for the one batched lookup.
fn collect_tag_names(converter: &FormatConverter, batch: &crate::cud::MutationBatch) -> Vec<String> {
    let mut names = HashSet::new();
    let payloads = batch
        .create
        .iter()
        .chain(batch.update.iter().map(|item| &item.data));
    for data in payloads {
        for (key, value) in data {
            let Some(base) = key
                .strip_suffix("Connect")
                .or_else(|| key.strip_suffix("Create"))
            else {
                continue;
            };
            if !matches!(converter.rel(base), Some(Rel::Joined { to: ObjectType::Tag, .. })) {
                continue;
            }
            if let Value::Array(items) = value {
                for item in items {
                    match item {
                        Value::String(name) if id_from_value(item).is_none() => {
                            names.insert(name.clone());
                        }
                        Value::Object(obj) => {
                            if let Some(Value::String(name)) = obj.get("tag") {
                                names.insert(name.clone());
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
    }
    names.into_iter().collect()
}

async fn resolve_tags(
    store: &dyn StoreClient,
    names: Vec<String>,
) -> Result<HashMap<String, Id>, ApiError> {
    if names.is_empty() {
        return Ok(HashMap::new());
    }
    let select = StoreSelect::new().with_column("id").with_column("tag");
    let rows = store
        .find_many(
            ObjectType::Tag,
            &Filter::default().with_any("tag", names.into_iter().map(Value::String)),
            &select,
        )
        .await
        .map_err(ApiError::from)?;
    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let id = row.get("id").and_then(id_from_value)?;
            let name = row.get("tag")?.as_str()?.to_string();
            Some((name, id))
        })
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpKind {
    Create,
    Connect,
    Disconnect,
    Update,
}

fn op_kind(key: &str) -> Option<(&str, OpKind)> {
    if let Some(base) = key.strip_suffix("Disconnect") {
        return Some((base, OpKind::Disconnect));
    }
    if let Some(base) = key.strip_suffix("Connect") {
        return Some((base, OpKind::Connect));
    }
    if let Some(base) = key.strip_suffix("Create") {
        return Some((base, OpKind::Create));
    }
    if let Some(base) = key.strip_suffix("Update") {
        return Some((base, OpKind::Update));
    }
    None
}

/// Shape one create/update payload. `is_create` controls id injection and
/// which nested ops are meaningful.
fn shape_write(
    registry: &TypeRegistry,
    converter: &FormatConverter,
    data: Row,
    tags_by_name: &HashMap<String, Id>,
    caller: &Caller,
    is_create: bool,
) -> Row {
    let mut out = Row::new();
    if is_create {
        let id = data
            .get("id")
            .and_then(id_from_value)
            .unwrap_or_else(Uuid::new_v4);
        out.insert("id".to_string(), Value::String(id.to_string()));

        // The caller becomes the user owner unless the payload declares one
        // (a declared owner was already authorized by the ownership stage).
        if let Some(user_field) = converter.ownership.and_then(|own| own.user_field) {
            if user_field != "id" && !data.contains_key(user_field) {
                if let Some(caller_id) = caller.id {
                    out.insert(
                        user_field.to_string(),
                        Value::String(caller_id.to_string()),
                    );
                }
            }
        }
    }

    // Relation ops may arrive under several keys (tagsCreate + tagsConnect);
    // group them per base relation first.
    let mut relation_ops: BTreeMap<String, Vec<(OpKind, Value)>> = BTreeMap::new();

    for (key, value) in data {
        if key == "id" {
            continue;
        }
        if converter.is_supplemental(&key) || converter.count_source(&key).is_some() {
            continue;
        }
        if let Some((base, kind)) = op_kind(&key) {
            if converter.rel(base).is_some() {
                relation_ops
                    .entry(base.to_string())
                    .or_default()
                    .push((kind, value));
                continue;
            }
        }
        if converter.is_stored(&key) {
            out.insert(key, value);
        }
        // Everything else is dropped silently.
    }

    for (base, ops) in relation_ops {
        let Some(rel) = converter.rel(&base) else {
            continue;
        };
        match *rel {
            Rel::Translations => {
                out.insert(base, translations_op(ops));
            }
            Rel::Joined { through, to } => {
                out.insert(
                    base,
                    joined_op(registry, through, to, ops, tags_by_name, caller),
                );
            }
            Rel::One(to) => {
                if let Some(op) = one_op(registry, to, ops, tags_by_name, caller) {
                    out.insert(base, op);
                }
            }
            Rel::Many(to) => {
                out.insert(base, many_op(registry, to, ops, tags_by_name, caller));
            }
            // Polymorphic owners are set through their scalar foreign keys.
            Rel::Union { .. } => {}
        }
    }
    out
}

fn ensure_ids(items: &[Value]) -> Vec<Value> {
    items
        .iter()
        .filter_map(|item| item.as_object())
        .map(|obj| {
            let mut obj = obj.clone();
            if obj.get("id").and_then(id_from_value).is_none() {
                obj.insert("id".to_string(), Value::String(Uuid::new_v4().to_string()));
            }
            Value::Object(obj)
        })
        .collect()
}

fn translations_op(ops: Vec<(OpKind, Value)>) -> Value {
    let mut op = Row::new();
    for (kind, value) in ops {
        let Value::Array(items) = value else { continue };
        match kind {
            OpKind::Create => {
                op.insert("create".to_string(), Value::Array(ensure_ids(&items)));
            }
            OpKind::Update => {
                op.insert("update".to_string(), Value::Array(items));
            }
            OpKind::Disconnect => {
                op.insert("disconnect".to_string(), Value::Array(items));
            }
            OpKind::Connect => {}
        }
    }
    Value::Object(op)
}

/// Join-table ops: wrap every element under the join hop. Tag creates whose
/// text matches an existing tag become connects instead of duplicates; tag
/// connects by name resolve to ids or fall back to fresh creates.
fn joined_op(
    registry: &TypeRegistry,
    through: &str,
    to: ObjectType,
    ops: Vec<(OpKind, Value)>,
    tags_by_name: &HashMap<String, Id>,
    caller: &Caller,
) -> Value {
    let child = registry.get(to);
    let mut created = Vec::new();
    let mut disconnected = Vec::new();

    for (kind, value) in ops {
        let Value::Array(items) = value else { continue };
        match kind {
            OpKind::Connect => {
                for item in items {
                    let inner = match &item {
                        Value::String(text) => match id_from_value(&item) {
                            Some(id) => connect_ref(id),
                            None => match tags_by_name.get(text) {
                                Some(id) => connect_ref(*id),
                                None if to == ObjectType::Tag => {
                                    create_tag(text, caller)
                                }
                                None => continue,
                            },
                        },
                        Value::Object(obj) => match obj.get("id").and_then(id_from_value) {
                            Some(id) => connect_ref(id),
                            None => continue,
                        },
                        _ => continue,
                    };
                    created.push(wrap_join(through, inner));
                }
            }
            OpKind::Create => {
                for item in &items {
                    let Some(obj) = item.as_object() else { continue };
                    let existing = obj
                        .get("tag")
                        .and_then(|t| t.as_str())
                        .and_then(|name| tags_by_name.get(name));
                    let inner = match existing {
                        // Connect to the existing row instead of duplicating it.
                        Some(id) if to == ObjectType::Tag => connect_ref(*id),
                        _ => {
                            let shaped = shape_write(
                                registry,
                                child,
                                obj.clone(),
                                tags_by_name,
                                caller,
                                true,
                            );
                            let mut op = Row::new();
                            op.insert("create".to_string(), Value::Object(shaped));
                            Value::Object(op)
                        }
                    };
                    created.push(wrap_join(through, inner));
                }
            }
            OpKind::Disconnect => {
                for item in items {
                    if let Some(id) = id_from_value(&item).or_else(|| {
                        item.get("id").and_then(id_from_value)
                    }) {
                        let mut reference = Row::new();
                        reference.insert("id".to_string(), Value::String(id.to_string()));
                        disconnected.push(Value::Object(reference));
                    }
                }
            }
            OpKind::Update => {}
        }
    }

    let mut op = Row::new();
    if !created.is_empty() {
        op.insert("create".to_string(), Value::Array(created));
    }
    if !disconnected.is_empty() {
        op.insert("disconnect".to_string(), Value::Array(disconnected));
    }
    Value::Object(op)
}

fn connect_ref(id: Id) -> Value {
    let mut reference = Row::new();
    reference.insert("id".to_string(), Value::String(id.to_string()));
    let mut op = Row::new();
    op.insert("connect".to_string(), Value::Object(reference));
    Value::Object(op)
}

fn create_tag(text: &str, caller: &Caller) -> Value {
    let mut tag = Row::new();
    tag.insert("id".to_string(), Value::String(Uuid::new_v4().to_string()));
    tag.insert("tag".to_string(), Value::String(text.to_string()));
    if let Some(caller_id) = caller.id {
        tag.insert(
            "createdById".to_string(),
            Value::String(caller_id.to_string()),
        );
    }
    let mut op = Row::new();
    op.insert("create".to_string(), Value::Object(tag));
    Value::Object(op)
}

fn wrap_join(through: &str, inner: Value) -> Value {
    let mut join_row = Row::new();
    join_row.insert(through.to_string(), inner);
    Value::Object(join_row)
}

fn one_op(
    registry: &TypeRegistry,
    to: ObjectType,
    ops: Vec<(OpKind, Value)>,
    tags_by_name: &HashMap<String, Id>,
    caller: &Caller,
) -> Option<Value> {
    let child = registry.get(to);
    for (kind, value) in ops {
        match kind {
            OpKind::Connect => {
                let id = id_from_value(&value)
                    .or_else(|| value.get("id").and_then(id_from_value))?;
                let mut reference = Row::new();
                reference.insert("id".to_string(), Value::String(id.to_string()));
                let mut op = Row::new();
                op.insert("connect".to_string(), Value::Object(reference));
                return Some(Value::Object(op));
            }
            OpKind::Create => {
                let obj = value.as_object()?;
                let shaped =
                    shape_write(registry, child, obj.clone(), tags_by_name, caller, true);
                let mut op = Row::new();
                op.insert("create".to_string(), Value::Object(shaped));
                return Some(Value::Object(op));
            }
            OpKind::Disconnect | OpKind::Update => {}
        }
    }
    None
}

fn many_op(
    registry: &TypeRegistry,
    to: ObjectType,
    ops: Vec<(OpKind, Value)>,
    tags_by_name: &HashMap<String, Id>,
    caller: &Caller,
) -> Value {
    let child = registry.get(to);
    let mut created = Vec::new();
    let mut connected = Vec::new();
    let mut disconnected = Vec::new();

    for (kind, value) in ops {
        let Value::Array(items) = value else { continue };
        match kind {
            OpKind::Create => {
                for item in &items {
                    if let Some(obj) = item.as_object() {
                        created.push(Value::Object(shape_write(
                            registry,
                            child,
                            obj.clone(),
                            tags_by_name,
                            caller,
                            true,
                        )));
                    }
                }
            }
            OpKind::Connect => {
                for item in items {
                    if let Some(id) = id_from_value(&item)
                        .or_else(|| item.get("id").and_then(id_from_value))
                    {
                        let mut reference = Row::new();
                        reference.insert("id".to_string(), Value::String(id.to_string()));
                        connected.push(Value::Object(reference));
                    }
                }
            }
            OpKind::Disconnect => {
                for item in items {
                    if let Some(id) = id_from_value(&item)
                        .or_else(|| item.get("id").and_then(id_from_value))
                    {
                        let mut reference = Row::new();
                        reference.insert("id".to_string(), Value::String(id.to_string()));
                        disconnected.push(Value::Object(reference));
                    }
                }
            }
            OpKind::Update => {}
        }
    }

    let mut op = Row::new();
    if !created.is_empty() {
        op.insert("create".to_string(), Value::Array(created));
    }
    if !connected.is_empty() {
        op.insert("connect".to_string(), Value::Array(connected));
    }
    if !disconnected.is_empty() {
        op.insert("disconnect".to_string(), Value::Array(disconnected));
    }
    Value::Object(op)
}

/// Order batch creates so that items referencing another item's id execute
/// after it. Every to-be-created object already carries its id, so
/// references are plain id values anywhere in the payload. Cycles keep
/// their original order; the store sees them as-is.
fn order_by_references(items: Vec<Row>) -> Vec<Row> {
    if items.len() < 2 {
        return items;
    }
    let ids: Vec<Option<Id>> = items
        .iter()
        .map(|item| item.get("id").and_then(id_from_value))
        .collect();
    let id_set: HashSet<Id> = ids.iter().flatten().copied().collect();

    let references: Vec<HashSet<Id>> = items
        .iter()
        .zip(&ids)
        .map(|(item, own)| {
            let mut refs = HashSet::new();
            collect_id_references(&Value::Object(item.clone()), &id_set, &mut refs);
            if let Some(own) = own {
                refs.remove(own);
            }
            refs
        })
        .collect();

    let mut placed: HashSet<Id> = HashSet::new();
    let mut remaining: Vec<usize> = (0..items.len()).collect();
    let mut order = Vec::with_capacity(items.len());
    while !remaining.is_empty() {
        let next = remaining.iter().position(|&i| {
            references[i]
                .iter()
                .all(|referenced| placed.contains(referenced) || Some(*referenced) == ids[i])
        });
        match next {
            Some(position) => {
                let index = remaining.remove(position);
                if let Some(id) = ids[index] {
                    placed.insert(id);
                }
                order.push(index);
            }
            None => {
                // Mutually-referential remainder: preserve original order.
                tracing::debug!(
                    remaining = remaining.len(),
                    "cyclic references in create batch; keeping request order"
                );
                order.extend(remaining.drain(..));
            }
        }
    }

    let mut slots: Vec<Option<Row>> = items.into_iter().map(Some).collect();
    order
        .into_iter()
        .filter_map(|index| slots[index].take())
        .collect()
}

fn collect_id_references(value: &Value, ids: &HashSet<Id>, out: &mut HashSet<Id>) {
    match value {
        Value::String(_) => {
            if let Some(id) = id_from_value(value) {
                if ids.contains(&id) {
                    out.insert(id);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_id_references(item, ids, out);
            }
        }
        Value::Object(obj) => {
            for field in obj.values() {
                collect_id_references(field, ids, out);
            }
        }
        _ => {}
    }
}
