//! In-memory store client
//!
//! Interprets store-native select trees and nested write ops over
//! materialized JSON rows. Backs the dev server and the test suite; a real
//! deployment substitutes a client for the platform's relational store.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::model::{id_from_value, Id, ObjectType, Row};
use crate::registry::{Rel, TypeRegistry};
use crate::selection::{StoreField, StoreSelect};
use crate::store::{Filter, StoreClient};

type Tables = HashMap<ObjectType, BTreeMap<Id, Row>>;

pub struct MemoryStore {
    registry: Arc<TypeRegistry>,
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            tables: RwLock::new(Tables::new()),
        }
    }

    /// Insert a fully-materialized row, for seeding fixtures. The row must
    /// carry an `id`.
    pub fn insert_raw(&self, object_type: ObjectType, row: Row) -> Id {
        let id = row
            .get("id")
            .and_then(id_from_value)
            .expect("seed rows must carry an id");
        self.tables
            .write()
            .entry(object_type)
            .or_default()
            .insert(id, row);
        id
    }

    /// Snapshot of one row, for assertions in tests.
    pub fn raw(&self, object_type: ObjectType, id: Id) -> Option<Row> {
        self.tables
            .read()
            .get(&object_type)
            .and_then(|table| table.get(&id))
            .cloned()
    }

    pub fn len(&self, object_type: ObjectType) -> usize {
        self.tables
            .read()
            .get(&object_type)
            .map(|table| table.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, object_type: ObjectType) -> bool {
        self.len(object_type) == 0
    }

    fn is_write_op(value: &Value) -> bool {
        value.as_object().is_some_and(|obj| {
            obj.keys()
                .any(|k| matches!(k.as_str(), "create" | "connect" | "disconnect" | "update"))
        })
    }

    fn connected_copy(tables: &Tables, to: ObjectType, reference: &Value) -> Value {
        let id = reference
            .get("id")
            .and_then(id_from_value)
            .or_else(|| id_from_value(reference));
        match id {
            Some(id) => tables
                .get(&to)
                .and_then(|table| table.get(&id))
                .map(|row| Value::Object(row.clone()))
                .unwrap_or_else(|| {
                    let mut stub = Row::new();
                    stub.insert("id".to_string(), Value::String(id.to_string()));
                    Value::Object(stub)
                }),
            None => Value::Null,
        }
    }

    /// Resolve one nested write op against a child type: created children
    /// are materialized and inserted into their own table (with the parent
    /// foreign key wired up when the child stores one), connected children
    /// are copied in place.
    fn resolve_children(
        &self,
        tables: &mut Tables,
        to: ObjectType,
        op: &Row,
        parent: Option<(ObjectType, &Value)>,
    ) -> Vec<Value> {
        let mut out = Vec::new();
        if let Some(created) = op.get("create") {
            let items: Vec<&Value> = match created {
                Value::Array(items) => items.iter().collect(),
                single => vec![single],
            };
            for item in items {
                if let Value::Object(child) = item {
                    let mut child = child.clone();
                    if let Some((parent_type, parent_id)) = parent {
                        let fk = format!("{}Id", parent_type.camel());
                        if self.registry.get(to).is_stored(&fk) && !child.contains_key(&fk) {
                            child.insert(fk, parent_id.clone());
                        }
                    }
                    let materialized = self.materialize(tables, to, child);
                    if let Some(id) = materialized.get("id").and_then(id_from_value) {
                        tables.entry(to).or_default().insert(id, materialized.clone());
                    }
                    out.push(Value::Object(materialized));
                }
            }
        }
        if let Some(connected) = op.get("connect") {
            let items: Vec<&Value> = match connected {
                Value::Array(items) => items.iter().collect(),
                single => vec![single],
            };
            for item in items {
                out.push(Self::connected_copy(tables, to, item));
            }
        }
        out
    }

    /// Turn a store-native write payload into a materialized row, inserting
    /// any nested creates into their own tables.
    fn materialize(&self, tables: &mut Tables, object_type: ObjectType, data: Row) -> Row {
        let converter = self.registry.get(object_type);
        let own_id = data.get("id").cloned().unwrap_or(Value::Null);
        let mut row = Row::new();

        for (key, value) in data {
            let rel = converter.rel(&key).copied();
            match rel {
                Some(_) if !Self::is_write_op(&value) => {
                    // Pre-materialized relation data (seed path).
                    row.insert(key, value);
                }
                Some(Rel::One(to)) => {
                    if let Value::Object(op) = &value {
                        let children = self.resolve_children(tables, to, op, None);
                        row.insert(key, children.into_iter().next().unwrap_or(Value::Null));
                    }
                }
                Some(Rel::Many(to)) => {
                    if let Value::Object(op) = &value {
                        let children = self.resolve_children(
                            tables,
                            to,
                            op,
                            Some((object_type, &own_id)),
                        );
                        row.insert(key, Value::Array(children));
                    }
                }
                Some(Rel::Joined { through, to }) => {
                    if let Value::Object(op) = &value {
                        let mut join_rows = Vec::new();
                        if let Some(Value::Array(elements)) = op.get("create") {
                            for element in elements {
                                if let Some(inner) =
                                    element.get(through).and_then(|v| v.as_object())
                                {
                                    let children =
                                        self.resolve_children(tables, to, inner, None);
                                    if let Some(child) = children.into_iter().next() {
                                        let mut join_row = Row::new();
                                        join_row.insert(through.to_string(), child);
                                        join_rows.push(Value::Object(join_row));
                                    }
                                }
                            }
                        }
                        row.insert(key, Value::Array(join_rows));
                    }
                }
                Some(Rel::Translations) => {
                    if let Value::Object(op) = &value {
                        if let Some(Value::Array(items)) = op.get("create") {
                            row.insert(key, Value::Array(items.clone()));
                        }
                    }
                }
                Some(Rel::Union { .. }) | None => {
                    row.insert(key, value);
                }
            }
        }
        row
    }

    fn apply_update(&self, tables: &mut Tables, object_type: ObjectType, id: Id, data: Row) -> bool {
        let converter = self.registry.get(object_type);
        let Some(mut row) = tables
            .get(&object_type)
            .and_then(|table| table.get(&id))
            .cloned()
        else {
            return false;
        };
        let own_id = Value::String(id.to_string());

        for (key, value) in data {
            let rel = converter.rel(&key).copied();
            match rel {
                Some(rel_kind) if Self::is_write_op(&value) => {
                    let op = value.as_object().cloned().unwrap_or_default();
                    let existing = match row.get(&key) {
                        Some(Value::Array(items)) => items.clone(),
                        _ => Vec::new(),
                    };
                    let mut items = existing;
                    match rel_kind {
                        Rel::One(to) => {
                            let children = self.resolve_children(tables, to, &op, None);
                            row.insert(key, children.into_iter().next().unwrap_or(Value::Null));
                            continue;
                        }
                        Rel::Many(to) => {
                            items.extend(self.resolve_children(
                                tables,
                                to,
                                &op,
                                Some((object_type, &own_id)),
                            ));
                            if let Some(Value::Array(gone)) = op.get("disconnect") {
                                items.retain(|item| {
                                    !gone.iter().any(|g| item.get("id") == g.get("id"))
                                });
                            }
                        }
                        Rel::Joined { through, to } => {
                            if let Some(Value::Array(elements)) = op.get("create") {
                                for element in elements {
                                    if let Some(inner) =
                                        element.get(through).and_then(|v| v.as_object())
                                    {
                                        let children =
                                            self.resolve_children(tables, to, inner, None);
                                        if let Some(child) = children.into_iter().next() {
                                            let mut join_row = Row::new();
                                            join_row.insert(through.to_string(), child);
                                            items.push(Value::Object(join_row));
                                        }
                                    }
                                }
                            }
                            if let Some(Value::Array(gone)) = op.get("disconnect") {
                                items.retain(|item| {
                                    !gone.iter().any(|g| {
                                        item.get(through).and_then(|c| c.get("id")) == g.get("id")
                                    })
                                });
                            }
                        }
                        Rel::Translations => {
                            if let Some(Value::Array(created)) = op.get("create") {
                                items.extend(created.iter().cloned());
                            }
                            if let Some(Value::Array(updated)) = op.get("update") {
                                for patch in updated {
                                    for item in items.iter_mut() {
                                        if item.get("id") == patch.get("id") {
                                            if let (Value::Object(dst), Value::Object(src)) =
                                                (item, patch)
                                            {
                                                for (k, v) in src {
                                                    dst.insert(k.clone(), v.clone());
                                                }
                                            }
                                        }
                                    }
                                }
                            }
                        }
                        Rel::Union { .. } => continue,
                    }
                    row.insert(key, Value::Array(items));
                }
                _ => {
                    row.insert(key, value);
                }
            }
        }

        tables.entry(object_type).or_default().insert(id, row);
        true
    }

    fn project(row: &Row, select: &StoreSelect) -> Row {
        let mut out = Row::new();
        for (name, field) in &select.fields {
            if name == "_count" {
                if let StoreField::Relation { select: counts, .. } = field {
                    let mut aggregated = Row::new();
                    for relation in counts.fields.keys() {
                        let count = match row.get(relation) {
                            Some(Value::Array(items)) => items.len(),
                            _ => 0,
                        };
                        aggregated.insert(relation.clone(), Value::Number(count.into()));
                    }
                    out.insert("_count".to_string(), Value::Object(aggregated));
                }
                continue;
            }
            match field {
                StoreField::Column => {
                    if let Some(value) = row.get(name) {
                        out.insert(name.clone(), value.clone());
                    }
                }
                StoreField::Relation { select, filter } => match row.get(name) {
                    Some(Value::Array(items)) => {
                        let projected: Vec<Value> = items
                            .iter()
                            .filter_map(|item| item.as_object())
                            .filter(|obj| filter.as_ref().is_none_or(|f| f.matches(obj)))
                            .map(|obj| Value::Object(Self::project(obj, select)))
                            .collect();
                        out.insert(name.clone(), Value::Array(projected));
                    }
                    Some(Value::Object(obj)) => {
                        let keep = filter.as_ref().is_none_or(|f| f.matches(obj));
                        out.insert(
                            name.clone(),
                            if keep {
                                Value::Object(Self::project(obj, select))
                            } else {
                                Value::Null
                            },
                        );
                    }
                    Some(Value::Null) => {
                        out.insert(name.clone(), Value::Null);
                    }
                    _ => {}
                },
            }
        }
        out
    }
}

#[async_trait]
impl StoreClient for MemoryStore {
    async fn find_unique(
        &self,
        object_type: ObjectType,
        id: Id,
        select: &StoreSelect,
    ) -> anyhow::Result<Option<Row>> {
        let tables = self.tables.read();
        Ok(tables
            .get(&object_type)
            .and_then(|table| table.get(&id))
            .map(|row| Self::project(row, select)))
    }

    async fn find_many(
        &self,
        object_type: ObjectType,
        filter: &Filter,
        select: &StoreSelect,
    ) -> anyhow::Result<Vec<Row>> {
        let tables = self.tables.read();
        Ok(tables
            .get(&object_type)
            .map(|table| {
                table
                    .values()
                    .filter(|row| filter.matches(row))
                    .map(|row| Self::project(row, select))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count(&self, object_type: ObjectType, filter: &Filter) -> anyhow::Result<u64> {
        let tables = self.tables.read();
        Ok(tables
            .get(&object_type)
            .map(|table| table.values().filter(|row| filter.matches(row)).count() as u64)
            .unwrap_or(0))
    }

    async fn create(
        &self,
        object_type: ObjectType,
        data: Row,
        select: &StoreSelect,
    ) -> anyhow::Result<Row> {
        let mut tables = self.tables.write();
        let row = self.materialize(&mut tables, object_type, data);
        let id = row
            .get("id")
            .and_then(id_from_value)
            .ok_or_else(|| anyhow::anyhow!("create payload missing id"))?;
        tables.entry(object_type).or_default().insert(id, row.clone());
        Ok(Self::project(&row, select))
    }

    async fn update(
        &self,
        object_type: ObjectType,
        id: Id,
        data: Row,
        select: &StoreSelect,
    ) -> anyhow::Result<Option<Row>> {
        let mut tables = self.tables.write();
        if !self.apply_update(&mut tables, object_type, id, data) {
            return Ok(None);
        }
        Ok(tables
            .get(&object_type)
            .and_then(|table| table.get(&id))
            .map(|row| Self::project(row, select)))
    }

    async fn delete_many(&self, object_type: ObjectType, ids: &[Id]) -> anyhow::Result<u64> {
        let mut tables = self.tables.write();
        let Some(table) = tables.get_mut(&object_type) else {
            return Ok(0);
        };
        let mut removed = 0;
        for id in ids {
            if table.remove(id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn store() -> MemoryStore {
        MemoryStore::new(Arc::new(TypeRegistry::new()))
    }

    fn row(value: Value) -> Row {
        value.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn test_create_and_project() {
        let store = store();
        let id = Uuid::new_v4();
        let select = StoreSelect::new().with_column("id").with_column("tag");
        let created = store
            .create(
                ObjectType::Tag,
                row(json!({ "id": id.to_string(), "tag": "rust", "createdAt": "2026-01-01" })),
                &select,
            )
            .await
            .unwrap();
        assert_eq!(created.get("tag"), Some(&json!("rust")));
        assert!(!created.contains_key("createdAt"));
        assert_eq!(store.len(ObjectType::Tag), 1);
    }

    #[tokio::test]
    async fn test_nested_create_lands_in_child_table() {
        let store = store();
        let routine_id = Uuid::new_v4();
        let node_id = Uuid::new_v4();
        let select = StoreSelect::new().with_column("id");
        store
            .create(
                ObjectType::Routine,
                row(json!({
                    "id": routine_id.to_string(),
                    "complexity": 2,
                    "nodes": { "create": [ { "id": node_id.to_string(), "nodeType": "start" } ] }
                })),
                &select,
            )
            .await
            .unwrap();

        let node = store.raw(ObjectType::RoutineNode, node_id).expect("node row");
        // Parent foreign key wired onto the nested create.
        assert_eq!(node.get("routineId"), Some(&json!(routine_id.to_string())));
    }

    #[tokio::test]
    async fn test_delete_many_reports_affected_rows() {
        let store = store();
        let a = store.insert_raw(
            ObjectType::Tag,
            row(json!({ "id": Uuid::new_v4().to_string(), "tag": "a" })),
        );
        let missing = Uuid::new_v4();
        let removed = store.delete_many(ObjectType::Tag, &[a, missing]).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.is_empty(ObjectType::Tag));
    }

    #[tokio::test]
    async fn test_filtered_relation_projection() {
        let store = store();
        let id = Uuid::new_v4();
        let me = Uuid::new_v4();
        store.insert_raw(
            ObjectType::Project,
            row(json!({
                "id": id.to_string(),
                "stars": [
                    { "id": Uuid::new_v4().to_string(), "starredById": me.to_string() },
                    { "id": Uuid::new_v4().to_string(), "starredById": Uuid::new_v4().to_string() }
                ]
            })),
        );
        let select = StoreSelect::new().with_column("id").with_filtered_relation(
            "stars",
            StoreSelect::new().with_column("id"),
            Filter::default().with_eq("starredById", me.to_string()),
        );
        let projected = store
            .find_unique(ObjectType::Project, id, &select)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(projected.get("stars").unwrap().as_array().unwrap().len(), 1);
    }
}
