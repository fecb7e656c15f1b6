//! Relational store client contract
//!
//! The store itself (schema, driver, migrations) is an external
//! collaborator; the pipeline only needs the operations below, all taking
//! store-native select trees. [`memory::MemoryStore`] implements the
//! contract for the dev server and the test suite.

pub mod memory;

use async_trait::async_trait;
use serde_json::Value;

use crate::model::{Id, ObjectType, Row};
use crate::selection::StoreSelect;

pub use memory::MemoryStore;

/// Row-level filter. Deliberately small: the pipeline only ever needs id
/// membership, field equality, and field membership.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub id_in: Option<Vec<Id>>,
    pub eq: Vec<(String, Value)>,
    pub any: Vec<(String, Vec<Value>)>,
}

impl Filter {
    pub fn ids(ids: impl IntoIterator<Item = Id>) -> Self {
        Self {
            id_in: Some(ids.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn with_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.eq.push((field.into(), value.into()));
        self
    }

    pub fn with_any(
        mut self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = Value>,
    ) -> Self {
        self.any.push((field.into(), values.into_iter().collect()));
        self
    }

    pub fn matches(&self, row: &Row) -> bool {
        if let Some(ids) = &self.id_in {
            match row.get("id").and_then(|v| crate::model::id_from_value(v)) {
                Some(id) if ids.contains(&id) => {}
                _ => return false,
            }
        }
        for (field, expected) in &self.eq {
            if row.get(field) != Some(expected) {
                return false;
            }
        }
        for (field, allowed) in &self.any {
            match row.get(field) {
                Some(value) if allowed.contains(value) => {}
                _ => return false,
            }
        }
        true
    }
}

/// Store client operations the pipeline depends on. Every call is atomic on
/// its own; a CUD batch is NOT wrapped in one cross-item transaction (a
/// documented weak-consistency point, see DESIGN.md).
#[async_trait]
pub trait StoreClient: Send + Sync {
    async fn find_unique(
        &self,
        object_type: ObjectType,
        id: Id,
        select: &StoreSelect,
    ) -> anyhow::Result<Option<Row>>;

    async fn find_many(
        &self,
        object_type: ObjectType,
        filter: &Filter,
        select: &StoreSelect,
    ) -> anyhow::Result<Vec<Row>>;

    async fn count(&self, object_type: ObjectType, filter: &Filter) -> anyhow::Result<u64>;

    /// Create one row from a store-native write payload (nested
    /// create/connect ops included) and return it projected by `select`.
    async fn create(
        &self,
        object_type: ObjectType,
        data: Row,
        select: &StoreSelect,
    ) -> anyhow::Result<Row>;

    /// Update one row; `None` when the target does not exist.
    async fn update(
        &self,
        object_type: ObjectType,
        id: Id,
        data: Row,
        select: &StoreSelect,
    ) -> anyhow::Result<Option<Row>>;

    /// Bulk delete, atomic with respect to itself. Returns the affected
    /// row count.
    async fn delete_many(&self, object_type: ObjectType, ids: &[Id]) -> anyhow::Result<u64>;
}
