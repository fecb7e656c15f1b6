//! Create/update/delete pipeline
//!
//! One unified pipeline per type runs every mutation batch through an
//! explicit ordered list of short-circuiting, Result-returning stages:
//!
//! structural → content-safety → ownership → cardinality → shape →
//! execute → convert-output
//!
//! Stages before execution are side-effect-free; no store writes happen
//! until every validation stage has passed. Trigger emission runs after a
//! successful batch and is best-effort only.

mod cardinality;
mod content;
mod execute;
mod ownership;
mod shaping;
mod structural;

use futures::future::BoxFuture;
use std::sync::Arc;

use crate::config::Limits;
use crate::engine::Engine;
use crate::error::ApiError;
use crate::model::{Caller, Id, ObjectType, Row};
use crate::selection::{annotate, AnnotatedShape, SelectionShape};
use crate::services::{ContentDetector, StructuralValidator};
use crate::store::StoreClient;
use crate::registry::TypeRegistry;

pub use content::collect_texts;

/// One update in a batch: the target row and the fields to change.
#[derive(Debug, Clone)]
pub struct UpdateItem {
    pub id: Id,
    pub data: Row,
}

/// A mutation batch, scoped to a single ObjectType and caller.
#[derive(Debug, Clone)]
pub struct MutationBatch {
    pub object_type: ObjectType,
    /// Requested response shape for created/updated objects.
    pub shape: SelectionShape,
    pub create: Vec<Row>,
    pub update: Vec<UpdateItem>,
    pub delete: Vec<Id>,
}

impl MutationBatch {
    pub fn new(object_type: ObjectType, shape: SelectionShape) -> Self {
        Self {
            object_type,
            shape,
            create: Vec::new(),
            update: Vec::new(),
            delete: Vec::new(),
        }
    }

    pub fn with_creates(mut self, creates: impl IntoIterator<Item = Row>) -> Self {
        self.create.extend(creates);
        self
    }

    pub fn with_updates(mut self, updates: impl IntoIterator<Item = UpdateItem>) -> Self {
        self.update.extend(updates);
        self
    }

    pub fn with_deletes(mut self, ids: impl IntoIterator<Item = Id>) -> Self {
        self.delete.extend(ids);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }
}

/// Affected-row count for bulk deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct DeleteCount {
    pub count: u64,
}

/// Outcome of a single-object delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Success {
    pub success: bool,
}

#[derive(Debug, Default)]
pub struct CudResult {
    pub created: Vec<Row>,
    pub updated: Vec<Row>,
    pub deleted: Option<DeleteCount>,
}

/// Everything a stage may need. Built per batch, discarded with the
/// response; the pipeline holds no state between requests.
pub(crate) struct CudContext {
    pub registry: Arc<TypeRegistry>,
    pub store: Arc<dyn StoreClient>,
    pub detector: Arc<dyn ContentDetector>,
    pub validator: Arc<dyn StructuralValidator>,
    pub limits: Limits,
    pub caller: Caller,
    pub batch: MutationBatch,
    pub annotated: AnnotatedShape,
    /// Store-native write payloads, produced by the shaping stage.
    pub shaped_creates: Vec<Row>,
    pub shaped_updates: Vec<(Id, Row)>,
    /// Delete targets that existed at validation time. Missing delete
    /// targets are tolerated so delete-one can report success=false.
    pub existing_delete_ids: Vec<Id>,
    pub created: Vec<Row>,
    pub updated: Vec<Row>,
    pub deleted: Option<u64>,
}

type StageFn = for<'a> fn(&'a mut CudContext) -> BoxFuture<'a, Result<(), ApiError>>;

fn stage_structural(cx: &mut CudContext) -> BoxFuture<'_, Result<(), ApiError>> {
    Box::pin(structural::run(cx))
}
fn stage_content(cx: &mut CudContext) -> BoxFuture<'_, Result<(), ApiError>> {
    Box::pin(content::run(cx))
}
fn stage_ownership(cx: &mut CudContext) -> BoxFuture<'_, Result<(), ApiError>> {
    Box::pin(ownership::run(cx))
}
fn stage_cardinality(cx: &mut CudContext) -> BoxFuture<'_, Result<(), ApiError>> {
    Box::pin(cardinality::run(cx))
}
fn stage_shape(cx: &mut CudContext) -> BoxFuture<'_, Result<(), ApiError>> {
    Box::pin(shaping::run(cx))
}
fn stage_execute(cx: &mut CudContext) -> BoxFuture<'_, Result<(), ApiError>> {
    Box::pin(execute::run(cx))
}
fn stage_convert_output(cx: &mut CudContext) -> BoxFuture<'_, Result<(), ApiError>> {
    Box::pin(execute::convert_output(cx))
}

/// The ordered stage list. Order is the contract: nothing reaches the
/// store-writing stages until every validation stage has passed.
fn stages() -> [(&'static str, StageFn); 7] {
    [
        ("structural", stage_structural as StageFn),
        ("content_safety", stage_content as StageFn),
        ("ownership", stage_ownership as StageFn),
        ("cardinality", stage_cardinality as StageFn),
        ("shape", stage_shape as StageFn),
        ("execute", stage_execute as StageFn),
        ("convert_output", stage_convert_output as StageFn),
    ]
}

/// Run a mutation batch through the full pipeline.
pub async fn run(
    engine: &Engine,
    caller: &Caller,
    batch: MutationBatch,
) -> Result<CudResult, ApiError> {
    let object_type = batch.object_type;
    let converter = engine.registry.get(object_type);
    if !converter.mutable {
        return Err(ApiError::MutationNotSupported(object_type));
    }
    if !caller.is_authenticated() {
        return Err(ApiError::Unauthorized);
    }
    if batch.is_empty() {
        return Ok(CudResult::default());
    }

    let annotated = annotate(&engine.registry, &batch.shape, object_type);
    let mut cx = CudContext {
        registry: engine.registry.clone(),
        store: engine.store.clone(),
        detector: engine.detector.clone(),
        validator: engine.validator.clone(),
        limits: engine.limits.clone(),
        caller: caller.clone(),
        batch,
        annotated,
        shaped_creates: Vec::new(),
        shaped_updates: Vec::new(),
        existing_delete_ids: Vec::new(),
        created: Vec::new(),
        updated: Vec::new(),
        deleted: None,
    };

    for (name, stage) in stages() {
        if let Err(error) = stage(&mut cx).await {
            tracing::debug!(
                object_type = %object_type,
                stage = name,
                code = error.code(),
                "mutation batch rejected"
            );
            return Err(error);
        }
    }

    emit_triggers(engine, &cx).await;

    Ok(CudResult {
        created: cx.created,
        updated: cx.updated,
        deleted: cx.deleted.map(|count| DeleteCount { count }),
    })
}

/// Per-object lifecycle events, fired post-commit. Failures are logged
/// only: the mutation has already succeeded from the caller's view.
async fn emit_triggers(engine: &Engine, cx: &CudContext) {
    let object_type = cx.batch.object_type;
    for row in &cx.created {
        if let Some(id) = row.get("id").and_then(crate::model::id_from_value) {
            if let Err(error) = engine.events.object_created(&cx.caller, object_type, id).await {
                tracing::warn!(object_type = %object_type, object_id = %id, error = %error, "create trigger failed");
            }
        }
    }
    for row in &cx.updated {
        if let Some(id) = row.get("id").and_then(crate::model::id_from_value) {
            if let Err(error) = engine.events.object_updated(&cx.caller, object_type, id).await {
                tracing::warn!(object_type = %object_type, object_id = %id, error = %error, "update trigger failed");
            }
        }
    }
    if cx.deleted.is_some() {
        for id in &cx.existing_delete_ids {
            if let Err(error) = engine.events.object_deleted(&cx.caller, object_type, *id).await {
                tracing::warn!(object_type = %object_type, object_id = %id, error = %error, "delete trigger failed");
            }
        }
    }
}

/// Create one object and return it converted and enriched.
pub async fn create_one(
    engine: &Engine,
    caller: &Caller,
    object_type: ObjectType,
    shape: SelectionShape,
    data: Row,
) -> Result<Row, ApiError> {
    let batch = MutationBatch::new(object_type, shape).with_creates([data]);
    let mut result = run(engine, caller, batch).await?;
    result
        .created
        .pop()
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("create reported no object")))
}

/// Update one object and return it converted and enriched.
pub async fn update_one(
    engine: &Engine,
    caller: &Caller,
    object_type: ObjectType,
    shape: SelectionShape,
    id: Id,
    data: Row,
) -> Result<Row, ApiError> {
    let batch =
        MutationBatch::new(object_type, shape).with_updates([UpdateItem { id, data }]);
    let mut result = run(engine, caller, batch).await?;
    result
        .updated
        .pop()
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("update reported no object")))
}

/// Delete one object. A missing target reports `success=false` rather than
/// an error; a verified target that the bulk delete then fails to remove is
/// an internal error.
pub async fn delete_one(
    engine: &Engine,
    caller: &Caller,
    object_type: ObjectType,
    id: Id,
) -> Result<Success, ApiError> {
    let batch = MutationBatch::new(object_type, SelectionShape::new()).with_deletes([id]);
    let result = run(engine, caller, batch).await?;
    let count = result.deleted.map(|d| d.count).unwrap_or(0);
    Ok(Success { success: count > 0 })
}

/// Delete many objects, returning the affected-row count.
pub async fn delete_many(
    engine: &Engine,
    caller: &Caller,
    object_type: ObjectType,
    ids: Vec<Id>,
) -> Result<DeleteCount, ApiError> {
    let batch = MutationBatch::new(object_type, SelectionShape::new()).with_deletes(ids);
    let result = run(engine, caller, batch).await?;
    Ok(result.deleted.unwrap_or(DeleteCount { count: 0 }))
}
