//! Component wiring
//!
//! The engine bundles the registry and the external collaborators and
//! exposes the two control flows:
//!
//! read: annotate → to_store_shape → store → from_row → augment
//! write: the CUD pipeline in [`crate::cud`]
//!
//! Everything is constructed explicitly at startup and passed by
//! reference; no component reaches for ambient globals.

use std::sync::Arc;

use crate::augment;
use crate::config::Limits;
use crate::cud::{self, CudResult, DeleteCount, MutationBatch, Success};
use crate::error::ApiError;
use crate::model::{Caller, Id, ObjectType, Row};
use crate::registry::TypeRegistry;
use crate::selection::{annotate, from_row, to_store_shape, SelectionShape};
use crate::services::{
    ContentDetector, EventSink, LoggingSink, SchemaRulesValidator, StructuralValidator,
    WordListDetector,
};
use crate::store::{Filter, StoreClient};

pub struct Engine {
    pub registry: Arc<TypeRegistry>,
    pub store: Arc<dyn StoreClient>,
    pub detector: Arc<dyn ContentDetector>,
    pub validator: Arc<dyn StructuralValidator>,
    pub events: Arc<dyn EventSink>,
    pub limits: Limits,
}

impl Engine {
    pub fn new(
        registry: Arc<TypeRegistry>,
        store: Arc<dyn StoreClient>,
        detector: Arc<dyn ContentDetector>,
        validator: Arc<dyn StructuralValidator>,
        events: Arc<dyn EventSink>,
        limits: Limits,
    ) -> Self {
        Self {
            registry,
            store,
            detector,
            validator,
            events,
            limits,
        }
    }

    /// Engine over a store with default collaborators: disabled content
    /// detection, schema-rules validation, log-only events.
    pub fn with_defaults(registry: Arc<TypeRegistry>, store: Arc<dyn StoreClient>) -> Self {
        Self::new(
            registry,
            store,
            Arc::new(WordListDetector::disabled()),
            Arc::new(SchemaRulesValidator),
            Arc::new(LoggingSink),
            Limits::default(),
        )
    }

    /// Read path for one object by id.
    pub async fn find_unique(
        &self,
        caller: &Caller,
        object_type: ObjectType,
        id: Id,
        shape: &SelectionShape,
    ) -> Result<Option<Row>, ApiError> {
        let annotated = annotate(&self.registry, shape, object_type);
        let select = to_store_shape(&annotated);
        let Some(row) = self
            .store
            .find_unique(object_type, id, &select)
            .await
            .map_err(ApiError::from)?
        else {
            return Ok(None);
        };
        let mut objects = vec![from_row(&row, &annotated)];
        augment::enrich(
            &self.registry,
            self.store.as_ref(),
            caller,
            &annotated,
            &mut objects,
        )
        .await?;
        Ok(objects.pop())
    }

    /// Read path for a filtered list.
    pub async fn find_many(
        &self,
        caller: &Caller,
        object_type: ObjectType,
        filter: &Filter,
        shape: &SelectionShape,
    ) -> Result<Vec<Row>, ApiError> {
        let annotated = annotate(&self.registry, shape, object_type);
        let select = to_store_shape(&annotated);
        let rows = self
            .store
            .find_many(object_type, filter, &select)
            .await
            .map_err(ApiError::from)?;
        let mut objects: Vec<Row> = rows.iter().map(|row| from_row(row, &annotated)).collect();
        augment::enrich(
            &self.registry,
            self.store.as_ref(),
            caller,
            &annotated,
            &mut objects,
        )
        .await?;
        Ok(objects)
    }

    /// Write path: run a whole batch through the CUD pipeline.
    pub async fn mutate(
        &self,
        caller: &Caller,
        batch: MutationBatch,
    ) -> Result<CudResult, ApiError> {
        cud::run(self, caller, batch).await
    }

    pub async fn create_one(
        &self,
        caller: &Caller,
        object_type: ObjectType,
        shape: SelectionShape,
        data: Row,
    ) -> Result<Row, ApiError> {
        cud::create_one(self, caller, object_type, shape, data).await
    }

    pub async fn update_one(
        &self,
        caller: &Caller,
        object_type: ObjectType,
        shape: SelectionShape,
        id: Id,
        data: Row,
    ) -> Result<Row, ApiError> {
        cud::update_one(self, caller, object_type, shape, id, data).await
    }

    pub async fn delete_one(
        &self,
        caller: &Caller,
        object_type: ObjectType,
        id: Id,
    ) -> Result<Success, ApiError> {
        cud::delete_one(self, caller, object_type, id).await
    }

    pub async fn delete_many(
        &self,
        caller: &Caller,
        object_type: ObjectType,
        ids: Vec<Id>,
    ) -> Result<DeleteCount, ApiError> {
        cud::delete_many(self, caller, object_type, ids).await
    }
}
