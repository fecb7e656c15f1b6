//! Integration tests for the query/mutation pipeline
//!
//! These tests exercise the complete flows over the in-memory
//! collaborators:
//! - read path: shape translation, row conversion, supplemental enrichment
//! - write path: the full CUD validation pipeline and its failure modes
//! - the depth guard and rate limiter wired through the GraphQL endpoint

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use uuid::Uuid;

use atelier::config::Limits;
use atelier::cud::{MutationBatch, UpdateItem};
use atelier::graphql::{GraphQLApi, GraphRequest};
use atelier::guards::{DepthGuard, MemoryCounterStore, RateLimit, RateLimiter};
use atelier::model::{Caller, Id, ObjectType, Row};
use atelier::selection::SelectionShape;
use atelier::services::{EventSink, LifecycleAction, SchemaRulesValidator, WordListDetector};
use atelier::store::{Filter, MemoryStore, StoreClient};
use atelier::selection::StoreSelect;
use atelier::{Engine, TypeRegistry};

// ============================================================================
// Test collaborators
// ============================================================================

/// Event sink recording every emission for assertions.
#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<(LifecycleAction, ObjectType, Id)>>,
}

impl RecordingSink {
    fn deleted(&self) -> Vec<Id> {
        self.events
            .lock()
            .iter()
            .filter(|(action, _, _)| *action == LifecycleAction::Deleted)
            .map(|(_, _, id)| *id)
            .collect()
    }

    fn created(&self) -> Vec<Id> {
        self.events
            .lock()
            .iter()
            .filter(|(action, _, _)| *action == LifecycleAction::Created)
            .map(|(_, _, id)| *id)
            .collect()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn object_created(
        &self,
        _caller: &Caller,
        object_type: ObjectType,
        id: Id,
    ) -> anyhow::Result<()> {
        self.events
            .lock()
            .push((LifecycleAction::Created, object_type, id));
        Ok(())
    }
    async fn object_updated(
        &self,
        _caller: &Caller,
        object_type: ObjectType,
        id: Id,
    ) -> anyhow::Result<()> {
        self.events
            .lock()
            .push((LifecycleAction::Updated, object_type, id));
        Ok(())
    }
    async fn object_deleted(
        &self,
        _caller: &Caller,
        object_type: ObjectType,
        id: Id,
    ) -> anyhow::Result<()> {
        self.events
            .lock()
            .push((LifecycleAction::Deleted, object_type, id));
        Ok(())
    }
}

/// Store wrapper counting reads, for the supplemental-batching contract.
struct CountingStore {
    inner: Arc<MemoryStore>,
    find_many_calls: AtomicU64,
}

impl CountingStore {
    fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            find_many_calls: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl StoreClient for CountingStore {
    async fn find_unique(
        &self,
        object_type: ObjectType,
        id: Id,
        select: &StoreSelect,
    ) -> anyhow::Result<Option<Row>> {
        self.inner.find_unique(object_type, id, select).await
    }
    async fn find_many(
        &self,
        object_type: ObjectType,
        filter: &Filter,
        select: &StoreSelect,
    ) -> anyhow::Result<Vec<Row>> {
        self.find_many_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.find_many(object_type, filter, select).await
    }
    async fn count(&self, object_type: ObjectType, filter: &Filter) -> anyhow::Result<u64> {
        self.inner.count(object_type, filter).await
    }
    async fn create(
        &self,
        object_type: ObjectType,
        data: Row,
        select: &StoreSelect,
    ) -> anyhow::Result<Row> {
        self.inner.create(object_type, data, select).await
    }
    async fn update(
        &self,
        object_type: ObjectType,
        id: Id,
        data: Row,
        select: &StoreSelect,
    ) -> anyhow::Result<Option<Row>> {
        self.inner.update(object_type, id, data, select).await
    }
    async fn delete_many(&self, object_type: ObjectType, ids: &[Id]) -> anyhow::Result<u64> {
        self.inner.delete_many(object_type, ids).await
    }
}

/// Store wrapper that errors on the nth create, for the mid-batch
/// weak-consistency contract.
struct FailingStore {
    inner: Arc<MemoryStore>,
    creates_before_failure: AtomicU64,
}

#[async_trait]
impl StoreClient for FailingStore {
    async fn find_unique(
        &self,
        object_type: ObjectType,
        id: Id,
        select: &StoreSelect,
    ) -> anyhow::Result<Option<Row>> {
        self.inner.find_unique(object_type, id, select).await
    }
    async fn find_many(
        &self,
        object_type: ObjectType,
        filter: &Filter,
        select: &StoreSelect,
    ) -> anyhow::Result<Vec<Row>> {
        self.inner.find_many(object_type, filter, select).await
    }
    async fn count(&self, object_type: ObjectType, filter: &Filter) -> anyhow::Result<u64> {
        self.inner.count(object_type, filter).await
    }
    async fn create(
        &self,
        object_type: ObjectType,
        data: Row,
        select: &StoreSelect,
    ) -> anyhow::Result<Row> {
        if self.creates_before_failure.fetch_sub(1, Ordering::SeqCst) == 0 {
            anyhow::bail!("simulated store failure");
        }
        self.inner.create(object_type, data, select).await
    }
    async fn update(
        &self,
        object_type: ObjectType,
        id: Id,
        data: Row,
        select: &StoreSelect,
    ) -> anyhow::Result<Option<Row>> {
        self.inner.update(object_type, id, data, select).await
    }
    async fn delete_many(&self, object_type: ObjectType, ids: &[Id]) -> anyhow::Result<u64> {
        self.inner.delete_many(object_type, ids).await
    }
}

// ============================================================================
// Fixtures
// ============================================================================

struct Fixture {
    registry: Arc<TypeRegistry>,
    store: Arc<MemoryStore>,
    sink: Arc<RecordingSink>,
    engine: Engine,
}

fn fixture() -> Fixture {
    fixture_with(WordListDetector::disabled(), Limits::default())
}

fn fixture_with(detector: WordListDetector, limits: Limits) -> Fixture {
    let registry = Arc::new(TypeRegistry::new());
    let store = Arc::new(MemoryStore::new(registry.clone()));
    let sink = Arc::new(RecordingSink::default());
    let engine = Engine::new(
        registry.clone(),
        store.clone(),
        Arc::new(detector),
        Arc::new(SchemaRulesValidator),
        sink.clone(),
        limits,
    );
    Fixture {
        registry,
        store,
        sink,
        engine,
    }
}

fn row(value: Value) -> Row {
    value.as_object().unwrap().clone()
}

fn seed_project(store: &MemoryStore, owner: Id) -> Id {
    let id = Uuid::new_v4();
    store.insert_raw(
        ObjectType::Project,
        row(json!({
            "id": id.to_string(),
            "handle": "atlas",
            "score": 4,
            "isPrivate": false,
            "userId": owner.to_string(),
            "comments": [
                { "id": Uuid::new_v4().to_string(), "score": 1 },
                { "id": Uuid::new_v4().to_string(), "score": 2 }
            ],
            "tags": [
                { "id": "join-1", "tag": { "id": Uuid::new_v4().to_string(), "tag": "science" } }
            ],
            "translations": [
                { "id": "t-1", "language": "en", "name": "Atlas", "description": "maps" }
            ],
            "stars": [],
            "votes": []
        })),
    );
    id
}

// ============================================================================
// Read path
// ============================================================================

#[tokio::test]
async fn read_path_round_trip_reproduces_requested_fields() {
    let fx = fixture();
    let owner = Uuid::new_v4();
    let project_id = seed_project(&fx.store, owner);

    let shape = SelectionShape::from_value(&json!({
        "id": true,
        "handle": true,
        "score": true,
        "commentsCount": true,
        "tags": { "tag": true },
        "translations": { "name": true }
    }));
    let found = fx
        .engine
        .find_unique(&Caller::anonymous(), ObjectType::Project, project_id, &shape)
        .await
        .unwrap()
        .expect("project exists");

    assert_eq!(found.get("__typename"), Some(&json!("Project")));
    assert_eq!(found.get("id"), Some(&json!(project_id.to_string())));
    assert_eq!(found.get("handle"), Some(&json!("atlas")));
    assert_eq!(found.get("score"), Some(&json!(4)));
    assert_eq!(found.get("commentsCount"), Some(&json!(2)));
    assert_eq!(
        found.get("tags").and_then(|t| t.get(0)).and_then(|t| t.get("tag")),
        Some(&json!("science"))
    );
    assert_eq!(
        found
            .get("translations")
            .and_then(|t| t.get(0))
            .and_then(|t| t.get("name")),
        Some(&json!("Atlas"))
    );
}

#[tokio::test]
async fn viewer_relative_flags_come_from_enrichment() {
    let fx = fixture();
    let owner = Uuid::new_v4();
    let viewer = Uuid::new_v4();
    let project_id = Uuid::new_v4();
    fx.store.insert_raw(
        ObjectType::Project,
        row(json!({
            "id": project_id.to_string(),
            "handle": "starred",
            "userId": owner.to_string(),
            "stars": [ { "id": Uuid::new_v4().to_string(), "starredById": viewer.to_string() } ],
            "votes": [ { "id": Uuid::new_v4().to_string(), "votedById": viewer.to_string(), "isUpvote": true } ]
        })),
    );

    let shape = SelectionShape::from_value(&json!({
        "id": true,
        "isStarred": true,
        "isUpvoted": true
    }));

    let as_viewer = fx
        .engine
        .find_unique(&Caller::for_user(viewer), ObjectType::Project, project_id, &shape)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(as_viewer.get("isStarred"), Some(&json!(true)));
    assert_eq!(as_viewer.get("isUpvoted"), Some(&json!(true)));

    let as_stranger = fx
        .engine
        .find_unique(
            &Caller::for_user(Uuid::new_v4()),
            ObjectType::Project,
            project_id,
            &shape,
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(as_stranger.get("isStarred"), Some(&json!(false)));
    assert_eq!(as_stranger.get("isUpvoted"), Some(&Value::Null));
}

#[tokio::test]
async fn enriching_fifty_objects_issues_exactly_one_extra_read() {
    let registry = Arc::new(TypeRegistry::new());
    let memory = Arc::new(MemoryStore::new(registry.clone()));
    let viewer = Uuid::new_v4();
    let mut ids = Vec::new();
    for i in 0..50 {
        let id = Uuid::new_v4();
        memory.insert_raw(
            ObjectType::Project,
            row(json!({
                "id": id.to_string(),
                "handle": format!("p{i}"),
                "stars": [],
                "votes": []
            })),
        );
        ids.push(id);
    }
    let counting = Arc::new(CountingStore::new(memory));
    let engine = Engine::with_defaults(registry, counting.clone());

    let shape = SelectionShape::from_value(&json!({ "id": true, "isStarred": true }));
    let objects = engine
        .find_many(
            &Caller::for_user(viewer),
            ObjectType::Project,
            &Filter::ids(ids),
            &shape,
        )
        .await
        .unwrap();

    assert_eq!(objects.len(), 50);
    // One read for the base query, exactly one more for enrichment.
    assert_eq!(counting.find_many_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn mixed_feeds_enrich_once_per_type_partition() {
    let registry = Arc::new(TypeRegistry::new());
    let memory = Arc::new(MemoryStore::new(registry.clone()));
    let viewer = Uuid::new_v4();

    let project_id = Uuid::new_v4();
    memory.insert_raw(
        ObjectType::Project,
        row(json!({
            "id": project_id.to_string(),
            "handle": "feedp",
            "stars": [ { "id": Uuid::new_v4().to_string(), "starredById": viewer.to_string() } ]
        })),
    );
    let routine_id = Uuid::new_v4();
    memory.insert_raw(
        ObjectType::Routine,
        row(json!({ "id": routine_id.to_string(), "complexity": 1, "stars": [] })),
    );
    let counting = Arc::new(CountingStore::new(memory));

    let shape = SelectionShape::from_value(&json!({ "id": true, "isStarred": true }));
    let shapes = HashMap::from([
        (
            ObjectType::Project,
            atelier::selection::annotate(&registry, &shape, ObjectType::Project),
        ),
        (
            ObjectType::Routine,
            atelier::selection::annotate(&registry, &shape, ObjectType::Routine),
        ),
    ]);
    let items = vec![
        (ObjectType::Project, row(json!({ "id": project_id.to_string() }))),
        (ObjectType::Routine, row(json!({ "id": routine_id.to_string() }))),
    ];

    let partitions = atelier::augment::enrich_mixed(
        &registry,
        counting.as_ref(),
        &Caller::for_user(viewer),
        items,
        &shapes,
    )
    .await
    .unwrap();

    // One partition per type, tagged with its short key.
    assert_eq!(partitions.len(), 2);
    assert_eq!(partitions[0].key, "p");
    assert_eq!(partitions[1].key, "r");
    assert_eq!(
        partitions[0].objects[0].get("isStarred"),
        Some(&json!(true))
    );
    assert_eq!(
        partitions[1].objects[0].get("isStarred"),
        Some(&json!(false))
    );
    // One extra read per type partition, never one per object.
    assert_eq!(counting.find_many_calls.load(Ordering::SeqCst), 2);
}

// ============================================================================
// Content safety
// ============================================================================

#[tokio::test]
async fn flagged_tag_text_is_rejected_before_any_write() {
    let fx = fixture_with(WordListDetector::new(["sinister"]), Limits::default());
    let caller = Caller::for_user(Uuid::new_v4());

    let error = fx
        .engine
        .create_one(
            &caller,
            ObjectType::Tag,
            SelectionShape::new().with_leaf("id"),
            row(json!({ "tag": "sinister plot" })),
        )
        .await
        .unwrap_err();

    assert_eq!(error.code(), "CONTENT_FLAGGED");
    assert!(fx.store.is_empty(ObjectType::Tag));
}

#[tokio::test]
async fn flagged_text_three_levels_deep_is_rejected() {
    let fx = fixture_with(WordListDetector::new(["sinister"]), Limits::default());
    let caller = Caller::for_user(Uuid::new_v4());

    let error = fx
        .engine
        .create_one(
            &caller,
            ObjectType::Routine,
            SelectionShape::new().with_leaf("id"),
            row(json!({
                "complexity": 1,
                "nodesCreate": [
                    {
                        "nodeType": "start",
                        "translationsCreate": [
                            { "language": "en", "title": "a sinister title" }
                        ]
                    }
                ]
            })),
        )
        .await
        .unwrap_err();

    assert_eq!(error.code(), "CONTENT_FLAGGED");
    assert!(fx.store.is_empty(ObjectType::Routine));
    assert!(fx.store.is_empty(ObjectType::RoutineNode));
}

// ============================================================================
// Ownership
// ============================================================================

#[tokio::test]
async fn updating_someone_elses_object_is_unauthorized_and_writes_nothing() {
    let fx = fixture();
    let owner = Uuid::new_v4();
    let intruder = Caller::for_user(Uuid::new_v4());
    let project_id = seed_project(&fx.store, owner);

    let error = fx
        .engine
        .update_one(
            &intruder,
            ObjectType::Project,
            SelectionShape::new().with_leaf("id"),
            project_id,
            row(json!({ "handle": "stolen" })),
        )
        .await
        .unwrap_err();
    assert_eq!(error.code(), "UNAUTHORIZED");

    let stored = fx.store.raw(ObjectType::Project, project_id).unwrap();
    assert_eq!(stored.get("handle"), Some(&json!("atlas")));

    let error = fx
        .engine
        .delete_one(&intruder, ObjectType::Project, project_id)
        .await
        .unwrap_err();
    assert_eq!(error.code(), "UNAUTHORIZED");
    assert!(fx.store.raw(ObjectType::Project, project_id).is_some());
}

#[tokio::test]
async fn org_admin_may_update_org_owned_objects() {
    let fx = fixture();
    let org_id = Uuid::new_v4();
    let admin = Uuid::new_v4();
    let outsider = Uuid::new_v4();

    fx.store.insert_raw(
        ObjectType::Organization,
        row(json!({ "id": org_id.to_string(), "handle": "guild", "isOpenToNewMembers": true })),
    );
    fx.store.insert_raw(
        ObjectType::Member,
        row(json!({
            "id": Uuid::new_v4().to_string(),
            "userId": admin.to_string(),
            "organizationId": org_id.to_string(),
            "role": "Admin",
            "isAccepted": true
        })),
    );
    let project_id = Uuid::new_v4();
    fx.store.insert_raw(
        ObjectType::Project,
        row(json!({
            "id": project_id.to_string(),
            "handle": "shared",
            "organizationId": org_id.to_string()
        })),
    );

    let updated = fx
        .engine
        .update_one(
            &Caller::for_user(admin),
            ObjectType::Project,
            SelectionShape::new().with_leaf("handle"),
            project_id,
            row(json!({ "handle": "renamed" })),
        )
        .await
        .unwrap();
    assert_eq!(updated.get("handle"), Some(&json!("renamed")));

    let error = fx
        .engine
        .update_one(
            &Caller::for_user(outsider),
            ObjectType::Project,
            SelectionShape::new().with_leaf("handle"),
            project_id,
            row(json!({ "handle": "hijacked" })),
        )
        .await
        .unwrap_err();
    assert_eq!(error.code(), "UNAUTHORIZED");
}

#[tokio::test]
async fn ownership_transfer_without_a_validator_is_rejected() {
    let fx = fixture();
    let owner = Uuid::new_v4();
    let project_id = seed_project(&fx.store, owner);

    let error = fx
        .engine
        .update_one(
            &Caller::for_user(owner),
            ObjectType::Project,
            SelectionShape::new().with_leaf("id"),
            project_id,
            row(json!({ "userId": Uuid::new_v4().to_string() })),
        )
        .await
        .unwrap_err();
    assert_eq!(error.code(), "UNAUTHORIZED");
}

#[tokio::test]
async fn unauthenticated_mutation_is_rejected() {
    let fx = fixture();
    let error = fx
        .engine
        .create_one(
            &Caller::anonymous(),
            ObjectType::Tag,
            SelectionShape::new().with_leaf("id"),
            row(json!({ "tag": "anything" })),
        )
        .await
        .unwrap_err();
    assert_eq!(error.code(), "UNAUTHORIZED");
}

#[tokio::test]
async fn immutable_types_reject_mutation() {
    let fx = fixture();
    let error = fx
        .engine
        .create_one(
            &Caller::for_user(Uuid::new_v4()),
            ObjectType::StandardVersion,
            SelectionShape::new().with_leaf("id"),
            row(json!({ "versionIndex": 1 })),
        )
        .await
        .unwrap_err();
    assert_eq!(error.code(), "MUTATION_NOT_SUPPORTED");
}

// ============================================================================
// Structural validation and cardinality
// ============================================================================

#[tokio::test]
async fn structural_violations_are_collected_across_the_batch() {
    let fx = fixture();
    let caller = Caller::for_user(Uuid::new_v4());

    let batch = MutationBatch::new(ObjectType::Tag, SelectionShape::new().with_leaf("id"))
        .with_creates([
            row(json!({})),                      // missing tag text
            row(json!({ "tag": "fine" })),       // valid
            row(json!({ "tag": 42 })),           // wrong type
        ]);
    let error = fx.engine.mutate(&caller, batch).await.unwrap_err();

    match error {
        atelier::ApiError::StructuralInvalid(violations) => {
            assert_eq!(violations.len(), 2);
            assert_eq!(violations[0].index, 0);
            assert_eq!(violations[1].index, 2);
        }
        other => panic!("expected StructuralInvalid, got {other:?}"),
    }
    assert!(fx.store.is_empty(ObjectType::Tag));
}

#[tokio::test]
async fn one_create_over_the_ceiling_rejects_the_whole_batch() {
    let fx = fixture_with(
        WordListDetector::disabled(),
        Limits {
            default_max_objects: 3,
        },
    );
    let caller_id = Uuid::new_v4();
    for i in 0..3 {
        fx.store.insert_raw(
            ObjectType::Project,
            row(json!({
                "id": Uuid::new_v4().to_string(),
                "handle": format!("mine{i}"),
                "userId": caller_id.to_string()
            })),
        );
    }

    let error = fx
        .engine
        .create_one(
            &Caller::for_user(caller_id),
            ObjectType::Project,
            SelectionShape::new().with_leaf("id"),
            row(json!({ "handle": "onemore" })),
        )
        .await
        .unwrap_err();

    assert_eq!(error.code(), "MAX_OBJECTS_EXCEEDED");
    assert_eq!(fx.store.len(ObjectType::Project), 3);
}

// ============================================================================
// Deletion semantics
// ============================================================================

#[tokio::test]
async fn deleting_a_missing_id_reports_success_false_not_an_error() {
    let fx = fixture();
    let outcome = fx
        .engine
        .delete_one(
            &Caller::for_user(Uuid::new_v4()),
            ObjectType::Project,
            Uuid::new_v4(),
        )
        .await
        .unwrap();
    assert!(!outcome.success);
    assert!(fx.sink.deleted().is_empty());
}

#[tokio::test]
async fn deleting_an_owned_id_succeeds_and_emits_one_trigger() {
    let fx = fixture();
    let owner = Uuid::new_v4();
    let project_id = seed_project(&fx.store, owner);

    let outcome = fx
        .engine
        .delete_one(&Caller::for_user(owner), ObjectType::Project, project_id)
        .await
        .unwrap();

    assert!(outcome.success);
    assert!(fx.store.raw(ObjectType::Project, project_id).is_none());
    assert_eq!(fx.sink.deleted(), vec![project_id]);
}

#[tokio::test]
async fn bulk_delete_reports_affected_count_and_per_id_triggers() {
    let fx = fixture();
    let owner = Uuid::new_v4();
    let first = seed_project(&fx.store, owner);
    let missing = Uuid::new_v4();

    let outcome = fx
        .engine
        .delete_many(
            &Caller::for_user(owner),
            ObjectType::Project,
            vec![first, missing],
        )
        .await
        .unwrap();

    assert_eq!(outcome.count, 1);
    assert_eq!(fx.sink.deleted(), vec![first]);
}

// ============================================================================
// Batch execution semantics
// ============================================================================

#[tokio::test]
async fn sequential_execution_is_not_rolled_back() {
    // The reference applies creates one at a time with no cross-item
    // transaction; a mid-batch failure leaves earlier items applied. This
    // test pins that contract.
    let registry = Arc::new(TypeRegistry::new());
    let memory = Arc::new(MemoryStore::new(registry.clone()));
    let failing = Arc::new(FailingStore {
        inner: memory.clone(),
        creates_before_failure: AtomicU64::new(1),
    });
    let engine = Engine::with_defaults(registry, failing);
    let caller = Caller::for_user(Uuid::new_v4());

    let batch = MutationBatch::new(ObjectType::Tag, SelectionShape::new().with_leaf("id"))
        .with_creates([row(json!({ "tag": "kept" })), row(json!({ "tag": "lost" }))]);
    let error = engine.mutate(&caller, batch).await.unwrap_err();

    assert_eq!(error.code(), "INTERNAL_ERROR");
    // The first create survived the second one's failure.
    assert_eq!(memory.len(ObjectType::Tag), 1);
}

#[tokio::test]
async fn existing_tag_names_connect_instead_of_duplicating() {
    let fx = fixture();
    let caller = Caller::for_user(Uuid::new_v4());
    let existing_tag = Uuid::new_v4();
    fx.store.insert_raw(
        ObjectType::Tag,
        row(json!({ "id": existing_tag.to_string(), "tag": "science" })),
    );

    let created = fx
        .engine
        .create_one(
            &caller,
            ObjectType::Project,
            SelectionShape::from_value(&json!({ "id": true, "tags": { "id": true, "tag": true } })),
            row(json!({ "handle": "tagged", "tagsCreate": [ { "tag": "science" } ] })),
        )
        .await
        .unwrap();

    // Still exactly one tag row; the project points at it.
    assert_eq!(fx.store.len(ObjectType::Tag), 1);
    assert_eq!(
        created
            .get("tags")
            .and_then(|t| t.get(0))
            .and_then(|t| t.get("id")),
        Some(&json!(existing_tag.to_string()))
    );
}

#[tokio::test]
async fn nested_self_referential_routine_graph_creates_in_one_batch() {
    let fx = fixture();
    let caller = Caller::for_user(Uuid::new_v4());
    let start = Uuid::new_v4();
    let end = Uuid::new_v4();

    let created = fx
        .engine
        .create_one(
            &caller,
            ObjectType::Routine,
            SelectionShape::from_value(&json!({
                "id": true,
                "nodes": { "id": true },
                "nodeLinks": { "fromId": true, "toId": true }
            })),
            row(json!({
                "complexity": 2,
                "nodesCreate": [
                    { "id": start.to_string(), "nodeType": "start" },
                    { "id": end.to_string(), "nodeType": "end" }
                ],
                "nodeLinksCreate": [
                    { "fromId": start.to_string(), "toId": end.to_string() }
                ]
            })),
        )
        .await
        .unwrap();

    assert_eq!(created.get("nodes").unwrap().as_array().unwrap().len(), 2);
    let link = &created.get("nodeLinks").unwrap().as_array().unwrap()[0];
    assert_eq!(link.get("fromId"), Some(&json!(start.to_string())));
    assert_eq!(link.get("toId"), Some(&json!(end.to_string())));
    assert_eq!(fx.store.len(ObjectType::RoutineNode), 2);

    let creates = fx.sink.created();
    assert_eq!(creates.len(), 1, "one trigger for the routine itself");
}

#[tokio::test]
async fn updates_of_missing_targets_are_not_found() {
    let fx = fixture();
    let caller = Caller::for_user(Uuid::new_v4());
    let batch = MutationBatch::new(ObjectType::Project, SelectionShape::new().with_leaf("id"))
        .with_updates([UpdateItem {
            id: Uuid::new_v4(),
            data: row(json!({ "handle": "ghost" })),
        }]);
    let error = fx.engine.mutate(&caller, batch).await.unwrap_err();
    assert_eq!(error.code(), "NOT_FOUND");
}

// ============================================================================
// Endpoint: depth guard, rate limiter, end-to-end execution
// ============================================================================

fn api(fx: &Fixture, depth_ceiling: usize, account_ceiling: u64) -> GraphQLApi {
    let engine = Engine::new(
        fx.registry.clone(),
        fx.store.clone(),
        Arc::new(WordListDetector::disabled()),
        Arc::new(SchemaRulesValidator),
        fx.sink.clone(),
        Limits::default(),
    );
    GraphQLApi::new(
        Arc::new(engine),
        DepthGuard::new(depth_ceiling),
        RateLimiter::new(Arc::new(MemoryCounterStore::new())),
        RateLimit::default().with_ceiling(account_ceiling),
        RateLimit::default().with_ceiling(account_ceiling).by_address(),
    )
}

fn request(query: &str) -> GraphRequest {
    GraphRequest {
        query: query.to_string(),
        variables: None,
        operation_name: None,
    }
}

#[tokio::test]
async fn endpoint_executes_a_read_query() {
    let fx = fixture();
    let owner = Uuid::new_v4();
    let project_id = seed_project(&fx.store, owner);
    let api = api(&fx, 8, 100);

    let query = format!(
        "{{ project(id: \"{project_id}\") {{ id handle commentsCount tags {{ tag }} }} }}"
    );
    let response = api.execute(&Caller::anonymous(), request(&query)).await;

    let project = &response["data"]["project"];
    assert_eq!(project["handle"], json!("atlas"));
    assert_eq!(project["commentsCount"], json!(2));
    assert_eq!(project["tags"][0]["tag"], json!("science"));
}

#[tokio::test]
async fn endpoint_rejects_deep_queries_before_resolution() {
    let fx = fixture();
    let api = api(&fx, 3, 100);

    let response = api
        .execute(
            &Caller::anonymous(),
            request("{ a { b { c { d { e } } } } }"),
        )
        .await;
    assert_eq!(
        response["errors"][0]["extensions"]["code"],
        json!("DEPTH_EXCEEDED")
    );
}

#[tokio::test]
async fn endpoint_rate_limits_per_operation_and_principal() {
    let fx = fixture();
    let owner = Uuid::new_v4();
    let project_id = seed_project(&fx.store, owner);
    let api = api(&fx, 8, 2);
    let caller = Caller::for_user(Uuid::new_v4());

    let query = format!("{{ project(id: \"{project_id}\") {{ id }} }}");
    for _ in 0..2 {
        let response = api.execute(&caller, request(&query)).await;
        assert!(response.get("errors").is_none(), "within the ceiling");
    }
    let response = api.execute(&caller, request(&query)).await;
    assert_eq!(
        response["errors"][0]["extensions"]["code"],
        json!("RATE_LIMIT_EXCEEDED")
    );
}

#[tokio::test]
async fn endpoint_runs_mutations_through_the_pipeline() {
    let fx = fixture();
    let api = api(&fx, 8, 100);
    let caller = Caller::for_user(Uuid::new_v4());

    let response = api
        .execute(
            &caller,
            request(
                "mutation { tagCreate(input: { tag: \"fresh\" }) { id tag } }",
            ),
        )
        .await;
    assert_eq!(response["data"]["tagCreate"]["tag"], json!("fresh"));
    assert_eq!(fx.store.len(ObjectType::Tag), 1);

    // The same mutation from an anonymous caller is rejected.
    let response = api
        .execute(
            &Caller::anonymous(),
            request("mutation { tagCreate(input: { tag: \"nope\" }) { id } }"),
        )
        .await;
    assert_eq!(
        response["errors"][0]["extensions"]["code"],
        json!("UNAUTHORIZED")
    );
}

#[tokio::test]
async fn endpoint_resolves_union_fields_with_inline_fragments() {
    let fx = fixture();
    let org_id = Uuid::new_v4();
    fx.store.insert_raw(
        ObjectType::Organization,
        row(json!({ "id": org_id.to_string(), "handle": "guild", "isOpenToNewMembers": true })),
    );
    let project_id = Uuid::new_v4();
    fx.store.insert_raw(
        ObjectType::Project,
        row(json!({
            "id": project_id.to_string(),
            "handle": "owned",
            "organizationId": org_id.to_string(),
            "owner": { "id": org_id.to_string(), "handle": "guild", "isOpenToNewMembers": true }
        })),
    );
    let api = api(&fx, 8, 100);

    let query = format!(
        "{{ project(id: \"{project_id}\") {{ id owner {{ id ... on Organization {{ handle }} }} }} }}"
    );
    let response = api.execute(&Caller::anonymous(), request(&query)).await;
    let owner = &response["data"]["project"]["owner"];
    assert_eq!(owner["__typename"], json!("Organization"));
    assert_eq!(owner["handle"], json!("guild"));
}
