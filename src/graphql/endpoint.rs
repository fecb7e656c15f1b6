//! GraphQL endpoint: document execution over the pipeline
//!
//! Top-level fields route onto the read path and the CUD pipeline by name:
//! `project` / `projects` for reads, `projectCreate` / `projectUpdate` /
//! `projectDelete` / `projectsDelete` for writes. The depth guard runs
//! before anything else; each routed field then passes the rate limiter
//! before any translation or store work happens.

use std::collections::HashMap;
use std::sync::Arc;

use async_graphql::parser::types::{
    DocumentOperations, ExecutableDocument, Field, OperationDefinition, OperationType, Selection,
};
use async_graphql::{Name, Positioned};
use serde::Deserialize;
use serde_json::Value;

use crate::engine::Engine;
use crate::error::ApiError;
use crate::graphql::pagination::parse_pagination_args;
use crate::graphql::shape::shape_from_selection;
use crate::guards::{DepthGuard, RateLimit, RateLimiter};
use crate::model::{id_from_value, Caller, Id, ObjectType, Row};
use crate::store::Filter;

/// One GraphQL HTTP request body.
#[derive(Debug, Deserialize)]
pub struct GraphRequest {
    pub query: String,
    #[serde(default)]
    pub variables: Option<Value>,
    #[serde(default, rename = "operationName")]
    pub operation_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RouteKind {
    FindUnique,
    FindMany,
    Create,
    Update,
    Delete,
    DeleteMany,
}

#[derive(Debug, Clone, Copy)]
struct Route {
    object_type: ObjectType,
    kind: RouteKind,
}

/// The executable API: engine + gates + the field routing table.
pub struct GraphQLApi {
    engine: Arc<Engine>,
    depth_guard: DepthGuard,
    limiter: RateLimiter,
    account_limit: RateLimit,
    address_limit: RateLimit,
    routes: HashMap<String, Route>,
}

impl GraphQLApi {
    pub fn new(
        engine: Arc<Engine>,
        depth_guard: DepthGuard,
        limiter: RateLimiter,
        account_limit: RateLimit,
        address_limit: RateLimit,
    ) -> Self {
        let mut routes = HashMap::new();
        for object_type in engine.registry.types() {
            let camel = object_type.camel();
            let plural = object_type.plural_camel();
            routes.insert(
                camel.to_string(),
                Route {
                    object_type,
                    kind: RouteKind::FindUnique,
                },
            );
            routes.insert(
                plural.to_string(),
                Route {
                    object_type,
                    kind: RouteKind::FindMany,
                },
            );
            for (suffix, kind) in [
                ("Create", RouteKind::Create),
                ("Update", RouteKind::Update),
                ("Delete", RouteKind::Delete),
            ] {
                routes.insert(
                    format!("{camel}{suffix}"),
                    Route { object_type, kind },
                );
            }
            routes.insert(
                format!("{plural}Delete"),
                Route {
                    object_type,
                    kind: RouteKind::DeleteMany,
                },
            );
        }
        Self {
            engine,
            depth_guard,
            limiter,
            account_limit,
            address_limit,
            routes,
        }
    }

    /// Execute one request and produce the response body.
    pub async fn execute(&self, caller: &Caller, request: GraphRequest) -> Value {
        match self.try_execute(caller, request).await {
            Ok(data) => serde_json::json!({ "data": data }),
            Err(error) => error_response(&error),
        }
    }

    async fn try_execute(
        &self,
        caller: &Caller,
        request: GraphRequest,
    ) -> Result<Value, ApiError> {
        let doc = async_graphql::parser::parse_query(&request.query)
            .map_err(|e| ApiError::MalformedQuery(e.to_string()))?;

        // The depth guard runs before any resolution or store-bound work.
        self.depth_guard.check_document(&doc)?;

        let variables = parse_variables(request.variables)?;
        let operation = pick_operation(&doc, request.operation_name.as_deref())?;

        let is_mutation = match operation.node.ty {
            OperationType::Query => false,
            OperationType::Mutation => true,
            OperationType::Subscription => {
                return Err(ApiError::MalformedQuery(
                    "subscriptions are not served on this endpoint".to_string(),
                ));
            }
        };

        let mut data = Row::new();
        for item in &operation.node.selection_set.node.items {
            let Selection::Field(field) = &item.node else {
                return Err(ApiError::MalformedQuery(
                    "top-level selections must be fields".to_string(),
                ));
            };
            let name = field.node.name.node.as_str();
            let alias = field
                .node
                .alias
                .as_ref()
                .map(|a| a.node.to_string())
                .unwrap_or_else(|| name.to_string());

            if name == "__typename" {
                let typename = if is_mutation { "Mutation" } else { "Query" };
                data.insert(alias, Value::String(typename.to_string()));
                continue;
            }

            let Some(route) = self.routes.get(name).copied() else {
                return Err(ApiError::MalformedQuery(format!(
                    "unknown top-level field `{name}`"
                )));
            };
            let writes = !matches!(route.kind, RouteKind::FindUnique | RouteKind::FindMany);
            if writes != is_mutation {
                return Err(ApiError::MalformedQuery(format!(
                    "`{name}` does not belong in a {} operation",
                    if is_mutation { "mutation" } else { "query" }
                )));
            }

            // Every routed field passes the rate limiter before any
            // translation or store work.
            let limit = if caller.is_authenticated() {
                &self.account_limit
            } else {
                &self.address_limit
            };
            self.limiter.check(name, caller, limit).await?;

            let args = arguments_to_json(&field.node, &variables)?;
            let value = self
                .dispatch(caller, route, &field.node, &doc, args)
                .await?;
            data.insert(alias, value);
        }
        Ok(Value::Object(data))
    }

    async fn dispatch(
        &self,
        caller: &Caller,
        route: Route,
        field: &Field,
        doc: &ExecutableDocument,
        args: Row,
    ) -> Result<Value, ApiError> {
        let shape = shape_from_selection(&field.selection_set.node, &doc.fragments)?;
        let object_type = route.object_type;

        match route.kind {
            RouteKind::FindUnique => {
                let id = require_id(&args, "id")?;
                let found = self
                    .engine
                    .find_unique(caller, object_type, id, &shape)
                    .await?;
                Ok(found.map(Value::Object).unwrap_or(Value::Null))
            }
            RouteKind::FindMany => {
                let mut filter = Filter::default();
                if let Some(Value::Array(ids)) = args.get("ids") {
                    let ids: Vec<Id> = ids.iter().filter_map(id_from_value).collect();
                    filter = Filter::ids(ids);
                }
                let objects = self
                    .engine
                    .find_many(caller, object_type, &filter, &shape)
                    .await?;

                let first = args.get("first").and_then(|v| v.as_i64());
                let after = args.get("after").and_then(|v| v.as_str());
                let page = if first.is_some() || after.is_some() {
                    let (offset, limit) =
                        parse_pagination_args(first, after, object_type.short_key())
                            .map_err(|e| ApiError::MalformedQuery(e.to_string()))?;
                    objects
                        .into_iter()
                        .skip(offset as usize)
                        .take(limit as usize)
                        .collect()
                } else {
                    objects
                };
                Ok(Value::Array(page.into_iter().map(Value::Object).collect()))
            }
            RouteKind::Create => {
                let input = require_object(&args, "input")?;
                let created = self
                    .engine
                    .create_one(caller, object_type, shape, input)
                    .await?;
                Ok(Value::Object(created))
            }
            RouteKind::Update => {
                let id = require_id(&args, "id")?;
                let input = require_object(&args, "input")?;
                let updated = self
                    .engine
                    .update_one(caller, object_type, shape, id, input)
                    .await?;
                Ok(Value::Object(updated))
            }
            RouteKind::Delete => {
                let id = require_id(&args, "id")?;
                let outcome = self.engine.delete_one(caller, object_type, id).await?;
                Ok(serde_json::json!({ "success": outcome.success }))
            }
            RouteKind::DeleteMany => {
                let Some(Value::Array(raw)) = args.get("ids") else {
                    return Err(ApiError::MalformedQuery(
                        "`ids` argument is required".to_string(),
                    ));
                };
                let ids: Vec<Id> = raw.iter().filter_map(id_from_value).collect();
                let outcome = self.engine.delete_many(caller, object_type, ids).await?;
                Ok(serde_json::json!({ "count": outcome.count }))
            }
        }
    }
}

fn parse_variables(
    variables: Option<Value>,
) -> Result<HashMap<String, async_graphql::Value>, ApiError> {
    let mut out = HashMap::new();
    if let Some(Value::Object(map)) = variables {
        for (name, value) in map {
            let converted = async_graphql::Value::from_json(value)
                .map_err(|e| ApiError::MalformedQuery(format!("variable ${name}: {e}")))?;
            out.insert(name, converted);
        }
    }
    Ok(out)
}

fn pick_operation<'a>(
    doc: &'a ExecutableDocument,
    operation_name: Option<&str>,
) -> Result<&'a Positioned<OperationDefinition>, ApiError> {
    match &doc.operations {
        DocumentOperations::Single(operation) => Ok(operation),
        DocumentOperations::Multiple(operations) => match operation_name {
            Some(name) => operations.get(&Name::new(name)).ok_or_else(|| {
                ApiError::MalformedQuery(format!("operation `{name}` is not defined"))
            }),
            None if operations.len() == 1 => Ok(operations.values().next().unwrap()),
            None => Err(ApiError::MalformedQuery(
                "operationName is required for multi-operation documents".to_string(),
            )),
        },
    }
}

fn arguments_to_json(
    field: &Field,
    variables: &HashMap<String, async_graphql::Value>,
) -> Result<Row, ApiError> {
    let mut args = Row::new();
    for (name, value) in &field.arguments {
        let resolved = value
            .node
            .clone()
            .into_const_with(|variable: Name| {
                variables.get(variable.as_str()).cloned().ok_or_else(|| {
                    ApiError::MalformedQuery(format!("variable ${variable} is not defined"))
                })
            })?
            .into_json()
            .map_err(|e| ApiError::MalformedQuery(format!("argument {}: {e}", name.node)))?;
        args.insert(name.node.to_string(), resolved);
    }
    Ok(args)
}

fn require_id(args: &Row, name: &str) -> Result<Id, ApiError> {
    args.get(name)
        .and_then(id_from_value)
        .ok_or_else(|| ApiError::MalformedQuery(format!("`{name}` argument must be an id")))
}

fn require_object(args: &Row, name: &str) -> Result<Row, ApiError> {
    match args.get(name) {
        Some(Value::Object(map)) => Ok(map.clone()),
        _ => Err(ApiError::MalformedQuery(format!(
            "`{name}` argument must be an object"
        ))),
    }
}

fn error_response(error: &ApiError) -> Value {
    serde_json::json!({
        "data": Value::Null,
        "errors": [{
            "message": error.to_string(),
            "extensions": {
                "code": error.code(),
                "kind": error.kind().as_str(),
            }
        }]
    })
}
