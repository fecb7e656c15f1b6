//! Stage 3: ownership and permission validation
//!
//! Updates and deletes require the caller to own the target or hold a
//! qualifying role in the owning organization. Creates declaring an
//! organization owner require the caller to be an accepted member of it.
//! Ownership-transfer-sensitive fields go through the per-type transfer
//! validator; without one, touching them is rejected.
//!
//! Missing update targets are NotFound. Missing delete targets are
//! tolerated here: the bulk delete simply affects fewer rows, which is how
//! delete-one reports `success=false` for ids that never existed.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::cud::CudContext;
use crate::error::ApiError;
use crate::model::{id_from_value, Id, ObjectType, Row};
use crate::selection::StoreSelect;
use crate::store::{Filter, StoreClient};

const QUALIFYING_ROLES: &[&str] = &["Owner", "Admin"];

pub(crate) async fn run(cx: &mut CudContext) -> Result<(), ApiError> {
    let object_type = cx.batch.object_type;
    let converter = cx.registry.get(object_type);
    let caller_id = cx.caller.id.ok_or(ApiError::Unauthorized)?;
    let caller_value = Value::String(caller_id.to_string());

    let mut target_ids: Vec<Id> = cx.batch.update.iter().map(|item| item.id).collect();
    target_ids.extend(cx.batch.delete.iter().copied());

    if !target_ids.is_empty() {
        // Types without ownership information cannot be mutated directly;
        // they change through their parent's nested writes.
        let Some(own) = converter.ownership else {
            return Err(ApiError::Unauthorized);
        };

        let mut select = StoreSelect::new().with_column("id");
        if let Some(field) = own.user_field {
            select = select.with_column(field);
        }
        if let Some(field) = own.org_field {
            select = select.with_column(field);
        }
        let rows = cx
            .store
            .find_many(object_type, &Filter::ids(target_ids), &select)
            .await
            .map_err(ApiError::from)?;
        let by_id: HashMap<Id, Row> = rows
            .into_iter()
            .filter_map(|row| row.get("id").and_then(id_from_value).map(|id| (id, row)))
            .collect();

        for item in &cx.batch.update {
            if !by_id.contains_key(&item.id) {
                return Err(ApiError::NotFound {
                    object_type,
                    id: item.id,
                });
            }
        }
        cx.existing_delete_ids = cx
            .batch
            .delete
            .iter()
            .copied()
            .filter(|id| by_id.contains_key(id))
            .collect();

        let mut admin_orgs: HashSet<Id> = HashSet::new();
        for row in by_id.values() {
            let owned_by_caller = own
                .user_field
                .and_then(|field| row.get(field))
                .is_some_and(|value| value == &caller_value);
            if owned_by_caller {
                continue;
            }
            match own
                .org_field
                .and_then(|field| row.get(field))
                .and_then(id_from_value)
            {
                Some(org_id) => {
                    admin_orgs.insert(org_id);
                }
                None => return Err(ApiError::Unauthorized),
            }
        }
        if !admin_orgs.is_empty() {
            require_membership(
                cx.store.as_ref(),
                &caller_value,
                &admin_orgs,
                true,
            )
            .await?;
        }

        // Ownership transfers are validated by the per-type validator.
        for item in &cx.batch.update {
            let touches_owner = [own.user_field, own.org_field]
                .into_iter()
                .flatten()
                .any(|field| item.data.contains_key(field));
            if !touches_owner {
                continue;
            }
            let Some(current) = by_id.get(&item.id) else {
                continue;
            };
            match &converter.transfer {
                Some(validator) => {
                    validator
                        .validate(cx.store.as_ref(), &cx.caller, current, &item.data)
                        .await?
                }
                None => return Err(ApiError::Unauthorized),
            }
        }
    }

    if !cx.batch.create.is_empty() {
        if let Some(own) = converter.ownership {
            let mut member_orgs: HashSet<Id> = HashSet::new();
            for data in &cx.batch.create {
                if let Some(field) = own.user_field {
                    // `id`-owned types become owned by their creator; for
                    // everything else a declared user owner must be the
                    // caller.
                    if field != "id" {
                        if let Some(value) = data.get(field) {
                            if !value.is_null() && value != &caller_value {
                                return Err(ApiError::Unauthorized);
                            }
                        }
                    }
                }
                if let Some(field) = own.org_field {
                    if field != "id" {
                        if let Some(org_id) = data.get(field).and_then(id_from_value) {
                            member_orgs.insert(org_id);
                        }
                    }
                }
            }
            if !member_orgs.is_empty() {
                require_membership(cx.store.as_ref(), &caller_value, &member_orgs, false)
                    .await?;
            }
        }
    }

    Ok(())
}

/// One batched membership read for all organizations in question. With
/// `require_admin`, membership must also carry a qualifying role.
async fn require_membership(
    store: &dyn StoreClient,
    caller_value: &Value,
    org_ids: &HashSet<Id>,
    require_admin: bool,
) -> Result<(), ApiError> {
    let org_values: Vec<Value> = org_ids
        .iter()
        .map(|id| Value::String(id.to_string()))
        .collect();
    let select = StoreSelect::new()
        .with_column("id")
        .with_column("role")
        .with_column("isAccepted")
        .with_column("organizationId");
    let memberships = store
        .find_many(
            ObjectType::Member,
            &Filter::default()
                .with_eq("userId", caller_value.clone())
                .with_any("organizationId", org_values),
            &select,
        )
        .await
        .map_err(ApiError::from)?;

    for org_id in org_ids {
        let qualifies = memberships.iter().any(|member| {
            member
                .get("organizationId")
                .and_then(id_from_value)
                .is_some_and(|id| id == *org_id)
                && member.get("isAccepted") == Some(&Value::Bool(true))
                && (!require_admin
                    || member
                        .get("role")
                        .and_then(|r| r.as_str())
                        .is_some_and(|role| QUALIFYING_ROLES.contains(&role)))
        });
        if !qualifies {
            return Err(ApiError::Unauthorized);
        }
    }
    Ok(())
}
