//! Stage 4: cardinality validation
//!
//! Re-counts the caller's existing rows of the type and rejects the whole
//! batch if the post-batch count would exceed the per-type ceiling.

use crate::cud::CudContext;
use crate::error::ApiError;
use crate::store::Filter;

pub(crate) async fn run(cx: &mut CudContext) -> Result<(), ApiError> {
    if cx.batch.create.is_empty() {
        return Ok(());
    }
    let object_type = cx.batch.object_type;
    let converter = cx.registry.get(object_type);
    let Some(user_field) = converter.ownership.and_then(|own| own.user_field) else {
        return Ok(());
    };
    // `id`-owned types (users, organizations) are not counted against a
    // per-caller ceiling.
    if user_field == "id" {
        return Ok(());
    }
    let caller_id = cx.caller.id.ok_or(ApiError::Unauthorized)?;

    let existing = cx
        .store
        .count(
            object_type,
            &Filter::default().with_eq(user_field, caller_id.to_string()),
        )
        .await
        .map_err(ApiError::from)?;
    let ceiling = converter
        .max_objects
        .unwrap_or(cx.limits.default_max_objects);
    let attempted = existing + cx.batch.create.len() as u64;

    if attempted > ceiling {
        return Err(ApiError::CardinalityExceeded {
            object_type,
            ceiling,
            attempted,
        });
    }
    Ok(())
}
