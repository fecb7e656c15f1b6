//! Stages 6–7: execution and output conversion
//!
//! Creates and updates execute sequentially, one item at a time. That is a
//! correctness requirement, not a performance choice: later items in the
//! same batch may reference identifiers generated by earlier items, so the
//! order must hold. A mid-batch failure leaves earlier items applied; the
//! batch is not wrapped in one cross-item transaction (see DESIGN.md).
//! Deletes run as a single bulk call returning the affected-row count.

use crate::augment;
use crate::cud::CudContext;
use crate::error::ApiError;
use crate::selection::{from_row, to_store_shape};

pub(crate) async fn run(cx: &mut CudContext) -> Result<(), ApiError> {
    let object_type = cx.batch.object_type;
    let select = to_store_shape(&cx.annotated);

    // Sequential on purpose; do not parallelize.
    for data in std::mem::take(&mut cx.shaped_creates) {
        let row = cx
            .store
            .create(object_type, data, &select)
            .await
            .map_err(ApiError::from)?;
        cx.created.push(row);
    }

    for (id, data) in std::mem::take(&mut cx.shaped_updates) {
        match cx
            .store
            .update(object_type, id, data, &select)
            .await
            .map_err(ApiError::from)?
        {
            Some(row) => cx.updated.push(row),
            // The target passed validation but vanished before execution.
            None => return Err(ApiError::NotFound { object_type, id }),
        }
    }

    if !cx.batch.delete.is_empty() {
        let count = cx
            .store
            .delete_many(object_type, &cx.batch.delete)
            .await
            .map_err(ApiError::from)?;
        if count == 0 && !cx.existing_delete_ids.is_empty() {
            return Err(ApiError::Internal(anyhow::anyhow!(
                "bulk delete affected 0 rows but {} target(s) were verified",
                cx.existing_delete_ids.len()
            )));
        }
        cx.deleted = Some(count);
    }
    Ok(())
}

/// Convert each written row back through the selection translator, then
/// run one batched enrichment across the whole created/updated set: a
/// single supplemental read, not one per row.
pub(crate) async fn convert_output(cx: &mut CudContext) -> Result<(), ApiError> {
    if cx.created.is_empty() && cx.updated.is_empty() {
        return Ok(());
    }

    let created_count = cx.created.len();
    let created_raw = std::mem::take(&mut cx.created);
    let updated_raw = std::mem::take(&mut cx.updated);
    let mut all: Vec<_> = created_raw
        .iter()
        .chain(updated_raw.iter())
        .map(|row| from_row(row, &cx.annotated))
        .collect();

    augment::enrich(
        &cx.registry,
        cx.store.as_ref(),
        &cx.caller,
        &cx.annotated,
        &mut all,
    )
    .await?;

    let updated = all.split_off(created_count);
    cx.created = all;
    cx.updated = updated;
    Ok(())
}
