//! Stage 1: structural validation
//!
//! Every create/update payload in the batch is checked against the
//! per-type schema; all violations are collected and reported together,
//! and nothing is written if any exist.

use crate::cud::CudContext;
use crate::error::ApiError;
use crate::services::WriteMode;

pub(crate) async fn run(cx: &mut CudContext) -> Result<(), ApiError> {
    let converter = cx.registry.get(cx.batch.object_type);
    let mut violations = Vec::new();

    for (index, data) in cx.batch.create.iter().enumerate() {
        violations.extend(
            cx.validator
                .validate(converter, index, data, WriteMode::Create, true),
        );
    }
    for (index, item) in cx.batch.update.iter().enumerate() {
        violations.extend(
            cx.validator
                .validate(converter, index, &item.data, WriteMode::Update, true),
        );
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ApiError::StructuralInvalid(violations))
    }
}
