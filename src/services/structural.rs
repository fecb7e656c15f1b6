//! Structural-schema validation
//!
//! Checks create/update payloads against the per-type structural schema
//! (required fields, string bounds). The pipeline collects every violation
//! in a batch and reports them together; nothing is written if any exist.

use serde_json::Value;

use crate::error::Violation;
use crate::model::Row;
use crate::registry::FormatConverter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Create,
    Update,
}

/// Collaborator contract: `validate(data, {collectAll}) → errors[]`.
pub trait StructuralValidator: Send + Sync {
    fn validate(
        &self,
        converter: &FormatConverter,
        index: usize,
        data: &Row,
        mode: WriteMode,
        collect_all: bool,
    ) -> Vec<Violation>;
}

/// Default validator over the converter's declared schema rules.
pub struct SchemaRulesValidator;

impl StructuralValidator for SchemaRulesValidator {
    fn validate(
        &self,
        converter: &FormatConverter,
        index: usize,
        data: &Row,
        mode: WriteMode,
        collect_all: bool,
    ) -> Vec<Violation> {
        let mut violations = Vec::new();
        let mut push = |violations: &mut Vec<Violation>, field: &str, message: String| {
            violations.push(Violation {
                object_type: converter.object_type,
                index,
                field: field.to_string(),
                message,
            });
        };

        if mode == WriteMode::Create {
            for field in converter.schema.required_on_create {
                let missing = matches!(data.get(*field), None | Some(Value::Null));
                if missing {
                    push(&mut violations, field, "is required".to_string());
                    if !collect_all {
                        return violations;
                    }
                }
            }
        }

        for (field, min, max) in converter.schema.string_bounds {
            match data.get(*field) {
                None | Some(Value::Null) => {}
                Some(Value::String(s)) => {
                    let len = s.chars().count();
                    if len < *min || len > *max {
                        push(
                            &mut violations,
                            field,
                            format!("must be between {min} and {max} characters, got {len}"),
                        );
                        if !collect_all {
                            return violations;
                        }
                    }
                }
                Some(_) => {
                    push(&mut violations, field, "must be a string".to_string());
                    if !collect_all {
                        return violations;
                    }
                }
            }
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ObjectType;
    use crate::registry::TypeRegistry;
    use serde_json::json;

    fn data(value: serde_json::Value) -> Row {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_required_fields_on_create() {
        let registry = TypeRegistry::new();
        let converter = registry.get(ObjectType::Tag);
        let violations = SchemaRulesValidator.validate(
            converter,
            0,
            &data(json!({ "id": "x" })),
            WriteMode::Create,
            true,
        );
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].field, "tag");
    }

    #[test]
    fn test_required_fields_not_checked_on_update() {
        let registry = TypeRegistry::new();
        let converter = registry.get(ObjectType::Tag);
        let violations = SchemaRulesValidator.validate(
            converter,
            0,
            &data(json!({ "id": "x" })),
            WriteMode::Update,
            true,
        );
        assert!(violations.is_empty());
    }

    #[test]
    fn test_string_bounds_collect_all() {
        let registry = TypeRegistry::new();
        let converter = registry.get(ObjectType::Standard);
        let violations = SchemaRulesValidator.validate(
            converter,
            2,
            &data(json!({ "name": "", "props": 7 })),
            WriteMode::Create,
            true,
        );
        // Empty name breaks the lower bound, numeric props the type rule.
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0].index, 2);
    }

    #[test]
    fn test_short_circuit_without_collect_all() {
        let registry = TypeRegistry::new();
        let converter = registry.get(ObjectType::Standard);
        let violations = SchemaRulesValidator.validate(
            converter,
            0,
            &data(json!({ "name": "", "props": 7 })),
            WriteMode::Create,
            false,
        );
        assert_eq!(violations.len(), 1);
    }
}
