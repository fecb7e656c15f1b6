//! Stage 2: content-safety scan
//!
//! Recursively collects every free-text field requiring scanning and hands
//! the whole set to the detector in one batched call. Covers translation
//! sub-objects at any nesting depth, per-type flagged fields (handles, tag
//! text), and plain-string tag-connection values. Descent follows nested
//! create/update keys whose base resolves through the relationship map;
//! unresolvable nested objects are scanned conservatively rather than
//! skipped.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::cud::CudContext;
use crate::error::ApiError;
use crate::model::Row;
use crate::registry::{FormatConverter, Rel, TypeRegistry};

/// `id` and foreign-key-suffixed fields are identifiers, never prose.
static IDENTIFIER_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^id$|Id$").expect("identifier pattern"));

pub(crate) async fn run(cx: &mut CudContext) -> Result<(), ApiError> {
    let converter = cx.registry.get(cx.batch.object_type);
    let mut texts = Vec::new();

    for data in &cx.batch.create {
        collect_texts(&cx.registry, converter, data, &mut texts);
    }
    for item in &cx.batch.update {
        collect_texts(&cx.registry, converter, &item.data, &mut texts);
    }

    if texts.is_empty() {
        return Ok(());
    }
    if cx.detector.flagged(&texts).await.map_err(ApiError::from)? {
        return Err(ApiError::ContentFlagged);
    }
    Ok(())
}

/// Collect every string the safety scan must cover from one payload.
pub fn collect_texts(
    registry: &TypeRegistry,
    converter: &FormatConverter,
    data: &Row,
    out: &mut Vec<String>,
) {
    for (key, value) in data {
        if key == "translationsCreate" || key == "translationsUpdate" {
            collect_translation_texts(value, out);
            continue;
        }
        if converter.is_flagged(key) {
            if let Value::String(text) = value {
                out.push(text.clone());
            }
            continue;
        }
        if let Some(base) = key.strip_suffix("Connect") {
            // Plain-string connection values (e.g. tags connected by name)
            // are caller-provided text.
            if converter.rel(base).is_some() {
                if let Value::Array(items) = value {
                    for item in items {
                        if let Value::String(text) = item {
                            out.push(text.clone());
                        }
                    }
                }
            }
            continue;
        }
        let base = key
            .strip_suffix("Create")
            .or_else(|| key.strip_suffix("Update"));
        if let Some(base) = base {
            match converter.rel(base) {
                Some(Rel::One(to)) | Some(Rel::Many(to)) | Some(Rel::Joined { to, .. }) => {
                    let child = registry.get(*to);
                    for_each_object(value, &mut |obj| {
                        collect_texts(registry, child, obj, out)
                    });
                }
                Some(Rel::Translations) => collect_translation_texts(value, out),
                // Unions carry no single concrete type, and unknown bases
                // cannot be resolved at all: scan conservatively instead of
                // silently skipping.
                Some(Rel::Union { .. }) | None => collect_conservatively(value, out),
            }
        }
    }
}

fn collect_translation_texts(value: &Value, out: &mut Vec<String>) {
    for_each_object(value, &mut |translation| {
        for (key, field) in translation {
            if IDENTIFIER_KEY.is_match(key) || key == "language" {
                continue;
            }
            if let Value::String(text) = field {
                out.push(text.clone());
            }
        }
    });
}

/// Conservative fallback: every string field except identifiers, at any
/// depth.
fn collect_conservatively(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(obj) => {
            for (key, field) in obj {
                if IDENTIFIER_KEY.is_match(key) || key == "language" {
                    continue;
                }
                match field {
                    Value::String(text) => out.push(text.clone()),
                    Value::Object(_) | Value::Array(_) => collect_conservatively(field, out),
                    _ => {}
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_conservatively(item, out);
            }
        }
        _ => {}
    }
}

fn for_each_object(value: &Value, f: &mut impl FnMut(&Row)) {
    match value {
        Value::Object(obj) => f(obj),
        Value::Array(items) => {
            for item in items {
                if let Value::Object(obj) = item {
                    f(obj);
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ObjectType;
    use serde_json::json;

    fn collect(object_type: ObjectType, data: serde_json::Value) -> Vec<String> {
        let registry = TypeRegistry::new();
        let converter = registry.get(object_type);
        let mut out = Vec::new();
        collect_texts(&registry, converter, data.as_object().unwrap(), &mut out);
        out
    }

    #[test]
    fn test_flagged_fields_and_tag_connections() {
        let texts = collect(
            ObjectType::Project,
            json!({
                "handle": "myproject",
                "isPrivate": true,
                "tagsConnect": ["alpha", "beta"]
            }),
        );
        assert_eq!(texts, vec!["myproject", "alpha", "beta"]);
    }

    #[test]
    fn test_translations_exclude_identifiers() {
        let texts = collect(
            ObjectType::Project,
            json!({
                "translationsCreate": [
                    { "id": "t-1", "language": "en", "name": "Atlas", "parentId": "x" }
                ]
            }),
        );
        assert_eq!(texts, vec!["Atlas"]);
    }

    #[test]
    fn test_three_levels_of_nested_creates() {
        let texts = collect(
            ObjectType::Routine,
            json!({
                "nodesCreate": [
                    {
                        "nodeType": "start",
                        "translationsCreate": [
                            { "id": "t-1", "language": "en", "title": "deep title" }
                        ]
                    }
                ]
            }),
        );
        assert!(texts.contains(&"deep title".to_string()));
        // Structural values never enter the scan.
        assert!(!texts.contains(&"start".to_string()));
    }

    #[test]
    fn test_unresolvable_nested_objects_scanned_conservatively() {
        let texts = collect(
            ObjectType::Project,
            json!({
                "attachmentsCreate": [
                    { "label": "suspicious words", "ownerId": "u-1" }
                ]
            }),
        );
        assert_eq!(texts, vec!["suspicious words"]);
    }
}
