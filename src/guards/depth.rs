//! Query depth guard
//!
//! Pure function over the parsed query document, run before any
//! resolution. Depth rules:
//!
//! - a leaf field, or a field matched by an ignore rule (reserved
//!   introspection prefix, literal name, pattern, or predicate),
//!   contributes 0 and is not descended into;
//! - a field with a sub-selection contributes `1 + max(child depths)`;
//! - a fragment spread resolves through the fragment table at the same
//!   depth; the spread itself adds no level;
//! - inline fragments and fragment/operation definitions take the max of
//!   their selections.
//!
//! Exceeding the ceiling rejects the operation with a node-attributed
//! failure. An undefined fragment is a hard failure distinct from depth.
//! Cyclic fragment spreads fail closed instead of recursing.

use std::collections::HashMap;

use async_graphql::parser::types::{
    DocumentOperations, ExecutableDocument, FragmentDefinition, Selection, SelectionSet,
};
use async_graphql::{Name, Positioned};
use regex::Regex;

use crate::error::ApiError;

/// Reserved introspection prefix; such fields never count toward depth.
const INTROSPECTION_PREFIX: &str = "__";

/// Caller-supplied rule marking fields the guard should skip entirely.
pub enum IgnoreRule {
    Name(String),
    Pattern(Regex),
    Predicate(fn(&str) -> bool),
}

pub struct DepthGuard {
    ceiling: usize,
    ignore: Vec<IgnoreRule>,
}

impl DepthGuard {
    pub fn new(ceiling: usize) -> Self {
        Self {
            ceiling,
            ignore: Vec::new(),
        }
    }

    pub fn with_ignored(mut self, rule: IgnoreRule) -> Self {
        self.ignore.push(rule);
        self
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    fn is_ignored(&self, name: &str) -> bool {
        if name.starts_with(INTROSPECTION_PREFIX) {
            return true;
        }
        self.ignore.iter().any(|rule| match rule {
            IgnoreRule::Name(literal) => literal == name,
            IgnoreRule::Pattern(pattern) => pattern.is_match(name),
            IgnoreRule::Predicate(predicate) => predicate(name),
        })
    }

    /// Validate every operation in a document independently.
    pub fn check_document(&self, doc: &ExecutableDocument) -> Result<(), ApiError> {
        match &doc.operations {
            DocumentOperations::Single(operation) => self.check_operation(
                None,
                &operation.node.selection_set.node,
                &doc.fragments,
            ),
            DocumentOperations::Multiple(operations) => {
                for (name, operation) in operations {
                    self.check_operation(
                        Some(name.as_str()),
                        &operation.node.selection_set.node,
                        &doc.fragments,
                    )?;
                }
                Ok(())
            }
        }
    }

    fn check_operation(
        &self,
        operation: Option<&str>,
        selection_set: &SelectionSet,
        fragments: &HashMap<Name, Positioned<FragmentDefinition>>,
    ) -> Result<(), ApiError> {
        let mut active_fragments = Vec::new();
        self.walk(operation, selection_set, fragments, 0, &mut active_fragments)
            .map(|_| ())
    }

    /// Returns the max depth reached under `selection_set`, with `current`
    /// levels already entered above it.
    fn walk(
        &self,
        operation: Option<&str>,
        selection_set: &SelectionSet,
        fragments: &HashMap<Name, Positioned<FragmentDefinition>>,
        current: usize,
        active_fragments: &mut Vec<String>,
    ) -> Result<usize, ApiError> {
        let mut max_depth = current;
        for item in &selection_set.items {
            let depth = match &item.node {
                Selection::Field(field) => {
                    let name = field.node.name.node.as_str();
                    if self.is_ignored(name) || field.node.selection_set.node.items.is_empty() {
                        current
                    } else {
                        let entered = current + 1;
                        if entered > self.ceiling {
                            let pos = field.node.name.pos;
                            return Err(ApiError::DepthExceeded {
                                operation: operation.map(str::to_string),
                                node: name.to_string(),
                                line: pos.line,
                                column: pos.column,
                                depth: entered,
                                ceiling: self.ceiling,
                            });
                        }
                        self.walk(
                            operation,
                            &field.node.selection_set.node,
                            fragments,
                            entered,
                            active_fragments,
                        )?
                    }
                }
                Selection::FragmentSpread(spread) => {
                    let name = spread.node.fragment_name.node.as_str();
                    let Some(fragment) = fragments.get(&spread.node.fragment_name.node) else {
                        return Err(ApiError::MalformedQuery(format!(
                            "fragment `{name}` is not defined"
                        )));
                    };
                    if active_fragments.iter().any(|active| active == name) {
                        return Err(ApiError::MalformedQuery(format!(
                            "fragment `{name}` spreads itself cyclically"
                        )));
                    }
                    active_fragments.push(name.to_string());
                    // The spread resolves at the same depth; it adds no level.
                    let depth = self.walk(
                        operation,
                        &fragment.node.selection_set.node,
                        fragments,
                        current,
                        active_fragments,
                    )?;
                    active_fragments.pop();
                    depth
                }
                Selection::InlineFragment(inline) => self.walk(
                    operation,
                    &inline.node.selection_set.node,
                    fragments,
                    current,
                    active_fragments,
                )?,
            };
            max_depth = max_depth.max(depth);
        }
        Ok(max_depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_graphql::parser::parse_query;

    fn check(guard: &DepthGuard, query: &str) -> Result<(), ApiError> {
        let doc = parse_query(query).expect("query parses");
        guard.check_document(&doc)
    }

    /// A chain of nested fields computing to the given depth.
    fn chain(depth: usize) -> String {
        let mut query = String::from("{ ");
        for i in 0..=depth {
            query.push_str(&format!("f{i} {{ "));
        }
        query.push_str("leaf");
        for _ in 0..=depth {
            query.push_str(" }");
        }
        query.push('}');
        query
    }

    #[test]
    fn test_exact_ceiling_passes_and_one_more_fails() {
        let guard = DepthGuard::new(8);
        assert!(check(&guard, &chain(7)).is_ok());
        assert_matches!(
            check(&guard, &chain(8)),
            Err(ApiError::DepthExceeded { depth: 9, ceiling: 8, .. })
        );
    }

    #[test]
    fn test_failure_is_node_attributed() {
        let guard = DepthGuard::new(2);
        let err = check(&guard, "{ a { b { c { d } } } }").unwrap_err();
        assert_matches!(err, ApiError::DepthExceeded { ref node, depth: 3, .. } if node == "c");
    }

    #[test]
    fn test_fragment_spread_adds_no_level() {
        let guard = DepthGuard::new(3);
        let inline = "{ a { b { c { id } } } }";
        let with_fragment = "{ a { ...rest } } fragment rest on A { b { c { id } } }";
        assert_eq!(check(&guard, inline).is_ok(), check(&guard, with_fragment).is_ok());

        let guard = DepthGuard::new(2);
        assert_matches!(check(&guard, inline), Err(ApiError::DepthExceeded { .. }));
        assert_matches!(
            check(&guard, with_fragment),
            Err(ApiError::DepthExceeded { .. })
        );
    }

    #[test]
    fn test_inline_fragments_add_no_level() {
        let guard = DepthGuard::new(2);
        assert!(check(&guard, "{ a { ... on Project { b { id } } } }").is_ok());
    }

    #[test]
    fn test_introspection_prefix_is_ignored() {
        let guard = DepthGuard::new(1);
        assert!(check(&guard, "{ __schema { types { fields { name } } } }").is_ok());
    }

    #[test]
    fn test_ignore_rules() {
        let by_name = DepthGuard::new(1).with_ignored(IgnoreRule::Name("debug".into()));
        assert!(check(&by_name, "{ debug { a { b { c } } } }").is_ok());

        let by_pattern = DepthGuard::new(1)
            .with_ignored(IgnoreRule::Pattern(Regex::new("^internal").unwrap()));
        assert!(check(&by_pattern, "{ internalTrace { a { b } } }").is_ok());

        let by_predicate = DepthGuard::new(1)
            .with_ignored(IgnoreRule::Predicate(|name| name.ends_with("Meta")));
        assert!(check(&by_predicate, "{ pageMeta { a { b } } }").is_ok());
    }

    #[test]
    fn test_undefined_fragment_is_a_hard_failure() {
        let guard = DepthGuard::new(8);
        assert_matches!(
            check(&guard, "{ a { ...missing } }"),
            Err(ApiError::MalformedQuery(_))
        );
    }

    #[test]
    fn test_cyclic_fragments_fail_closed() {
        let guard = DepthGuard::new(8);
        let query = "{ a { ...one } } \
                     fragment one on A { b { ...two } } \
                     fragment two on B { c { ...one } }";
        assert_matches!(check(&guard, query), Err(ApiError::MalformedQuery(_)));
    }

    #[test]
    fn test_multiple_operations_checked_independently() {
        let guard = DepthGuard::new(2);
        let query = "query Shallow { a { id } } query Deep { a { b { c { id } } } }";
        let err = check(&guard, query).unwrap_err();
        assert_matches!(
            err,
            ApiError::DepthExceeded { operation: Some(ref op), .. } if op == "Deep"
        );
    }
}
