//! Parsed GraphQL selection set → raw selection shape (form 1)
//!
//! Fragment spreads fold into the surrounding selection at the same level;
//! inline fragments with a type condition key their fields by the concrete
//! type name, which is how union branches arrive at the annotator.

use std::collections::HashMap;

use async_graphql::parser::types::{FragmentDefinition, Selection, SelectionSet};
use async_graphql::{Name, Positioned};

use crate::error::ApiError;
use crate::selection::{FieldSelection, SelectionShape};

pub fn shape_from_selection(
    selection_set: &SelectionSet,
    fragments: &HashMap<Name, Positioned<FragmentDefinition>>,
) -> Result<SelectionShape, ApiError> {
    let mut shape = SelectionShape::new();
    for item in &selection_set.items {
        match &item.node {
            Selection::Field(field) => {
                let name = field.node.name.node.as_str();
                // Introspection fields are handled by the surface itself.
                if name.starts_with("__") {
                    continue;
                }
                if field.node.selection_set.node.items.is_empty() {
                    shape.merge(SelectionShape::new().with_leaf(name));
                } else {
                    let nested =
                        shape_from_selection(&field.node.selection_set.node, fragments)?;
                    shape.merge(SelectionShape::new().with_nested(name, nested));
                }
            }
            Selection::FragmentSpread(spread) => {
                let name = &spread.node.fragment_name.node;
                let Some(fragment) = fragments.get(name) else {
                    return Err(ApiError::MalformedQuery(format!(
                        "fragment `{name}` is not defined"
                    )));
                };
                // Cycles were already rejected by the depth guard.
                let folded =
                    shape_from_selection(&fragment.node.selection_set.node, fragments)?;
                shape.merge(folded);
            }
            Selection::InlineFragment(inline) => {
                let nested =
                    shape_from_selection(&inline.node.selection_set.node, fragments)?;
                match &inline.node.type_condition {
                    Some(condition) => {
                        let type_name = condition.node.on.node.as_str();
                        shape.merge(SelectionShape::new().with_nested(type_name, nested));
                    }
                    None => shape.merge(nested),
                }
            }
        }
    }
    Ok(shape)
}
