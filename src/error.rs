//! Typed failure taxonomy exposed to API clients
//!
//! Every failure carries a stable `code` plus a `kind` so clients can
//! branch without string-matching messages. Conversion to a GraphQL error
//! puts both into the error extensions.

use async_graphql::ErrorExtensions;

use crate::model::{Id, ObjectType};

/// A single structural-validation violation. All violations in a batch are
/// collected and reported together; nothing is written if any exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub object_type: ObjectType,
    /// Index of the offending item within the batch.
    pub index: usize,
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}[{}].{}: {}",
            self.object_type, self.index, self.field, self.message
        )
    }
}

/// Coarse failure category for client branching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Safety,
    Auth,
    NotFound,
    Limit,
    Query,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Safety => "safety",
            ErrorKind::Auth => "auth",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Limit => "limit",
            ErrorKind::Query => "query",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("structural validation failed with {} violation(s)", .0.len())]
    StructuralInvalid(Vec<Violation>),

    #[error("content was flagged by the safety scan")]
    ContentFlagged,

    #[error("caller is not authorized to perform this operation")]
    Unauthorized,

    #[error("{object_type} {id} not found")]
    NotFound { object_type: ObjectType, id: Id },

    #[error("{0} does not support mutation")]
    MutationNotSupported(ObjectType),

    #[error(
        "creating {attempted} {object_type} object(s) would exceed the ceiling of {ceiling}"
    )]
    CardinalityExceeded {
        object_type: ObjectType,
        ceiling: u64,
        attempted: u64,
    },

    #[error("rate limit exceeded for {operation} (ceiling {ceiling})")]
    RateLimitExceeded { operation: String, ceiling: u64 },

    #[error(
        "query depth {depth} at `{node}` ({line}:{column}) exceeds the ceiling of {ceiling}"
    )]
    DepthExceeded {
        operation: Option<String>,
        node: String,
        line: usize,
        column: usize,
        depth: usize,
        ceiling: usize,
    },

    #[error("malformed query: {0}")]
    MalformedQuery(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::StructuralInvalid(_) => "VALIDATION_FAILED",
            ApiError::ContentFlagged => "CONTENT_FLAGGED",
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::NotFound { .. } => "NOT_FOUND",
            ApiError::MutationNotSupported(_) => "MUTATION_NOT_SUPPORTED",
            ApiError::CardinalityExceeded { .. } => "MAX_OBJECTS_EXCEEDED",
            ApiError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            ApiError::DepthExceeded { .. } => "DEPTH_EXCEEDED",
            ApiError::MalformedQuery(_) => "MALFORMED_QUERY",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::StructuralInvalid(_) => ErrorKind::Validation,
            ApiError::ContentFlagged => ErrorKind::Safety,
            ApiError::Unauthorized => ErrorKind::Auth,
            ApiError::NotFound { .. } => ErrorKind::NotFound,
            ApiError::MutationNotSupported(_) => ErrorKind::Validation,
            ApiError::CardinalityExceeded { .. } => ErrorKind::Limit,
            ApiError::RateLimitExceeded { .. } => ErrorKind::Limit,
            ApiError::DepthExceeded { .. } => ErrorKind::Query,
            ApiError::MalformedQuery(_) => ErrorKind::Query,
            ApiError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Convert to a GraphQL error with `code` and `kind` extensions.
    pub fn to_graphql(&self) -> async_graphql::Error {
        let code = self.code();
        let kind = self.kind().as_str();
        async_graphql::Error::new(self.to_string()).extend_with(|_, e| {
            e.set("code", code);
            e.set("kind", kind);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ApiError::ContentFlagged.code(), "CONTENT_FLAGGED");
        assert_eq!(ApiError::Unauthorized.code(), "UNAUTHORIZED");
        assert_eq!(
            ApiError::MutationNotSupported(ObjectType::StandardVersion).code(),
            "MUTATION_NOT_SUPPORTED"
        );
    }

    #[test]
    fn test_graphql_conversion_carries_extensions() {
        let error = ApiError::ContentFlagged.to_graphql();
        assert_eq!(error.message, ApiError::ContentFlagged.to_string());
        assert!(error.extensions.is_some());
    }

    #[test]
    fn test_kind_partitions() {
        assert_eq!(ApiError::ContentFlagged.kind(), ErrorKind::Safety);
        assert_eq!(
            ApiError::RateLimitExceeded {
                operation: "projectCreate".into(),
                ceiling: 1000
            }
            .kind(),
            ErrorKind::Limit
        );
        assert_eq!(
            ApiError::MalformedQuery("cyclic fragment".into()).kind(),
            ErrorKind::Query
        );
    }
}
