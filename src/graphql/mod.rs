//! GraphQL API surface
//!
//! The wire protocol is a declarative graph query language over HTTP at a
//! versioned path. Documents are parsed with the async-graphql parser and
//! routed by top-level field name onto the read path and the CUD pipeline;
//! the depth guard and rate limiter run before any store-bound work.

pub mod auth;
pub mod endpoint;
pub mod pagination;
pub mod shape;

pub use auth::{caller_from_headers, verify_token, AuthUser};
pub use endpoint::{GraphQLApi, GraphRequest};
pub use shape::shape_from_selection;
