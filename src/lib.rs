//! Atelier backend core
//!
//! Request-shape translation and mutation-validation pipeline for the
//! Atelier collaborative content platform. The crate sits between the
//! GraphQL API surface and the relational store:
//!
//! - the [`selection`] module translates nested field-selection requests
//!   into store-native select trees and converts returned rows back,
//! - the [`cud`] module validates and shapes create/update/delete batches
//!   through an ordered stage pipeline before anything is written,
//! - the [`augment`] module batch-computes viewer-relative and aggregate
//!   fields after the base query,
//! - the [`guards`] module holds the query-depth guard and the
//!   fixed-window rate limiter that protect both paths.
//!
//! The relational store, content-safety detector, structural-schema
//! validator, and event-notification sink are collaborators behind traits
//! in [`store`] and [`services`]; in-memory implementations back the dev
//! server and the test suite.

pub mod augment;
pub mod config;
pub mod cud;
pub mod engine;
pub mod error;
pub mod graphql;
pub mod guards;
pub mod model;
pub mod registry;
pub mod selection;
pub mod services;
pub mod store;

pub use engine::Engine;
pub use error::{ApiError, ErrorKind, Violation};
pub use model::{Caller, Id, ObjectType};
pub use registry::TypeRegistry;
