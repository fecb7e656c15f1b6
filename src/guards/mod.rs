//! Request gates that run before any store-bound work
//!
//! The depth guard and rate limiter are algorithmically self-contained and
//! bound the work wasted on rejected requests: both run before translation
//! or resolution begins.

pub mod depth;
pub mod rate_limit;

pub use depth::{DepthGuard, IgnoreRule};
pub use rate_limit::{CounterStore, MemoryCounterStore, RateLimit, RateLimiter};
