//! Error handling, retry, circuit breaking and dead-letter routing
//! (spec.md §4.5).
//!
//! None of the selected teacher crates ship a retry/backoff/circuit-breaker
//! module (ironbeam is a batch engine with no transient-fault handling;
//! nvisy-runtime surfaces errors but does not retry them), so this module
//! is built directly from spec.md §4.5's algorithm description, using the
//! same error-type idiom (`thiserror`-derived enums with node-id-carrying
//! variants) as [`crate::error`] and the same `RwLock`-guarded-map
//! concurrency idiom as [`crate::plan::cache`].

pub mod circuit_breaker;
pub mod dead_letter;
pub mod handler;
pub mod policy;

pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerEntry, CircuitBreakerTable, CircuitState};
pub use dead_letter::{DeadLetterEnvelope, DeadLetterSink, InMemoryDeadLetterSink};
pub use handler::{Always, NodeErrorDecision, NodeErrorHandler};
pub use policy::{BackoffStrategy, ExhaustionAction, RetryPolicy};
