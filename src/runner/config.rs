//! Runner tunables, grounded on `nvisy_runtime::engine::config::EngineConfig`.

use std::sync::Arc;
use std::time::Duration;

use crate::pipe::branch::BranchOptions;
use crate::retry::{CircuitBreakerConfig, DeadLetterSink};

/// Configuration for a [`super::Runner`].
#[derive(Clone)]
pub struct RunnerConfig {
    /// Bounds the number of concurrent `run()` calls via a
    /// `tokio::sync::Semaphore`, mirroring `Engine::new`'s construction of
    /// `Arc<Semaphore>`.
    pub max_concurrent_runs: usize,
    /// Per-node timeout applied when a node doesn't set its own; `None`
    /// means no timeout.
    pub default_timeout: Option<Duration>,
    /// Branch options applied to a node's output pipe when it isn't
    /// overridden on the node itself.
    pub default_branch_options: BranchOptions,
    /// Default circuit breaker configuration applied to every node.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Where `NodeErrorDecision::DeadLetter` routes items; `None` drops
    /// them and still records the failure on `PipelineResult::errors`.
    pub dead_letter_sink: Option<Arc<dyn DeadLetterSink>>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: 4,
            default_timeout: None,
            default_branch_options: BranchOptions::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            dead_letter_sink: None,
        }
    }
}

impl std::fmt::Debug for RunnerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerConfig")
            .field("max_concurrent_runs", &self.max_concurrent_runs)
            .field("default_timeout", &self.default_timeout)
            .field("default_branch_options", &self.default_branch_options)
            .field("circuit_breaker", &self.circuit_breaker)
            .field("dead_letter_sink", &self.dead_letter_sink.is_some())
            .finish()
    }
}
