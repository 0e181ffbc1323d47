//! Topological execution of a compiled graph (spec.md §4.2).
//!
//! Grounded on `nvisy_runtime::engine::executor::Engine::execute_pipeline`:
//! walk nodes in dependency order, materialize each node's output pipe
//! once, and interpose a multicast [`Branch`] wrapper whenever more than
//! one downstream node consumes it.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::sync::{Mutex, Semaphore};

use crate::cancel::Cancel;
use crate::context::PipelineContext;
use crate::error::Error;
use crate::graph::node::{NodeId, NodeKind};
use crate::graph::Graph;
use crate::pipe::branch::{Branch, Subscription};
use crate::plan::{CompiledGraph, NodeExecutionPlan};
use crate::retry::{CircuitBreakerTable, DeadLetterEnvelope, NodeErrorDecision};

use super::behavior::{ErasedItem, ErasedPipe, NodeBehavior};
use super::config::RunnerConfig;
use super::result::{NodeError, PipelineResult};

/// Tracing target for runner operations.
const TRACING_TARGET: &str = "conduit::runner";

/// Runs a [`Graph`] to completion against a caller-supplied
/// [`NodeBehavior`] registry, applying retry, circuit-breaking and
/// dead-letter routing per spec.md §4.5.
pub struct Runner {
    config: RunnerConfig,
    concurrency: Arc<Semaphore>,
    breakers: Arc<CircuitBreakerTable>,
}

impl Runner {
    /// Creates a runner with the given configuration, and starts a
    /// background task that sweeps the circuit breaker table every
    /// `config.circuit_breaker.cleanup_interval`.
    pub fn new(config: RunnerConfig) -> Self {
        let breakers = Arc::new(CircuitBreakerTable::new(config.circuit_breaker));

        let cleanup_interval = config.circuit_breaker.cleanup_interval;
        if cleanup_interval > std::time::Duration::ZERO {
            let breakers_for_cleanup = Arc::clone(&breakers);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(cleanup_interval);
                loop {
                    ticker.tick().await;
                    breakers_for_cleanup.cleanup();
                }
            });
        }

        tracing::info!(
            target: TRACING_TARGET,
            max_concurrent_runs = config.max_concurrent_runs,
            "runner initialized"
        );

        Self {
            concurrency: Arc::new(Semaphore::new(config.max_concurrent_runs.max(1))),
            breakers,
            config,
        }
    }

    /// Runs `graph` using `behaviors` as the per-node execution logic,
    /// threading `context` through every node and error handler, and
    /// stopping early if `cancel` fires or a node's error handler returns
    /// `Fail`.
    pub async fn run(
        &self,
        graph: &Graph,
        compiled: &CompiledGraph,
        behaviors: &HashMap<NodeId, NodeBehavior>,
        context: PipelineContext,
        cancel: Cancel,
    ) -> Result<PipelineResult, Error> {
        let _permit = self
            .concurrency
            .acquire()
            .await
            .map_err(|_| Error::Cancellation)?;

        let start = Instant::now();
        let order = graph
            .topological_order()
            .expect("a built Graph is always acyclic");

        tracing::debug!(
            target: TRACING_TARGET,
            node_count = order.len(),
            graph_hash = ?compiled.graph_hash,
            "starting run"
        );

        let errors: Arc<Mutex<Vec<NodeError>>> = Arc::new(Mutex::new(Vec::new()));
        let success = Arc::new(AtomicBool::new(true));
        let mut outputs: HashMap<NodeId, PendingOutput> = HashMap::new();
        let mut sink_tasks: Vec<tokio::task::JoinHandle<()>> = Vec::new();

        for node_id in order {
            if cancel.is_cancelled() {
                success.store(false, Ordering::SeqCst);
                break;
            }
            let Some(plan) = compiled.plan(node_id) else {
                return Err(Error::Configuration(format!(
                    "no compiled plan for node {node_id}"
                )));
            };
            let Some(behavior) = behaviors.get(&node_id) else {
                return Err(Error::Configuration(format!(
                    "no registered behavior for node {node_id}"
                )));
            };

            match plan.kind {
                NodeKind::Source => {
                    let NodeBehavior::Source(produce) = behavior else {
                        return Err(mismatched_behavior(node_id, plan.kind));
                    };
                    let pipe = produce(cancel.clone());
                    install_output(&mut outputs, graph, node_id, plan, pipe);
                }
                NodeKind::Transform => {
                    let NodeBehavior::Transform(transform) = behavior else {
                        return Err(mismatched_behavior(node_id, plan.kind));
                    };
                    let input = take_single_input(&mut outputs, graph, node_id)?;
                    let output = run_transform(
                        node_id,
                        plan,
                        self.config.default_timeout,
                        Arc::clone(transform),
                        input,
                        Arc::clone(&self.breakers),
                        Arc::clone(&errors),
                        Arc::clone(&success),
                        context.clone(),
                        cancel.clone(),
                        self.config.dead_letter_sink.clone(),
                    );
                    install_output(&mut outputs, graph, node_id, plan, output);
                }
                NodeKind::Join | NodeKind::Aggregate => {
                    let NodeBehavior::FanIn(fan_in) = behavior else {
                        return Err(mismatched_behavior(node_id, plan.kind));
                    };
                    let inputs = take_all_inputs(&mut outputs, graph, node_id)?;
                    let items = fan_in(inputs).await;
                    let output = ErasedPipe::new(plan.name.clone(), futures::stream::iter(items));
                    install_output(&mut outputs, graph, node_id, plan, output);
                }
                NodeKind::Sink => {
                    let NodeBehavior::Sink(consume) = behavior else {
                        return Err(mismatched_behavior(node_id, plan.kind));
                    };
                    let input = take_single_input(&mut outputs, graph, node_id)?;
                    // Spawned rather than awaited inline: a bounded `Branch`
                    // feeding two sinks deadlocks otherwise, since the
                    // producer can't drain the second sink's subscription
                    // while the executor is still blocked draining the
                    // first one (spec.md §4.2: "run completes when all
                    // sinks complete", not one after another).
                    sink_tasks.push(tokio::spawn(run_sink(
                        node_id,
                        Arc::clone(&plan.error_handler),
                        plan.retry_policy,
                        self.config.default_timeout,
                        Arc::clone(consume),
                        input,
                        Arc::clone(&self.breakers),
                        Arc::clone(&errors),
                        Arc::clone(&success),
                        context.clone(),
                        cancel.clone(),
                        self.config.dead_letter_sink.clone(),
                    )));
                }
            }
        }

        for task in sink_tasks {
            if task.await.is_err() {
                tracing::warn!(target: TRACING_TARGET, "a sink task panicked");
                success.store(false, Ordering::SeqCst);
            }
        }

        let result = PipelineResult {
            success: success.load(Ordering::SeqCst) && !cancel.is_cancelled(),
            errors: Arc::try_unwrap(errors)
                .map(Mutex::into_inner)
                .unwrap_or_default(),
            duration: start.elapsed(),
        };

        tracing::debug!(
            target: TRACING_TARGET,
            success = result.success,
            error_count = result.errors.len(),
            duration_ms = result.duration.as_millis() as u64,
            "run finished"
        );

        Ok(result)
    }
}

fn mismatched_behavior(node_id: NodeId, kind: NodeKind) -> Error {
    Error::Configuration(format!(
        "node {node_id} is declared as {kind} but its registered behavior doesn't match"
    ))
}

enum PendingOutput {
    Single(Option<ErasedPipe>),
    Branched(VecDeque<Subscription<ErasedItem>>),
}

fn install_output(
    outputs: &mut HashMap<NodeId, PendingOutput>,
    graph: &Graph,
    node_id: NodeId,
    plan: &NodeExecutionPlan,
    pipe: ErasedPipe,
) {
    let fan_out = graph.fan_out(node_id);
    if fan_out > 1 {
        let mut branch = Branch::new(plan.branch_options);
        let mut subs = VecDeque::with_capacity(fan_out);
        for _ in 0..fan_out {
            subs.push_back(branch.subscribe());
        }
        tokio::spawn(branch.run(pipe));
        outputs.insert(node_id, PendingOutput::Branched(subs));
    } else {
        outputs.insert(node_id, PendingOutput::Single(Some(pipe)));
    }
}

fn subscription_into_pipe(name: String, mut sub: Subscription<ErasedItem>) -> ErasedPipe {
    ErasedPipe::new(
        name,
        async_stream::stream! {
            while let Some(item) = sub.next().await {
                yield item;
            }
        },
    )
}

/// Predecessor ids of `node_id`, in the order their edges were added to the
/// builder. `Graph::predecessors` walks petgraph's adjacency list, whose
/// order isn't guaranteed stable across builds, so fan-in nodes (`Join`'s
/// input ports in particular) instead read off `Graph::edges()`'s
/// insertion order directly: edge 0 is port 0, edge 1 is port 1, and so on.
fn ordered_predecessors(graph: &Graph, node_id: NodeId) -> Vec<NodeId> {
    graph
        .edges()
        .iter()
        .filter(|e| e.target == node_id)
        .map(|e| e.source)
        .collect()
}

fn take_single_input(
    outputs: &mut HashMap<NodeId, PendingOutput>,
    graph: &Graph,
    node_id: NodeId,
) -> Result<ErasedPipe, Error> {
    let preds = ordered_predecessors(graph, node_id);
    let Some(&pred) = preds.first() else {
        return Err(Error::Configuration(format!(
            "node {node_id} has no predecessor to read input from"
        )));
    };
    take_one(outputs, pred)
}

fn take_all_inputs(
    outputs: &mut HashMap<NodeId, PendingOutput>,
    graph: &Graph,
    node_id: NodeId,
) -> Result<Vec<ErasedPipe>, Error> {
    ordered_predecessors(graph, node_id)
        .into_iter()
        .map(|pred| take_one(outputs, pred))
        .collect()
}

fn take_one(outputs: &mut HashMap<NodeId, PendingOutput>, pred: NodeId) -> Result<ErasedPipe, Error> {
    let pending = outputs
        .get_mut(&pred)
        .ok_or_else(|| Error::Configuration(format!("node {pred} has no materialized output")))?;
    match pending {
        PendingOutput::Single(slot) => slot
            .take()
            .ok_or_else(|| Error::Configuration(format!("node {pred}'s output was already consumed"))),
        PendingOutput::Branched(subs) => {
            let sub = subs
                .pop_front()
                .ok_or_else(|| Error::Configuration(format!("node {pred} has no more subscribers")))?;
            Ok(subscription_into_pipe(pred.to_string(), sub))
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_transform(
    node_id: NodeId,
    plan: &NodeExecutionPlan,
    timeout: Option<Duration>,
    transform: Arc<dyn Fn(ErasedItem) -> super::behavior::BoxFuture<Result<Vec<ErasedItem>, Error>> + Send + Sync>,
    input: ErasedPipe,
    breakers: Arc<CircuitBreakerTable>,
    errors: Arc<Mutex<Vec<NodeError>>>,
    success: Arc<AtomicBool>,
    context: PipelineContext,
    cancel: Cancel,
    dead_letter_sink: Option<Arc<dyn crate::retry::DeadLetterSink>>,
) -> ErasedPipe {
    let error_handler = Arc::clone(&plan.error_handler);
    let retry_policy = plan.retry_policy;
    let strategy = plan.execution_strategy;
    let name = plan.name.clone();

    let per_item = move |item: ErasedItem| {
        let transform = Arc::clone(&transform);
        let breakers = Arc::clone(&breakers);
        let errors = Arc::clone(&errors);
        let success = Arc::clone(&success);
        let error_handler = Arc::clone(&error_handler);
        let context = context.clone();
        let dead_letter_sink = dead_letter_sink.clone();
        async move {
            process_item(
                node_id,
                item,
                transform,
                retry_policy,
                timeout,
                breakers,
                errors,
                success,
                error_handler,
                context,
                dead_letter_sink,
            )
            .await
        }
    };

    let flattened = strategy
        .apply(input.into_inner(), per_item, cancel)
        .flat_map(futures::stream::iter);
    ErasedPipe::new(name, flattened)
}

#[allow(clippy::too_many_arguments)]
async fn process_item(
    node_id: NodeId,
    item: ErasedItem,
    transform: Arc<dyn Fn(ErasedItem) -> super::behavior::BoxFuture<Result<Vec<ErasedItem>, Error>> + Send + Sync>,
    retry_policy: Option<crate::retry::RetryPolicy>,
    timeout: Option<Duration>,
    breakers: Arc<CircuitBreakerTable>,
    errors: Arc<Mutex<Vec<NodeError>>>,
    success: Arc<AtomicBool>,
    error_handler: Arc<dyn crate::retry::NodeErrorHandler>,
    context: PipelineContext,
    dead_letter_sink: Option<Arc<dyn crate::retry::DeadLetterSink>>,
) -> Vec<ErasedItem> {
    if let Err(retry_after) = breakers.check(node_id) {
        return handle_failure(
            node_id,
            item,
            Error::CircuitOpen { node_id, retry_after },
            0,
            &errors,
            &success,
            &error_handler,
            &context,
            &dead_letter_sink,
        )
        .await;
    }

    let mut attempt = 0u32;
    loop {
        let started = Instant::now();
        let outcome = match timeout {
            Some(bound) => match tokio::time::timeout(bound, transform(Arc::clone(&item))).await {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::NodeTimeout {
                    node_id,
                    elapsed: started.elapsed(),
                }),
            },
            None => transform(Arc::clone(&item)).await,
        };
        match outcome {
            Ok(outputs) => {
                breakers.record(node_id, true);
                return outputs;
            }
            Err(e) => {
                breakers.record(node_id, false);
                let decision = error_handler
                    .handle(node_id, &*item, &e, &context)
                    .await;
                tracing::warn!(
                    target: TRACING_TARGET,
                    node_id = %node_id,
                    attempt,
                    decision = %decision,
                    error = %e,
                    "node reported a processing error"
                );
                {
                    let mut guard = errors.lock().await;
                    guard.push(NodeError {
                        node_id,
                        message: e.to_string(),
                        decision,
                        attempt,
                    });
                }
                match decision {
                    NodeErrorDecision::Skip => return Vec::new(),
                    NodeErrorDecision::Fail => {
                        success.store(false, Ordering::SeqCst);
                        return Vec::new();
                    }
                    NodeErrorDecision::DeadLetter => {
                        deliver_dead_letter(node_id, &item, &e, attempt, &dead_letter_sink).await;
                        return Vec::new();
                    }
                    NodeErrorDecision::Retry => {
                        let Some(policy) = retry_policy else {
                            success.store(false, Ordering::SeqCst);
                            return Vec::new();
                        };
                        if !policy.should_retry(attempt) {
                            match policy.on_exhaustion {
                                crate::retry::ExhaustionAction::Fail => {
                                    success.store(false, Ordering::SeqCst);
                                }
                                crate::retry::ExhaustionAction::DeadLetter => {
                                    deliver_dead_letter(node_id, &item, &e, attempt, &dead_letter_sink).await;
                                }
                            }
                            return Vec::new();
                        }
                        let delay = policy.backoff.delay(attempt as i64);
                        tracing::trace!(
                            target: TRACING_TARGET,
                            node_id = %node_id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "retrying after backoff"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_failure(
    node_id: NodeId,
    item: ErasedItem,
    error: Error,
    attempt: u32,
    errors: &Arc<Mutex<Vec<NodeError>>>,
    success: &Arc<AtomicBool>,
    error_handler: &Arc<dyn crate::retry::NodeErrorHandler>,
    context: &PipelineContext,
    dead_letter_sink: &Option<Arc<dyn crate::retry::DeadLetterSink>>,
) -> Vec<ErasedItem> {
    let decision = error_handler.handle(node_id, &*item, &error, context).await;
    errors.lock().await.push(NodeError {
        node_id,
        message: error.to_string(),
        decision,
        attempt,
    });
    match decision {
        NodeErrorDecision::DeadLetter => {
            deliver_dead_letter(node_id, &item, &error, attempt, dead_letter_sink).await;
        }
        NodeErrorDecision::Fail => success.store(false, Ordering::SeqCst),
        NodeErrorDecision::Skip | NodeErrorDecision::Retry => {}
    }
    Vec::new()
}

async fn deliver_dead_letter(
    node_id: NodeId,
    item: &ErasedItem,
    error: &Error,
    attempt: u32,
    sink: &Option<Arc<dyn crate::retry::DeadLetterSink>>,
) {
    if let Some(sink) = sink {
        sink.accept(DeadLetterEnvelope {
            node_id,
            item: Arc::clone(item),
            exception_type: std::any::type_name::<Error>(),
            exception_message: error.to_string(),
            attempt,
            timestamp: jiff::Timestamp::now(),
            correlation_id: None,
            metadata: HashMap::new(),
        })
        .await;
    }
}

/// Drains one sink's input to completion, applying retry/circuit-breaker
/// handling per item. Spawned as its own task by [`Runner::run`] so that
/// multiple sinks fed by the same bounded [`crate::pipe::branch::Branch`]
/// drain concurrently rather than deadlocking each other; every parameter is
/// therefore owned rather than borrowed from the caller's [`NodeExecutionPlan`].
#[allow(clippy::too_many_arguments)]
async fn run_sink(
    node_id: NodeId,
    error_handler: Arc<dyn crate::retry::NodeErrorHandler>,
    retry_policy: Option<crate::retry::RetryPolicy>,
    timeout: Option<Duration>,
    consume: Arc<dyn Fn(ErasedItem) -> super::behavior::BoxFuture<Result<(), Error>> + Send + Sync>,
    input: ErasedPipe,
    breakers: Arc<CircuitBreakerTable>,
    errors: Arc<Mutex<Vec<NodeError>>>,
    success: Arc<AtomicBool>,
    context: PipelineContext,
    cancel: Cancel,
    dead_letter_sink: Option<Arc<dyn crate::retry::DeadLetterSink>>,
) {
    let mut stream = input.into_inner();

    while let Some(item) = stream.next().await {
        if cancel.is_cancelled() {
            success.store(false, Ordering::SeqCst);
            break;
        }
        let wrapped_consume = {
            let consume = Arc::clone(&consume);
            move |item: ErasedItem| -> super::behavior::BoxFuture<Result<Vec<ErasedItem>, Error>> {
                let consume = Arc::clone(&consume);
                Box::pin(async move { consume(item).await.map(|_| Vec::new()) })
            }
        };
        process_item(
            node_id,
            item,
            Arc::new(wrapped_consume),
            retry_policy,
            timeout,
            Arc::clone(&breakers),
            Arc::clone(&errors),
            Arc::clone(&success),
            Arc::clone(&error_handler),
            context.clone(),
            dead_letter_sink.clone(),
        )
        .await;
        if !success.load(Ordering::SeqCst) {
            break;
        }
    }
}
