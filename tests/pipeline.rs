//! End-to-end runner scenarios (spec.md §8's seed scenarios S1-S6).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use jiff::{Span, Timestamp};

use conduit::ack::AcknowledgableMessage;
use conduit::aggregate::WindowedAggregator;
use conduit::graph::NodeHandle;
use conduit::retry::{Always, CircuitBreakerConfig, ExhaustionAction, InMemoryDeadLetterSink, NodeErrorDecision, RetryPolicy};
use conduit::runner::{erase_sink, erase_source, erase_transform, NodeBehavior};
use conduit::strategy::ExecutionStrategy;
use conduit::testing::{VecSink, VecSource};
use conduit::window::{Tumbling, WindowAssigner};
use conduit::{Aggregate, Error, GraphBuilder, GraphValidationError, PipelineContext, Runner, RunnerConfig, Sink, Transform};

struct Double;

#[async_trait::async_trait]
impl Transform<i64, i64> for Double {
    async fn apply(&self, item: i64) -> Result<Vec<i64>, Error> {
        Ok(vec![item * 2])
    }
}

#[tokio::test]
async fn s1_linear_transform_chain() {
    let mut builder = GraphBuilder::new();
    let source = builder.add_source::<i64>("source");
    let transform = builder.add_transform::<i64, i64>("double", ExecutionStrategy::Sequential);
    let sink = builder.add_sink::<i64>("sink");
    builder.connect(&source, &transform).unwrap();
    builder.connect(&transform, &sink).unwrap();
    let graph = builder.build().unwrap();
    let compiled = conduit::compile(&graph);

    let vec_source = Arc::new(VecSource::new(vec![1i64, 2, 3, 4, 5]));
    let vec_sink = Arc::new(VecSink::<i64>::new());

    let mut behaviors: HashMap<_, NodeBehavior> = HashMap::new();
    behaviors.insert(source.id(), erase_source(vec_source));
    behaviors.insert(transform.id(), erase_transform(Arc::new(Double)));
    behaviors.insert(sink.id(), erase_sink(Arc::clone(&vec_sink)));

    let runner = Runner::new(RunnerConfig::default());
    let (_guard, cancel) = conduit::cancel::pair();
    let result = runner
        .run(&graph, &compiled, &behaviors, PipelineContext::new(), cancel)
        .await
        .unwrap();

    assert!(result.success);
    assert!(result.errors.is_empty());
    assert_eq!(vec_sink.received(), vec![2, 4, 6, 8, 10]);
}

#[test]
fn s2_validation_cycle_is_rejected() {
    let mut builder = GraphBuilder::new();
    let a = builder.add_transform::<i64, i64>("a", ExecutionStrategy::Sequential);
    let b = builder.add_transform::<i64, i64>("b", ExecutionStrategy::Sequential);
    let c = builder.add_transform::<i64, i64>("c", ExecutionStrategy::Sequential);
    builder.connect(&a, &b).unwrap();
    builder.connect(&b, &c).unwrap();
    builder.connect(&c, &a).unwrap();

    let err = builder.build().unwrap_err();
    match err {
        Error::GraphValidation(GraphValidationError::Cycle { vertices }) => {
            let ids: std::collections::HashSet<_> = vertices.into_iter().collect();
            assert!(ids.contains(&a.id()));
            assert!(ids.contains(&b.id()));
            assert!(ids.contains(&c.id()));
        }
        other => panic!("expected a Cycle validation error, got {other:?}"),
    }
}

#[tokio::test]
async fn s3_branching_fan_out_delivers_to_both_sinks_in_order() {
    let mut builder = GraphBuilder::new();
    let source = builder.add_source::<&'static str>("source");
    let sink1 = builder.add_sink::<&'static str>("sink1");
    let sink2 = builder.add_sink::<&'static str>("sink2");
    builder.connect(&source, &sink1).unwrap();
    builder.connect(&source, &sink2).unwrap();
    let graph = builder.build().unwrap();
    let compiled = conduit::compile(&graph);

    let vec_source = Arc::new(VecSource::new(vec!["x", "y", "z"]));
    let vec_sink1 = Arc::new(VecSink::<&'static str>::new());
    let vec_sink2 = Arc::new(VecSink::<&'static str>::new());

    let mut behaviors: HashMap<_, NodeBehavior> = HashMap::new();
    behaviors.insert(source.id(), erase_source(vec_source));
    behaviors.insert(sink1.id(), erase_sink(Arc::clone(&vec_sink1)));
    behaviors.insert(sink2.id(), erase_sink(Arc::clone(&vec_sink2)));

    let runner = Runner::new(RunnerConfig::default());
    let (_guard, cancel) = conduit::cancel::pair();
    let result = runner
        .run(&graph, &compiled, &behaviors, PipelineContext::new(), cancel)
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(vec_sink1.received(), vec!["x", "y", "z"]);
    assert_eq!(vec_sink2.received(), vec!["x", "y", "z"]);
}

#[tokio::test]
async fn s5_retry_then_dead_letter() {
    let mut builder = GraphBuilder::new();
    let source = builder.add_source::<i64>("source");
    let transform = builder.add_transform::<i64, i64>("flaky", ExecutionStrategy::Sequential);
    let sink = builder.add_sink::<i64>("sink");
    builder.set_error_handler(&transform, Arc::new(Always(NodeErrorDecision::Retry)));
    builder.set_retry_policy(
        &transform,
        RetryPolicy {
            backoff: conduit::retry::BackoffStrategy::Fixed(Duration::ZERO),
            max_attempts: 3,
            on_exhaustion: ExhaustionAction::DeadLetter,
        },
    );
    builder.connect(&source, &transform).unwrap();
    builder.connect(&transform, &sink).unwrap();
    let graph = builder.build().unwrap();

    let compiled = conduit::compile(&graph);

    let vec_source = Arc::new(VecSource::new(vec![1i64]));
    let vec_sink = Arc::new(VecSink::<i64>::new());
    let always_fails = Arc::new(AlwaysFails::default());
    let dead_letters = Arc::new(InMemoryDeadLetterSink::new());

    let mut behaviors: HashMap<_, NodeBehavior> = HashMap::new();
    behaviors.insert(source.id(), erase_source(vec_source));
    behaviors.insert(transform.id(), erase_transform(always_fails));
    behaviors.insert(sink.id(), erase_sink(vec_sink));

    let mut config = RunnerConfig::default();
    config.dead_letter_sink = Some(dead_letters.clone() as Arc<dyn conduit::retry::DeadLetterSink>);
    config.circuit_breaker = CircuitBreakerConfig {
        failure_threshold: 100,
        ..CircuitBreakerConfig::default()
    };

    let runner = Runner::new(config);
    let (_guard, cancel) = conduit::cancel::pair();
    let result = runner
        .run(&graph, &compiled, &behaviors, PipelineContext::new(), cancel)
        .await
        .unwrap();

    assert!(result.success);
    let envelopes = dead_letters.drain();
    assert_eq!(envelopes.len(), 1);
    assert_eq!(envelopes[0].node_id, transform.id());
    // max_attempts: 3 exhausts after attempts 0, 1, 2 (spec.md's S5 calls
    // this the 3rd and final attempt).
    assert_eq!(envelopes[0].attempt, 2);
}

/// A `Transform` that always returns an error, for exercising retry exhaustion.
#[derive(Default)]
struct AlwaysFails;

#[async_trait::async_trait]
impl Transform<i64, i64> for AlwaysFails {
    async fn apply(&self, _item: i64) -> Result<Vec<i64>, Error> {
        Err(Error::ItemProcessing {
            node_id: conduit::graph::NodeId::new(),
            message: "deterministic failure".to_string(),
        })
    }
}

struct CountAll;

impl Aggregate<i64, (), u32> for CountAll {
    type Out = u32;

    fn get_key(&self, _item: &i64) {}
    fn create_accumulator(&self) -> u32 {
        0
    }
    fn accumulate(&self, acc: &mut u32, _item: i64) {
        *acc += 1;
    }
    fn emit(&self, _key: (), acc: u32) -> u32 {
        acc
    }
}

#[test]
fn s4_tumbling_window_counts_items_per_bucket() {
    let assigner: Arc<dyn WindowAssigner> = Arc::new(Tumbling::new(Span::new().seconds(30)));
    let mut agg = WindowedAggregator::new(Arc::new(CountAll), assigner, Span::new().seconds(0));

    let event_times = [0i64, 1, 2, 30, 31, 60];
    for &t in &event_times {
        agg.accumulate(1, Timestamp::from_second(t).unwrap());
    }

    // Advance the watermark past every window by accumulating a sentinel far
    // in the future, then drain everything that closed.
    agg.accumulate(1, Timestamp::from_second(200).unwrap());
    let mut emitted = agg.drain_closed_windows();
    emitted.sort();

    assert_eq!(emitted, vec![1, 2, 3]);
}

struct AckingSink {
    fail_on: i64,
    acked: Arc<std::sync::Mutex<Vec<i64>>>,
}

#[async_trait::async_trait]
impl Sink<AcknowledgableMessage<i64>> for AckingSink {
    async fn consume(&self, item: AcknowledgableMessage<i64>) -> Result<(), Error> {
        let value = *item.body();
        if value == self.fail_on {
            item.cancel().await;
            return Err(Error::ItemProcessing {
                node_id: conduit::graph::NodeId::new(),
                message: "sink rejected message".to_string(),
            });
        }
        item.acknowledge().await;
        self.acked.lock().unwrap().push(value);
        Ok(())
    }
}

#[tokio::test]
async fn s6_auto_ack_skips_only_the_failed_message() {
    let mut builder = GraphBuilder::new();
    let source = builder.add_source::<AcknowledgableMessage<i64>>("source");
    let sink = builder.add_sink::<AcknowledgableMessage<i64>>("sink");
    builder.set_error_handler(&sink, Arc::new(Always(NodeErrorDecision::Skip)));
    builder.connect(&source, &sink).unwrap();
    let graph = builder.build().unwrap();
    let compiled = conduit::compile(&graph);

    let messages: Vec<AcknowledgableMessage<i64>> = (1..=10)
        .map(|n| AcknowledgableMessage::new(n as i64))
        .collect();
    let acked = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink_impl = Arc::new(AckingSink {
        fail_on: 9,
        acked: Arc::clone(&acked),
    });

    let mut behaviors: HashMap<_, NodeBehavior> = HashMap::new();
    behaviors.insert(source.id(), erase_source(Arc::new(VecSource::new(messages.clone()))));
    behaviors.insert(sink.id(), erase_sink(sink_impl));

    let runner = Runner::new(RunnerConfig::default());
    let (_guard, cancel) = conduit::cancel::pair();
    let result = runner
        .run(&graph, &compiled, &behaviors, PipelineContext::new(), cancel)
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(*acked.lock().unwrap(), vec![1, 2, 3, 4, 5, 6, 7, 8, 10]);

    let mut acked_flags = Vec::new();
    for message in &messages {
        acked_flags.push(message.is_acknowledged().await);
    }
    let expected: Vec<bool> = (1..=10).map(|n| n != 9).collect();
    assert_eq!(acked_flags, expected);
}
