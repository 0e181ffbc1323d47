//! Lazy, single-consumer typed streams between nodes.
//!
//! Grounded on `nvisy_runtime::graph::compiled::stream::{InputStream,
//! OutputStream}` (a boxed `Pin<Box<dyn Stream<Item = T>>>` wrapper); the
//! multicast/branch wrapper in [`branch`] is new, built directly from
//! spec.md §4.2/§4.7 and the design note in spec.md §9 ("source-driven
//! broadcast with per-subscriber bounded queues").

pub mod branch;

use std::pin::Pin;

use futures::Stream;
use futures::stream::StreamExt;

use crate::cancel::Cancel;
use crate::error::Error;

/// A lazy, single-pass, typed stream of items produced by one node.
///
/// `DataPipe<T>` is single-consumer by default; when a node's output is
/// consumed by more than one downstream node the runner interposes a
/// [`branch::Branch`] wrapper before the first read (spec.md §4.2 step 3).
pub struct DataPipe<T> {
    name: String,
    inner: Pin<Box<dyn Stream<Item = T> + Send>>,
}

impl<T: Send + 'static> DataPipe<T> {
    /// Wraps an existing stream as a named data pipe.
    pub fn new(name: impl Into<String>, stream: impl Stream<Item = T> + Send + 'static) -> Self {
        Self {
            name: name.into(),
            inner: Box::pin(stream),
        }
    }

    /// Creates an empty pipe, useful as a placeholder while a stream is
    /// swapped out (the same trick `Engine::execute_pipeline` uses on
    /// `CompiledInput::stream_mut`).
    pub fn empty(name: impl Into<String>) -> Self {
        Self::new(name, futures::stream::empty())
    }

    /// The pipe's stream name, for diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Consumes the pipe, returning an async iterator over its items that
    /// stops early if `cancel` fires. Each call to `next()` checks the
    /// cancellation token at least once, per spec.md §4.7's iterator
    /// contract.
    pub fn into_iterate(self, cancel: Cancel) -> impl Stream<Item = Result<T, Error>> + Send {
        async_stream::stream! {
            let mut this = self;
            loop {
                if cancel.is_cancelled() {
                    yield Err(Error::Cancellation);
                    break;
                }
                match this.inner.next().await {
                    Some(item) => yield Ok(item),
                    None => break,
                }
            }
        }
    }

    /// Consumes the pipe, returning its raw item stream without
    /// cancellation checks or `Result` wrapping. Used internally by
    /// adapters (e.g. [`branch::Branch`]) that perform their own
    /// cancellation handling.
    pub fn into_inner(self) -> Pin<Box<dyn Stream<Item = T> + Send>> {
        self.inner
    }

    /// Type-erases the item type, for diagnostic tooling that only needs to
    /// know "a value arrived", not what it was.
    pub fn iterate_untyped(self) -> impl Stream<Item = ()> + Send
    where
        T: 'static,
    {
        self.inner.map(|_| ())
    }
}

impl<T> std::fmt::Debug for DataPipe<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataPipe").field("name", &self.name).finish()
    }
}
