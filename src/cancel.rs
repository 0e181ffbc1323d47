//! Run-scoped cancellation.
//!
//! spec.md §5 requires a single cancellation token scoped to one pipeline
//! run, explicitly threaded through every node operation rather than stored
//! globally. conduit builds this on `tokio::sync::watch` instead of
//! `tokio-util::sync::CancellationToken` since the teacher's dependency
//! surface already includes `tokio`'s `sync` feature and nothing in the
//! selected crates pulls in `tokio-util`.

use tokio::sync::watch;

use crate::error::Error;

/// The writer half of a run's cancellation signal. Owned by whoever started
/// the run (typically the [`crate::runner::Runner`]).
#[derive(Debug)]
pub struct CancelGuard {
    tx: watch::Sender<bool>,
}

/// A cheaply cloneable cancellation token passed to every node operation.
#[derive(Debug, Clone)]
pub struct Cancel {
    rx: watch::Receiver<bool>,
}

/// Creates a linked `(CancelGuard, Cancel)` pair for one pipeline run.
pub fn pair() -> (CancelGuard, Cancel) {
    let (tx, rx) = watch::channel(false);
    (CancelGuard { tx }, Cancel { rx })
}

impl CancelGuard {
    /// Signals cancellation to every [`Cancel`] derived from this guard.
    pub fn cancel(&self) {
        // A closed receiver set just means nobody is listening yet or
        // anymore; either way there is nothing useful to do with the error.
        let _ = self.tx.send(true);
    }
}

impl Cancel {
    /// Returns `true` if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Returns `Err(Error::Cancellation)` if cancellation has been
    /// requested, otherwise `Ok(())`. Convenience for checkpointing
    /// cancellation at suspension points named in spec.md §5.
    pub fn check(&self) -> Result<(), Error> {
        if self.is_cancelled() {
            Err(Error::Cancellation)
        } else {
            Ok(())
        }
    }

    /// Resolves once cancellation is requested. Intended for use in
    /// `tokio::select!` alongside the operation being cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        // A `RecvError` here means the guard was dropped without ever
        // cancelling; treat that the same as "never cancelled" and hang,
        // matching watch-channel semantics used elsewhere for shutdown
        // signals.
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
        std::future::pending::<()>().await;
    }
}
