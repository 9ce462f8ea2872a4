//! Cooperative cancellation for in-flight fetch and build work.
//!
//! A [`Canceller`] is held by whoever can stop the run (the CLI's ctrl-c
//! handler); [`CancelToken`] clones are observed at every suspension point:
//! network transfers, backoff sleeps, and child process waits.

use tokio::sync::watch;

/// The sending half: signals cancellation to every derived token.
#[derive(Debug)]
pub struct Canceller {
  tx: watch::Sender<bool>,
}

/// The observing half. Cheap to clone; safe to share across tasks.
#[derive(Debug, Clone)]
pub struct CancelToken {
  rx: watch::Receiver<bool>,
}

/// Create a connected canceller/token pair.
pub fn channel() -> (Canceller, CancelToken) {
  let (tx, rx) = watch::channel(false);
  (Canceller { tx }, CancelToken { rx })
}

impl Canceller {
  /// Signal cancellation. Idempotent.
  pub fn cancel(&self) {
    // Receivers may all be gone already; nothing to do then.
    let _ = self.tx.send(true);
  }

  pub fn token(&self) -> CancelToken {
    CancelToken {
      rx: self.tx.subscribe(),
    }
  }
}

impl CancelToken {
  /// A token that can never fire. Useful for tests and one-shot callers.
  pub fn never() -> Self {
    let (_tx, rx) = watch::channel(false);
    Self { rx }
  }

  /// Whether cancellation has been signalled.
  pub fn is_cancelled(&self) -> bool {
    *self.rx.borrow()
  }

  /// Wait until cancellation is signalled.
  ///
  /// If the [`Canceller`] has been dropped without firing, cancellation can
  /// never arrive and this future stays pending forever.
  pub async fn cancelled(&self) {
    let mut rx = self.rx.clone();
    loop {
      if *rx.borrow_and_update() {
        return;
      }
      if rx.changed().await.is_err() {
        std::future::pending::<()>().await;
      }
    }
  }
}
