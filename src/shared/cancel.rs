//! Pipeline-wide cancellation signal
//!
//! A `CancelToken` is cloned into every thread of the pipeline. Blocking waits
//! select on [`CancelToken::signal`], which becomes ready (disconnected) the
//! moment the token is cancelled, so no thread can miss the wakeup.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Inner {
    cancelled: AtomicBool,
    /// Never sent on; dropping it disconnects every `signal` receiver
    trigger: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
}

/// Cloneable cancellation handle shared by all pipeline stages
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    /// Create a token in the non-cancelled state
    pub fn new() -> Self {
        let (trigger, signal) = bounded(0);
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                trigger: Mutex::new(Some(trigger)),
                signal,
            }),
        }
    }

    /// Cancel the token. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.trigger.lock().take();
    }

    /// Whether [`cancel`](Self::cancel) has been called
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Receiver that becomes ready once the token is cancelled.
    ///
    /// Intended for `crossbeam_channel::select!`; a receive on it only ever
    /// returns `Err(RecvError)`, and only after cancellation.
    pub fn signal(&self) -> &Receiver<()> {
        &self.inner.signal
    }

    /// Sleep for `timeout` unless cancelled first. Returns `true` if cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.inner.signal.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => self.is_cancelled(),
            _ => true,
        }
    }

    /// Block until cancelled
    pub fn wait(&self) {
        let _ = self.inner.signal.recv();
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
