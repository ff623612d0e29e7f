//! Stop and readiness signalling between a session and its forwarding engine
//!
//! The stop signal is raised by the session and observed by the engine; the
//! readiness signal goes the other way and fires at most once.

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Broadcast-once request to tear a tunnel down
///
/// Raising is idempotent and never blocks, so it is safe to call from `Drop`
/// and from any number of clones.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    token: CancellationToken,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request teardown. Repeated calls are no-ops.
    #[inline]
    pub fn raise(&self) {
        self.token.cancel();
    }

    /// Check whether teardown has been requested
    #[inline]
    pub fn is_raised(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until teardown is requested
    pub async fn raised(&self) {
        self.token.cancelled().await
    }

    /// A token cancelled together with this signal, for per-connection tasks
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }
}

/// Sending half of the readiness notification, owned by the engine
#[derive(Debug)]
pub struct ReadySignal {
    tx: oneshot::Sender<()>,
}

/// Receiving half of the readiness notification, owned by the session
#[derive(Debug)]
pub struct ReadyWaiter {
    rx: oneshot::Receiver<()>,
}

/// Create a connected readiness signal/waiter pair
pub fn ready_pair() -> (ReadySignal, ReadyWaiter) {
    let (tx, rx) = oneshot::channel();
    (ReadySignal { tx }, ReadyWaiter { rx })
}

impl ReadySignal {
    /// Announce that the tunnel accepts connections.
    ///
    /// Consumes the signal; a waiter that already gave up is ignored.
    pub fn fire(self) {
        let _ = self.tx.send(());
    }
}

impl ReadyWaiter {
    /// Resolves to `true` once fired, `false` if the signal was dropped unfired
    pub async fn wait(self) -> bool {
        self.rx.await.is_ok()
    }
}
