use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Hierarchical cancellation handle for a single partition worker.
///
/// A `RunStatus` starts `Running` and moves to `Halted` exactly once.
/// `fork`ed children observe their parent halting, but halting a child
/// never halts its parent — this is what lets a single worker's
/// `revoke()` tear down only that worker without affecting siblings
/// sharing the same event source.
#[derive(Clone, Debug)]
pub struct RunStatus {
    token: CancellationToken,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStatus {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Returns a child status: halting `self` halts the child, but
    /// halting the child does not propagate back up.
    pub fn fork(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    /// Idempotent: halting an already-halted status is a no-op.
    pub fn halt(&self) {
        self.token.cancel();
    }

    pub fn running(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Resolves exactly once, when this status (or an ancestor) halts.
    pub fn done(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// The underlying cancellation context, for code that wants to pass
    /// cancellation through to a library expecting one (e.g. a `select!`
    /// arm or a future that accepts a `CancellationToken` directly).
    pub fn ctx(&self) -> CancellationToken {
        self.token.clone()
    }
}
