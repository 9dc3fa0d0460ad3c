//! Stop signals for the watch loop
//!
//! Two independent sources can stop discovery: the caller's cancellation
//! token and the client's own close token. Both are [`CancellationToken`]s,
//! so cancelling is idempotent and wakes any wait already in progress.

use tokio_util::sync::CancellationToken;

use super::processor::SessionEnd;

#[derive(Debug, Clone)]
pub(crate) struct Shutdown {
    ctx: CancellationToken,
    close: CancellationToken,
}

impl Shutdown {
    pub(crate) fn new(ctx: CancellationToken, close: CancellationToken) -> Self {
        Self { ctx, close }
    }

    /// Resolves once the client is closed
    pub(crate) async fn closed(&self) {
        self.close.cancelled().await
    }

    /// Resolves once the caller cancels
    pub(crate) async fn cancelled(&self) {
        self.ctx.cancelled().await
    }

    /// Resolves with the terminal session end for whichever signal fires first
    pub(crate) async fn wait(&self) -> SessionEnd {
        tokio::select! {
            biased;
            _ = self.closed() => SessionEnd::Closed,
            _ = self.cancelled() => SessionEnd::Cancelled,
        }
    }

    /// Non-blocking check, close taking precedence
    pub(crate) fn check(&self) -> Option<SessionEnd> {
        if self.close.is_cancelled() {
            Some(SessionEnd::Closed)
        } else if self.ctx.is_cancelled() {
            Some(SessionEnd::Cancelled)
        } else {
            None
        }
    }
}
