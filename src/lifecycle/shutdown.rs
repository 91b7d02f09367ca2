//! Shutdown coordination for the client.

use tokio_util::sync::CancellationToken;

/// Master cancellation signal.
///
/// Every long-running task selects on [`cancelled`](Self::cancelled); every
/// subscription handle holds a [`child`](Self::child) token so that
/// triggering shutdown ends all of them at once.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// The master token itself.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// A token cancelled with the master, or independently.
    pub fn child(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Trigger the shutdown signal. Returns false if it was already
    /// triggered.
    pub fn trigger(&self) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once shutdown has been triggered.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}
