//! Cooperative cancellation handles.
//!
//! An [`AbortController`] owns the trigger; any number of [`AbortSignal`]
//! clones observe it. Aborting is idempotent and aborting after an exchange
//! has settled has no effect on it.

use tokio_util::sync::CancellationToken;

/// Observer half of a cancellation pair.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    token: CancellationToken,
}

impl AbortSignal {
    /// Returns true once the owning controller has aborted.
    #[must_use]
    pub fn aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when the owning controller aborts.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Returns a signal that is already aborted.
    #[must_use]
    pub fn aborted_signal() -> Self {
        let token = CancellationToken::new();
        token.cancel();
        Self { token }
    }
}

/// Trigger half of a cancellation pair.
#[derive(Debug, Clone, Default)]
pub struct AbortController {
    token: CancellationToken,
}

impl AbortController {
    /// Creates a controller that has not aborted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a signal observing this controller.
    #[must_use]
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            token: self.token.clone(),
        }
    }

    /// Aborts every exchange and body drain observing this controller.
    pub fn abort(&self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_abort_is_idempotent() {
        let controller = AbortController::new();
        let signal = controller.signal();
        assert!(!signal.aborted());
        controller.abort();
        controller.abort();
        assert!(signal.aborted());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_after_abort() {
        let controller = AbortController::new();
        let signal = controller.signal();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            controller.abort();
        });
        tokio::time::timeout(Duration::from_secs(2), signal.cancelled())
            .await
            .unwrap_or_else(|_| panic!("signal never fired"));
    }

    #[test]
    fn test_pre_aborted_signal() {
        assert!(AbortSignal::aborted_signal().aborted());
    }
}
