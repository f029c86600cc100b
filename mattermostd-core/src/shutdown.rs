// ABOUTME: Daemon-wide shutdown signal shared by the accept loop and session tasks
// ABOUTME: Carries the first fatal error so main can exit non-zero

use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Cloneable shutdown signal.
///
/// `request()` is a clean stop (e.g. the frontend sent `quit`); `fatal()`
/// also records an error that `main` reports after tearing down.
#[derive(Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
    fatal: Arc<Mutex<Option<anyhow::Error>>>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.token.cancel();
    }

    /// Raise a fatal error and stop the daemon. Only the first error is kept.
    pub fn fatal(&self, error: anyhow::Error) {
        tracing::error!(error = %error, "Fatal error, shutting down");
        if let Ok(mut slot) = self.fatal.lock() {
            if slot.is_none() {
                *slot = Some(error);
            }
        }
        self.token.cancel();
    }

    pub fn is_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once shutdown has been requested
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn take_fatal(&self) -> Option<anyhow::Error> {
        self.fatal.lock().ok().and_then(|mut slot| slot.take())
    }
}

impl std::fmt::Debug for Shutdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shutdown")
            .field("requested", &self.is_requested())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_without_fatal() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_requested());
        shutdown.request();
        assert!(shutdown.is_requested());
        assert!(shutdown.take_fatal().is_none());
    }

    #[tokio::test]
    async fn test_fatal_keeps_first_error() {
        let shutdown = Shutdown::new();
        let clone = shutdown.clone();
        clone.fatal(anyhow::anyhow!("disk full"));
        clone.fatal(anyhow::anyhow!("second"));
        shutdown.cancelled().await;
        let err = shutdown.take_fatal().unwrap();
        assert_eq!(err.to_string(), "disk full");
        assert!(shutdown.take_fatal().is_none());
    }
}
