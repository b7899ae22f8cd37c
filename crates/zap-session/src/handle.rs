//! A cloneable handle for aborting a session's exchange from external code.

use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio_util::sync::CancellationToken;

/// A cloneable handle for poking the session from external code (signal
/// handlers, UI threads).
///
/// All fields are `Arc`-wrapped, so cloning is cheap.
#[derive(Clone)]
pub struct SessionHandle {
    pub(crate) cancel: Arc<Mutex<CancellationToken>>,
    pub(crate) is_running: Arc<AtomicBool>,
}

impl SessionHandle {
    pub(crate) fn new() -> Self {
        Self {
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            is_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Abort the in-flight exchange, if any.
    pub fn abort(&self) {
        self.cancel.lock().cancel();
    }

    /// Install a fresh token for a new exchange and return it.
    pub(crate) fn begin(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();
        self.is_running.store(true, Ordering::Release);
        token
    }

    pub(crate) fn end(&self) {
        self.is_running.store(false, Ordering::Release);
    }

    /// Whether an exchange is currently in flight.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_cancels_current_token() {
        let handle = SessionHandle::new();
        let token = handle.begin();
        assert!(handle.is_running());
        handle.clone().abort();
        assert!(token.is_cancelled());
        handle.end();
        assert!(!handle.is_running());
    }

    #[test]
    fn test_begin_resets_previous_abort() {
        let handle = SessionHandle::new();
        handle.abort();
        let token = handle.begin();
        assert!(!token.is_cancelled());
    }
}
