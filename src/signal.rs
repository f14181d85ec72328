//! Ctrl+C handling.
//!
//! The handler only sets a shared flag. Long-running work polls the flag at
//! safe points: the walker between entries, the deduplicator before hashing
//! each file and before each clone call. A clone call in progress is always
//! allowed to finish, so no destination is left half-written by an interrupt.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Shared shutdown flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandler {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandler {
    /// Create a handler with no shutdown requested.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` once Ctrl+C was pressed or [`request_shutdown`](Self::request_shutdown) called.
    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Request shutdown without a signal.
    pub fn request_shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// The flag, for handing to the walker and the deduplicator.
    #[must_use]
    pub fn get_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    /// Clear the flag.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Error type for signal handler installation.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// Failed to install the Ctrl+C handler.
    #[error("Failed to install signal handler: {0}")]
    InstallFailed(#[from] ctrlc::Error),
}

static GLOBAL_HANDLER: OnceLock<ShutdownHandler> = OnceLock::new();

/// Install the process Ctrl+C handler, or reuse the one already installed.
///
/// A reused handler has its flag cleared, so repeated in-process runs start
/// fresh.
///
/// # Errors
///
/// Returns [`SignalError`] when the OS refuses the handler.
pub fn install_handler() -> Result<ShutdownHandler, SignalError> {
    if let Some(handler) = GLOBAL_HANDLER.get() {
        handler.reset();
        return Ok(handler.clone());
    }

    let handler = ShutdownHandler::new();
    let flag = handler.get_flag();

    match ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
        let _ = writeln!(
            std::io::stderr(),
            "\nInterrupted. Finishing the current clone..."
        );
        let _ = std::io::stderr().flush();
        log::info!("Shutdown signal received");
    }) {
        Ok(()) => {
            let handler = GLOBAL_HANDLER.get_or_init(|| handler);
            Ok(handler.clone())
        }
        Err(ctrlc::Error::MultipleHandlers) => {
            log::debug!("Ctrl+C handler already registered, using unhooked handler");
            let handler = GLOBAL_HANDLER.get_or_init(ShutdownHandler::new);
            handler.reset();
            Ok(handler.clone())
        }
        Err(e) => Err(SignalError::InstallFailed(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_and_reset() {
        let handler = ShutdownHandler::new();
        assert!(!handler.is_shutdown_requested());

        handler.request_shutdown();
        assert!(handler.is_shutdown_requested());

        handler.reset();
        assert!(!handler.is_shutdown_requested());
    }

    #[test]
    fn test_flag_is_shared() {
        let handler = ShutdownHandler::new();
        let flag = handler.get_flag();
        let cloned = handler.clone();

        flag.store(true, Ordering::SeqCst);
        assert!(handler.is_shutdown_requested());
        assert!(cloned.is_shutdown_requested());
    }

    #[test]
    fn test_install_twice_reuses_handler() {
        let first = install_handler().unwrap();
        first.request_shutdown();

        let second = install_handler().unwrap();
        assert!(!second.is_shutdown_requested());
        assert!(!first.is_shutdown_requested());
    }

    #[test]
    fn test_shutdown_handler_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ShutdownHandler>();
    }
}
