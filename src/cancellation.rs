//! Cooperative cancellation shared between the signal handler and the pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cloneable flag that the pipeline polls between phases.
///
/// Setting the flag never interrupts work in progress. The pipeline checks it
/// before and after each document phase, so a cancelled run finishes the
/// current pass and then stops with [`crate::errors::Error::Interrupted`].
///
/// # Examples
///
/// ```
/// use fconcat::CancellationToken;
///
/// let token = CancellationToken::new();
/// let handler_side = token.clone();
/// assert!(!token.is_cancelled());
///
/// handler_side.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token in the non-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the token (and every clone of it) as cancelled.
    ///
    /// This only performs an atomic store, so it is safe to call from a signal
    /// handler thread.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once `cancel()` has been called on any clone.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
