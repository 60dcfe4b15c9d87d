//! Cell-wide cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};

/// Shared interrupt flag for one kernel.
///
/// The front-end keeps a clone and calls [`interrupt`](Self::interrupt) when
/// the user asks to stop. Everything that blocks inside a cell evaluation
/// (waiting on a target, waiting on a host subprocess) polls the flag and
/// returns [`Error::Interrupted`] promptly once it is set.
///
/// ```
/// use tether_core::InterruptHandle;
///
/// let handle = InterruptHandle::new();
/// let remote = handle.clone();
/// remote.interrupt();
/// assert!(handle.is_interrupted());
/// ```
#[derive(Clone, Default, Debug)]
pub struct InterruptHandle {
    flag: Arc<AtomicBool>,
}

impl InterruptHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Request cancellation of the running cell.
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Clear the flag before a new evaluation starts.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// `Err(Interrupted)` if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_interrupted() {
            Err(Error::Interrupted)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let handle = InterruptHandle::new();
        let clone = handle.clone();
        assert!(!clone.is_interrupted());
        handle.interrupt();
        assert!(clone.is_interrupted());
        assert!(matches!(clone.check(), Err(Error::Interrupted)));
        clone.reset();
        assert!(!handle.is_interrupted());
        assert!(handle.check().is_ok());
    }
}
