//! Connection state and the global shutdown signal

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Disconnected -> Connected -> Stopping -> Stopped. No way back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Stopping,
    Stopped,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Shared, sticky cancellation flag
///
/// Checked at every bounded suspension point: socket read, reply poll,
/// event dequeue. Once raised it stays raised.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if this call raised it
    pub fn raise(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_is_shared_and_sticky() {
        let signal = ShutdownSignal::new();
        let observer = signal.clone();
        assert!(!observer.is_raised());

        assert!(signal.raise());
        assert!(!signal.raise());
        assert!(observer.is_raised());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Stopping.to_string(), "stopping");
    }
}
