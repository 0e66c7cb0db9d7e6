//! Link state of a producer node and the reconnect backoff schedule.
//!
//! The agent moves through these states:
//! - `Disconnected` -> `Connecting` (startup, or the link was found down)
//! - `Connecting` -> `Connected` (attach succeeded)
//! - `Connecting` -> `Disconnected` (all attempts failed: offline mode)
//! - `Connected` -> `Sending` -> `Connected` (one reading per iteration)
//! - `Connected` / `Sending` -> `Disconnected` (link loss detected)
//!
//! A failed send never changes state on its own; only link-loss detection
//! drops the node back to `Disconnected`.

use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No link. Initial state, and the state of offline mode: the loop keeps
    /// reading sensors but skips sending.
    Disconnected,

    /// Running the attach sequence (bounded attempts with backoff).
    Connecting,

    /// Attached; readings are sent every iteration.
    Connected,

    /// A reading is in flight to the hub.
    Sending,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Disconnected => "Disconnected",
            LinkState::Connecting => "Connecting",
            LinkState::Connected => "Connected",
            LinkState::Sending => "Sending",
        }
    }

    /// true while the node believes it has a link
    pub fn is_online(&self) -> bool {
        matches!(self, LinkState::Connected | LinkState::Sending)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wait after failed attach attempt `attempt` (0-based): 2^attempt seconds.
///
/// Attempts 0, 1, 2 wait 1s, 2s, 4s. The exponent is capped so a large
/// configured attempt count can't overflow.
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt.min(10))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_one_second() {
        let delays: Vec<u64> = (0..3).map(|n| backoff_delay(n).as_secs()).collect();
        assert_eq!(delays, [1, 2, 4]);
        assert_eq!(backoff_delay(200), Duration::from_secs(1024));
    }

    #[test]
    fn online_states() {
        assert!(LinkState::Connected.is_online());
        assert!(LinkState::Sending.is_online());
        assert!(!LinkState::Connecting.is_online());
        assert!(!LinkState::Disconnected.is_online());
        assert_eq!(LinkState::Sending.to_string(), "Sending");
    }
}
