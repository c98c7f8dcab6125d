//! Connection state published by the connection kernel.
//!
//! Application code observes it through a `watch` channel
//! ([`MqttInstance::state`](crate::MqttInstance::state)) to gate startup and
//! to log connectivity transitions.

use std::fmt;

/// Current state of the broker connection.
///
/// ```text
/// Connecting ──(CONNACK)──> Connected
///     ▲                         │
///     │                   (network error)
///     │                         ▼
/// Reconnecting(secs) <──── Disconnected(reason)
///
/// any ──(shutdown / fatal error / retries exhausted)──> Stopped(reason)
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// CONNECT sent (or about to be), waiting for CONNACK.
    Connecting,

    /// Handshake complete; publishes are acknowledged.
    Connected,

    /// Connection lost; the kernel is about to schedule a reconnect.
    Disconnected(String),

    /// Waiting the given number of seconds before the next attempt.
    Reconnecting(f64),

    /// The kernel has exited and will not reconnect.
    Stopped(String),
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnected(_) => "Disconnected",
            ConnectionState::Reconnecting(_) => "Reconnecting",
            ConnectionState::Stopped(_) => "Stopped",
        }
    }

    /// Disconnect/stop reason or reconnect countdown; empty otherwise.
    pub fn details(&self) -> String {
        match self {
            ConnectionState::Connecting | ConnectionState::Connected => String::new(),
            ConnectionState::Disconnected(reason) | ConnectionState::Stopped(reason) => {
                reason.clone()
            }
            ConnectionState::Reconnecting(seconds) => format!("in {seconds:.1} seconds"),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// True once the kernel has exited for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Stopped(_))
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())?;
        let details = self.details();
        if !details.is_empty() {
            write!(f, " ({details})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "Connected");
        assert_eq!(
            ConnectionState::Reconnecting(2.5).to_string(),
            "Reconnecting (in 2.5 seconds)"
        );
        assert_eq!(
            ConnectionState::Stopped("shutdown".into()).to_string(),
            "Stopped (shutdown)"
        );
    }

    #[test]
    fn test_state_predicates() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(ConnectionState::Stopped("fatal".into()).is_terminal());
        assert!(!ConnectionState::Disconnected("io".into()).is_terminal());
    }
}
