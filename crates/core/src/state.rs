use std::fmt;

/// Lifecycle state of a [`crate::connection::Connection`].
///
/// Initial state on construction is `Establishing`; `Closed` is terminal.
/// `abort()` forces any state synchronously to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Establishing,
    Established,
    Closing,
    Closed,
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Establishing
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Establishing => "Establishing",
            ConnectionState::Established => "Established",
            ConnectionState::Closing => "Closing",
            ConnectionState::Closed => "Closed",
        };
        write!(f, "{s}")
    }
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }

    pub fn can_send(&self) -> bool {
        matches!(self, ConnectionState::Established)
    }

    pub fn can_receive(&self) -> bool {
        matches!(self, ConnectionState::Established)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_establishing() {
        assert_eq!(ConnectionState::default(), ConnectionState::Establishing);
    }

    #[test]
    fn only_closed_is_terminal() {
        assert!(!ConnectionState::Establishing.is_terminal());
        assert!(!ConnectionState::Established.is_terminal());
        assert!(!ConnectionState::Closing.is_terminal());
        assert!(ConnectionState::Closed.is_terminal());
    }
}
