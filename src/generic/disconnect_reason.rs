// src/generic/disconnect_reason.rs

use std::fmt;

/// Why a peer left, as surfaced through `on_disconnect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The remote sent an explicit `Disconnect`.
    ClientRequest,
    /// No traffic from the peer within the idle timeout.
    Timeout,
    /// A pending packet ran out of retransmit attempts.
    RetryExhausted,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::ClientRequest => "Client requested disconnect.",
            DisconnectReason::Timeout => "Connection timed out.",
            DisconnectReason::RetryExhausted => "retry exhaustion",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
