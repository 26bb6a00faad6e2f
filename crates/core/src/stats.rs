use std::time::Duration;

use crate::stack::ProtocolStack;

/// Snapshot of a single candidate's outcome during a race, surfaced for
/// diagnostics after establishment completes or fails.
#[derive(Debug, Clone)]
pub struct CandidateStats {
    pub description: String,
    pub stack: ProtocolStack,
    pub rank: usize,
    pub attempted: bool,
    pub succeeded: bool,
    pub error: Option<String>,
    pub time_to_ready: Option<Duration>,
}

/// A point-in-time snapshot of a Connection's counters, modeled on the
/// buffered-amount/bytes/messages accounting the source tracks per
/// stream.
#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub buffered_amount: usize,
    pub send_errors: u64,
    pub receive_errors: u64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_sent(&mut self, bytes: usize) {
        self.messages_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub(crate) fn record_received(&mut self, bytes: usize) {
        self.messages_received += 1;
        self.bytes_received += bytes as u64;
    }
}
