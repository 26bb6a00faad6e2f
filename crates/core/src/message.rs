use bytes::Bytes;
use std::time::{Duration, Instant};

use crate::endpoint::Endpoint;

pub const DEFAULT_PRIORITY: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumCoverage {
    Full,
    Bytes(u32),
}

impl Default for ChecksumCoverage {
    fn default() -> Self {
        ChecksumCoverage::Full
    }
}

/// Per-message metadata threaded through send and populated on receive.
///
/// `final_` closes the send direction of the owning connection: once a
/// message carrying `final_=true` is sent, no further sends MAY be issued
/// on that connection.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub lifetime: Option<Duration>,
    pub priority: u8,
    pub ordered: bool,
    pub reliable: bool,
    pub safely_replayable: bool,
    pub final_: bool,
    pub checksum_coverage: ChecksumCoverage,
    pub capacity_profile_override: Option<crate::properties::CapacityProfile>,
    pub can_fragment: bool,
    pub can_segment: bool,

    // Populated on receive only; ignored (and left default) for sends.
    pub remote_endpoint: Option<Endpoint>,
    pub local_endpoint: Option<Endpoint>,
    pub ecn: Option<u8>,
    pub early_data: bool,
}

impl Default for MessageContext {
    fn default() -> Self {
        MessageContext {
            lifetime: None,
            priority: DEFAULT_PRIORITY,
            ordered: true,
            reliable: true,
            safely_replayable: false,
            final_: false,
            checksum_coverage: ChecksumCoverage::default(),
            capacity_profile_override: None,
            can_fragment: true,
            can_segment: true,
            remote_endpoint: None,
            local_endpoint: None,
            ecn: None,
            early_data: false,
        }
    }
}

impl MessageContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    pub fn marked_final(mut self) -> Self {
        self.final_ = true;
        self
    }

    pub fn unordered(mut self) -> Self {
        self.ordered = false;
        self
    }

    pub fn unreliable(mut self) -> Self {
        self.reliable = false;
        self
    }
}

/// The atomic transfer unit: a byte payload plus its context. Boundaries
/// are preserved end-to-end when the framer pipeline is configured with
/// `preserve_msg_boundaries = require`.
#[derive(Debug, Clone)]
pub struct Message {
    pub data: Bytes,
    pub context: MessageContext,
}

impl Message {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Message {
            data: data.into(),
            context: MessageContext::default(),
        }
    }

    pub fn with_context(data: impl Into<Bytes>, context: MessageContext) -> Self {
        Message {
            data: data.into(),
            context,
        }
    }

    /// Whether this message's lifetime, if any, has elapsed relative to
    /// `enqueued_at`. Expired messages MUST NOT be sent and emit
    /// `Event::Expired` instead of `Event::Sent`.
    pub fn is_expired(&self, enqueued_at: Instant) -> bool {
        match self.context.lifetime {
            Some(lifetime) => enqueued_at.elapsed() >= lifetime,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_without_lifetime_never_expires() {
        let msg = Message::new(Bytes::from_static(b"hi"));
        assert!(!msg.is_expired(Instant::now() - Duration::from_secs(3600)));
    }

    #[test]
    fn message_with_elapsed_lifetime_is_expired() {
        let ctx = MessageContext::new().with_lifetime(Duration::from_millis(1));
        let msg = Message::with_context(Bytes::from_static(b"hi"), ctx);
        let enqueued_at = Instant::now() - Duration::from_millis(50);
        assert!(msg.is_expired(enqueued_at));
    }

    #[test]
    fn final_flag_builder() {
        let ctx = MessageContext::new().marked_final();
        assert!(ctx.final_);
    }
}
