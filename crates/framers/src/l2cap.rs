use bytes::Bytes;
use taps_core::{Framer, Message, Result};

use crate::error::Error;

/// MTU-bounded framer. Outbound messages larger than `mtu` are split
/// into `mtu`-sized chunks when `auto_fragment` is enabled (otherwise
/// oversize sends fail); inbound preserves each received chunk as one
/// message, matching L2CAP's datagram semantics rather than a
/// byte-stream's reassembly.
pub struct L2capFramer {
    mtu: usize,
    auto_fragment: bool,
}

impl L2capFramer {
    pub fn new(mtu: usize) -> Self {
        L2capFramer {
            mtu,
            auto_fragment: true,
        }
    }

    pub fn with_auto_fragment(mut self, auto_fragment: bool) -> Self {
        self.auto_fragment = auto_fragment;
        self
    }
}

impl Framer for L2capFramer {
    fn frame_outbound(&mut self, message: &Message) -> Result<Vec<Bytes>> {
        if message.data.len() <= self.mtu {
            return Ok(vec![message.data.clone()]);
        }
        if !self.auto_fragment {
            return Err(Error::MessageTooLarge {
                actual: message.data.len(),
                max: self.mtu,
            }
            .into());
        }
        Ok(message
            .data
            .chunks(self.mtu)
            .map(Bytes::copy_from_slice)
            .collect())
    }

    fn parse_inbound(&mut self, bytes: &[u8]) -> Result<Vec<Message>> {
        // Each transport read already corresponds to one L2CAP datagram
        // at this layer; no reassembly buffer is kept.
        Ok(vec![Message::new(bytes.to_vec())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragments_outbound_when_over_mtu() {
        let mut framer = L2capFramer::new(4);
        let chunks = framer.frame_outbound(&Message::new(&b"abcdefgh"[..])).unwrap();
        assert_eq!(chunks, vec![Bytes::from_static(b"abcd"), Bytes::from_static(b"efgh")]);
    }

    #[test]
    fn rejects_oversize_when_auto_fragment_disabled() {
        let mut framer = L2capFramer::new(4).with_auto_fragment(false);
        let err = framer
            .frame_outbound(&Message::new(&b"abcdefgh"[..]))
            .unwrap_err();
        assert!(matches!(err, taps_core::Error::SendFailure { .. }));
    }

    #[test]
    fn inbound_preserves_chunk_as_one_message() {
        let mut framer = L2capFramer::new(1024);
        let messages = framer.parse_inbound(b"whole-datagram").unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(&messages[0].data[..], b"whole-datagram");
    }
}
