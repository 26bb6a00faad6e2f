use bytes::{Bytes, BytesMut};
use taps_core::{Framer, Message, Result};

use crate::error::Error;

/// Every message is exactly `size` bytes. Sends of any other size are
/// rejected; receives yield one message per `size` bytes accumulated.
pub struct FixedSizeFramer {
    size: usize,
    buffer: BytesMut,
}

impl FixedSizeFramer {
    pub fn new(size: usize) -> Self {
        FixedSizeFramer {
            size,
            buffer: BytesMut::new(),
        }
    }
}

impl Framer for FixedSizeFramer {
    fn frame_outbound(&mut self, message: &Message) -> Result<Vec<Bytes>> {
        if message.data.len() != self.size {
            return Err(Error::WrongFixedSize {
                expected: self.size,
                actual: message.data.len(),
            }
            .into());
        }
        Ok(vec![message.data.clone()])
    }

    fn parse_inbound(&mut self, bytes: &[u8]) -> Result<Vec<Message>> {
        self.buffer.extend_from_slice(bytes);
        let mut messages = Vec::new();
        while self.buffer.len() >= self.size {
            let chunk = self.buffer.split_to(self.size);
            messages.push(Message::new(chunk.freeze()));
        }
        Ok(messages)
    }

    fn connection_did_open(&mut self) {
        self.buffer.clear();
    }

    fn connection_did_close(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_size_send() {
        let mut framer = FixedSizeFramer::new(4);
        let err = framer.frame_outbound(&Message::new(&b"abc"[..])).unwrap_err();
        assert!(matches!(err, taps_core::Error::SendFailure { .. }));
    }

    #[test]
    fn yields_one_message_per_chunk() {
        let mut framer = FixedSizeFramer::new(2);
        let messages = framer.parse_inbound(b"abcd").unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(&messages[0].data[..], b"ab");
        assert_eq!(&messages[1].data[..], b"cd");
    }

    #[test]
    fn holds_partial_chunk_across_reads() {
        let mut framer = FixedSizeFramer::new(3);
        assert!(framer.parse_inbound(b"ab").unwrap().is_empty());
        let messages = framer.parse_inbound(b"c").unwrap();
        assert_eq!(&messages[0].data[..], b"abc");
    }
}
