use bytes::{BufMut, Bytes, BytesMut};
use taps_core::{Framer, Message, Result};

use crate::error::Error;

pub const DEFAULT_MAX_SIZE: usize = 1024 * 1024;
const HEADER_LEN: usize = 4;

/// 4-byte big-endian length prefix, then that many bytes of payload.
/// Oversize outbound messages and inbound declared lengths fail the
/// connection's framing; see the wire contract.
pub struct LengthPrefixFramer {
    max_size: usize,
    buffer: BytesMut,
}

impl Default for LengthPrefixFramer {
    fn default() -> Self {
        LengthPrefixFramer::new(DEFAULT_MAX_SIZE)
    }
}

impl LengthPrefixFramer {
    pub fn new(max_size: usize) -> Self {
        LengthPrefixFramer {
            max_size,
            buffer: BytesMut::new(),
        }
    }
}

impl Framer for LengthPrefixFramer {
    fn frame_outbound(&mut self, message: &Message) -> Result<Vec<Bytes>> {
        let len = message.data.len();
        if len > self.max_size {
            return Err(Error::MessageTooLarge {
                actual: len,
                max: self.max_size,
            }
            .into());
        }
        let mut out = BytesMut::with_capacity(HEADER_LEN + len);
        out.put_u32(len as u32);
        out.extend_from_slice(&message.data);
        Ok(vec![out.freeze()])
    }

    fn parse_inbound(&mut self, bytes: &[u8]) -> Result<Vec<Message>> {
        self.buffer.extend_from_slice(bytes);
        let mut messages = Vec::new();

        loop {
            if self.buffer.len() < HEADER_LEN {
                break;
            }
            let len = u32::from_be_bytes([
                self.buffer[0],
                self.buffer[1],
                self.buffer[2],
                self.buffer[3],
            ]) as usize;

            if len > self.max_size {
                return Err(Error::MessageTooLarge {
                    actual: len,
                    max: self.max_size,
                }
                .into());
            }
            if self.buffer.len() < HEADER_LEN + len {
                break;
            }

            let _header = self.buffer.split_to(HEADER_LEN);
            let payload = self.buffer.split_to(len);
            messages.push(Message::new(payload.freeze()));
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
