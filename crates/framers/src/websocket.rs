use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::RngCore;
use taps_core::{Framer, Message, Result};

use crate::error::Error;

const OPCODE_CONTINUATION: u8 = 0x0;
const OPCODE_TEXT: u8 = 0x1;
const OPCODE_BINARY: u8 = 0x2;
const OPCODE_CLOSE: u8 = 0x8;
const OPCODE_PING: u8 = 0x9;
const OPCODE_PONG: u8 = 0xA;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Role {
    Client,
    Server,
}

/// RFC 6455 framing. Masking is mandatory on every frame sent by a
/// `Client`-role framer and must never be set by a `Server`-role one.
/// Continuation frames are reassembled into a single message; unknown
/// opcodes fail the connection.
pub struct WebSocketFramer {
    role: Role,
    buffer: BytesMut,
    fragment: Option<(u8, Vec<u8>)>,
}

impl WebSocketFramer {
    pub fn client() -> Self {
        WebSocketFramer {
            role: Role::Client,
            buffer: BytesMut::new(),
            fragment: None,
        }
    }

    pub fn server() -> Self {
        WebSocketFramer {
            role: Role::Server,
            buffer: BytesMut::new(),
            fragment: None,
        }
    }
}

impl Framer for WebSocketFramer {
    fn frame_outbound(&mut self, message: &Message) -> Result<Vec<Bytes>> {
        Ok(vec![encode_frame(self.role, OPCODE_BINARY, &message.data)])
    }

    fn parse_inbound(&mut self, bytes: &[u8]) -> Result<Vec<Message>> {
        self.buffer.extend_from_slice(bytes);
        let mut messages = Vec::new();

        loop {
            let parsed = try_parse_frame(&self.buffer)?;
            let (consumed, fin, opcode, payload) = match parsed {
                Some(frame) => frame,
                None => break,
            };
            self.buffer.advance(consumed);

            match opcode {
                OPCODE_TEXT | OPCODE_BINARY => {
                    if fin {
                        messages.push(Message::new(payload));
                    } else {
                        self.fragment = Some((opcode, payload));
                    }
                }
                OPCODE_CONTINUATION => {
                    let (op, mut acc) = self
                        .fragment
                        .take()
                        .ok_or(Error::UnexpectedContinuation)?;
                    acc.extend_from_slice(&payload);
                    if fin {
                        messages.push(Message::new(acc));
                    } else {
                        self.fragment = Some((op, acc));
                    }
                }
                OPCODE_CLOSE | OPCODE_PING | OPCODE_PONG => {
                    messages.push(Message::new(payload));
                }
                other => return Err(Error::UnsupportedOpcode(other).into()),
            }
        }

        Ok(messages)
    }

    fn connection_did_open(&mut self) {
        self.buffer.clear();
        self.fragment = None;
    }

    fn connection_did_close(&mut self) {
        self.buffer.clear();
        self.fragment = None;
    }
}

fn encode_frame(role: Role, opcode: u8, payload: &[u8]) -> Bytes {
    let mut out = BytesMut::new();
    out.put_u8(0x80 | opcode);

    let masked = role == Role::Client;
    let mask_bit = if masked { 0x80 } else { 0x00 };
    let len = payload.len();

    if len < 126 {
        out.put_u8(mask_bit | len as u8);
    } else if len <= u16::MAX as usize {
        out.put_u8(mask_bit | 126);
        out.put_u16(len as u16);
    } else {
        out.put_u8(mask_bit | 127);
        out.put_u64(len as u64);
    }

    if masked {
        let mut key = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut key);
        out.extend_from_slice(&key);
        let mut masked_payload = payload.to_vec();
        for (i, b) in masked_payload.iter_mut().enumerate() {
            *b ^= key[i % 4];
        }
        out.extend_from_slice(&masked_payload);
    } else {
        out.extend_from_slice(payload);
    }

    out.freeze()
}

/// Attempts to parse one full frame from `buf`, returning
/// `(bytes_consumed, fin, opcode, unmasked_payload)`, or `None` if more
/// bytes are needed.
fn try_parse_frame(buf: &[u8]) -> Result<Option<(usize, bool, u8, Vec<u8>)>> {
    if buf.len() < 2 {
        return Ok(None);
    }
    let b0 = buf[0];
    let b1 = buf[1];
    let fin = b0 & 0x80 != 0;
    let opcode = b0 & 0x0F;
    let masked = b1 & 0x80 != 0;
    let mut len = (b1 & 0x7F) as usize;
    let mut offset = 2;

    if len == 126 {
        if buf.len() < offset + 2 {
            return Ok(None);
        }
        len = u16::from_be_bytes([buf[offset], buf[offset + 1]]) as usize;
        offset += 2;
    } else if len == 127 {
        if buf.len() < offset + 8 {
            return Ok(None);
        }
        let mut arr = [0u8; 8];
        arr.copy_from_slice(&buf[offset..offset + 8]);
        len = u64::from_be_bytes(arr) as usize;
        offset += 8;
    }

    let mask_key = if masked {
        if buf.len() < offset + 4 {
            return Ok(None);
        }
        let key = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
        offset += 4;
        Some(key)
    } else {
        None
    };

    if buf.len() < offset + len {
        return Ok(None);
    }

    let mut payload = buf[offset..offset + len].to_vec();
    if let Some(key) = mask_key {
        for (i, b) in payload.iter_mut().enumerate() {
            *b ^= key[i % 4];
        }
    }

    Ok(Some((offset + len, fin, opcode, payload)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_are_masked() {
        let mut framer = WebSocketFramer::client();
        let chunks = framer.frame_outbound(&Message::new(&b"hi"[..])).unwrap();
        let wire = &chunks[0];
        assert_eq!(wire[1] & 0x80, 0x80, "mask bit must be set from client");
    }

    #[test]
    fn server_frames_are_not_masked() {
        let mut framer = WebSocketFramer::server();
        let chunks = framer.frame_outbound(&Message::new(&b"hi"[..])).unwrap();
        let wire = &chunks[0];
        assert_eq!(wire[1] & 0x80, 0, "server frames must not be masked");
    }

    #[test]
    fn round_trips_varied_sizes_client_to_server() {
        let mut client = WebSocketFramer::client();
        let mut server = WebSocketFramer::server();

        for size in [5usize, 130, 70_000] {
            let payload = vec![0x42u8; size];
            let chunks = client.frame_outbound(&Message::new(payload.clone())).unwrap();
            let wire: Vec<u8> = chunks.into_iter().flatten().collect();
            let messages = server.parse_inbound(&wire).unwrap();
            assert_eq!(messages.len(), 1);
            assert_eq!(messages[0].data.len(), size);
            assert_eq!(&messages[0].data[..], payload.as_slice());
        }
    }

    #[test]
    fn reassembles_continuation_frames() {
        let mut server = WebSocketFramer::server();
        let mut first = encode_frame(Role::Server, OPCODE_BINARY, b"hel").to_vec();
        first[0] &= !0x80; // clear FIN
        let cont = encode_frame(Role::Server, OPCODE_CONTINUATION, b"lo");

        let mut messages = server.parse_inbound(&first).unwrap();
        assert!(messages.is_empty());
        messages = server.parse_inbound(&cont).unwrap();
        assert_eq!(&messages[0].data[..], b"hello");
    }

    #[test]
    fn unknown_opcode_fails() {
        let mut server = WebSocketFramer::server();
        let frame = [0x83u8, 0x00]; // FIN=1, opcode=3 (reserved), len=0
        let err = server.parse_inbound(&frame).unwrap_err();
        assert!(matches!(err, taps_core::Error::ReceiveFailure { .. }));
    }

    #[test]
    fn continuation_without_start_fails() {
        let mut server = WebSocketFramer::server();
        let frame = encode_frame(Role::Server, OPCODE_CONTINUATION, b"x");
        let err = server.parse_inbound(&frame).unwrap_err();
        assert!(matches!(err, taps_core::Error::ReceiveFailure { .. }));
    }
}
