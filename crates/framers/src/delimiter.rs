use bytes::{Bytes, BytesMut};
use taps_core::{Framer, Message, Result};

use crate::error::Error;

pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Splits messages on a sequence terminator. When `include_delimiter` is
/// false (the default), a message containing the delimiter fails to
/// encode; when true, the delimiter is sent as part of the payload.
pub struct DelimiterFramer {
    delimiter: Vec<u8>,
    include_delimiter: bool,
    max_message_size: usize,
    buffer: BytesMut,
}

impl DelimiterFramer {
    pub fn new(delimiter: impl Into<Vec<u8>>) -> Self {
        DelimiterFramer {
            delimiter: delimiter.into(),
            include_delimiter: false,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            buffer: BytesMut::new(),
        }
    }

    pub fn with_include_delimiter(mut self, include: bool) -> Self {
        self.include_delimiter = include;
        self
    }

    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    fn find_delimiter(&self) -> Option<usize> {
        if self.delimiter.is_empty() {
            return None;
        }
        self.buffer
            .windows(self.delimiter.len())
            .position(|w| w == self.delimiter.as_slice())
    }
}

impl Framer for DelimiterFramer {
    fn frame_outbound(&mut self, message: &Message) -> Result<Vec<Bytes>> {
        if !self.include_delimiter
            && message
                .data
                .windows(self.delimiter.len().max(1))
                .any(|w| w == self.delimiter.as_slice())
        {
            return Err(Error::MessageContainsDelimiter.into());
        }

        let mut out = BytesMut::with_capacity(message.data.len() + self.delimiter.len());
        out.extend_from_slice(&message.data);
        out.extend_from_slice(&self.delimiter);
        Ok(vec![out.freeze()])
    }

    fn parse_inbound(&mut self, bytes: &[u8]) -> Result<Vec<Message>> {
        self.buffer.extend_from_slice(bytes);
        let mut messages = Vec::new();

        while let Some(pos) = self.find_delimiter() {
            if self.include_delimiter {
                let message_bytes = self.buffer.split_to(pos + self.delimiter.len());
                messages.push(Message::new(message_bytes.freeze()));
            } else {
                let message_bytes = self.buffer.split_to(pos);
                let _ = self.buffer.split_to(self.delimiter.len());
                messages.push(Message::new(message_bytes.freeze()));
            }
        }

        if self.buffer.len() > self.max_message_size + self.delimiter.len() {
            return Err(Error::DelimiterOverflow.into());
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
