use bytes::{Bytes, BytesMut};
use taps_core::{Framer, Message, Result};

use crate::error::Error;

pub const DEFAULT_MAX_HEADER_SIZE: usize = 8 * 1024;
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

const CRLFCRLF: &[u8] = b"\r\n\r\n";

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Http1xRole {
    Client,
    Server,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum BodyLength {
    Known(usize),
    Chunked,
    None,
}

/// Frames a byte stream into whole HTTP/1.x messages: a CRLFCRLF-terminated
/// header block followed by a body sized by `Content-Length` or
/// `Transfer-Encoding: chunked`. `frame_outbound` passes payloads through
/// unchanged on the assumption the caller has already composed a
/// well-formed request or response line plus headers and body.
pub struct Http1xFramer {
    #[allow(dead_code)]
    role: Http1xRole,
    max_header_size: usize,
    max_body_size: usize,
    buffer: BytesMut,
}

impl Http1xFramer {
    pub fn new(role: Http1xRole) -> Self {
        Http1xFramer {
            role,
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            buffer: BytesMut::new(),
        }
    }

    pub fn with_max_header_size(mut self, max: usize) -> Self {
        self.max_header_size = max;
        self
    }

    pub fn with_max_body_size(mut self, max: usize) -> Self {
        self.max_body_size = max;
        self
    }

    fn find_header_end(&self) -> Option<usize> {
        self.buffer
            .windows(CRLFCRLF.len())
            .position(|w| w == CRLFCRLF)
            .map(|pos| pos + CRLFCRLF.len())
    }

    fn body_length(&self, header_block: &[u8]) -> Result<BodyLength> {
        let text = String::from_utf8_lossy(header_block);
        let mut chunked = false;
        let mut content_length: Option<usize> = None;

        for line in text.split("\r\n").skip(1) {
            if line.is_empty() {
                continue;
            }
            let mut parts = line.splitn(2, ':');
            let name = parts.next().unwrap_or("").trim().to_ascii_lowercase();
            let value = parts.next().unwrap_or("").trim();

            if name == "transfer-encoding" && value.eq_ignore_ascii_case("chunked") {
                chunked = true;
            } else if name == "content-length" {
                let len = value
                    .parse::<usize>()
                    .map_err(|_| Error::MalformedHttp(format!("invalid Content-Length: {value}")))?;
                content_length = Some(len);
            }
        }

        if chunked {
            Ok(BodyLength::Chunked)
        } else if let Some(len) = content_length {
            Ok(BodyLength::Known(len))
        } else {
            Ok(BodyLength::None)
        }
    }

    /// Scans for a complete chunked body starting at `start`, returning the
    /// total byte length of the chunked body (including the terminating
    /// zero-size chunk and its trailing CRLFCRLF) once fully buffered.
    fn find_chunked_body_end(&self, start: usize) -> Result<Option<usize>> {
        let mut pos = start;
        loop {
            let chunk_header_end = match self.buffer[pos..]
                .windows(2)
                .position(|w| w == b"\r\n")
            {
                Some(p) => pos + p + 2,
                None => return Ok(None),
            };

            let size_line = std::str::from_utf8(&self.buffer[pos..chunk_header_end - 2])
                .map_err(|_| Error::MalformedHttp("non-utf8 chunk size".into()))?;
            let size_str = size_line.split(';').next().unwrap_or("").trim();
            let chunk_size = usize::from_str_radix(size_str, 16)
                .map_err(|_| Error::MalformedHttp(format!("invalid chunk size: {size_str}")))?;

            if chunk_size == 0 {
                let terminator_end = chunk_header_end + 2;
                if self.buffer.len() < terminator_end {
                    return Ok(None);
                }
                return Ok(Some(terminator_end));
            }

            let data_end = chunk_header_end + chunk_size + 2;
            if self.buffer.len() < data_end {
                return Ok(None);
            }
            pos = data_end;
        }
    }
}

impl Framer for Http1xFramer {
    fn frame_outbound(&mut self, message: &Message) -> Result<Vec<Bytes>> {
        Ok(vec![message.data.clone()])
    }

    fn parse_inbound(&mut self, bytes: &[u8]) -> Result<Vec<Message>> {
        self.buffer.extend_from_slice(bytes);
        let mut messages = Vec::new();

        loop {
            let header_end = match self.find_header_end() {
                Some(end) => end,
                None => {
                    if self.buffer.len() > self.max_header_size {
                        return Err(Error::HeaderTooLarge {
                            max: self.max_header_size,
                        }
                        .into());
                    }
                    break;
                }
            };
            if header_end > self.max_header_size {
                return Err(Error::HeaderTooLarge {
                    max: self.max_header_size,
                }
                .into());
            }

            let body_length = self.body_length(&self.buffer[..header_end])?;
            let total_len = match body_length {
                BodyLength::Known(len) => {
                    if len > self.max_body_size {
                        return Err(Error::BodyTooLarge {
                            max: self.max_body_size,
                        }
                        .into());
                    }
                    let total = header_end + len;
                    if self.buffer.len() < total {
                        break;
                    }
                    total
                }
                BodyLength::Chunked => match self.find_chunked_body_end(header_end)? {
                    Some(end) => {
                        if end - header_end > self.max_body_size {
                            return Err(Error::BodyTooLarge {
                                max: self.max_body_size,
                            }
                            .into());
                        }
                        end
                    }
                    None => break,
                },
                BodyLength::None => header_end,
            };

            let message_bytes = self.buffer.split_to(total_len);
            messages.push(Message::new(message_bytes.freeze()));
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
    fn parses_request_with_content_length() {
        let mut framer = Http1xFramer::new(Http1xRole::Server);
        let wire = b"GET / HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nhello";
        let messages = framer.parse_inbound(wire).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(&messages[0].data[..], wire.as_slice());
    }

    #[test]
    fn waits_for_full_body_across_reads() {
        let mut framer = Http1xFramer::new(Http1xRole::Server);
        let head = b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\n";
        assert!(framer.parse_inbound(head).unwrap().is_empty());
        assert!(framer.parse_inbound(b"he").unwrap().is_empty());
        let messages = framer.parse_inbound(b"llo").unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn parses_chunked_body() {
        let mut framer = Http1xFramer::new(Http1xRole::Server);
        let wire = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
        let messages = framer.parse_inbound(wire).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(&messages[0].data[..], wire.as_slice());
    }

    #[test]
    fn request_with_no_body_completes_at_header_end() {
        let mut framer = Http1xFramer::new(Http1xRole::Server);
        let wire = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n";
        let messages = framer.parse_inbound(wire).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(&messages[0].data[..], wire.as_slice());
    }

    #[test]
    fn oversize_header_fails() {
        let mut framer = Http1xFramer::new(Http1xRole::Server).with_max_header_size(16);
        let wire = b"GET /aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa HTTP/1.1\r\n\r\n";
        let err = framer.parse_inbound(wire).unwrap_err();
        assert!(matches!(err, taps_core::Error::ReceiveFailure { .. }));
    }

    #[test]
    fn oversize_content_length_fails() {
        let mut framer = Http1xFramer::new(Http1xRole::Server).with_max_body_size(4);
        let wire = b"POST / HTTP/1.1\r\nContent-Length: 1000\r\n\r\n";
        let err = framer.parse_inbound(wire).unwrap_err();
        assert!(matches!(err, taps_core::Error::ReceiveFailure { .. }));
    }

    #[test]
    fn parses_two_requests_back_to_back() {
        let mut framer = Http1xFramer::new(Http1xRole::Server);
        let one = b"GET / HTTP/1.1\r\n\r\n";
        let two = b"GET /b HTTP/1.1\r\n\r\n";
        let mut wire = one.to_vec();
        wire.extend_from_slice(two);
        let messages = framer.parse_inbound(&wire).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(&messages[0].data[..], one.as_slice());
        assert_eq!(&messages[1].data[..], two.as_slice());
    }
}
