use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("buffer too short: expected at least {expected} bytes, have {actual}")]
    UnexpectedEndOfBuffer { expected: usize, actual: usize },

    #[error("message of {actual} bytes exceeds max size {max}")]
    MessageTooLarge { actual: usize, max: usize },

    #[error("fixed-size framer expects messages of exactly {expected} bytes, got {actual}")]
    WrongFixedSize { expected: usize, actual: usize },

    #[error("message contains the delimiter and delimiter-escaping is disabled")]
    MessageContainsDelimiter,

    #[error("parse buffer overflowed without finding a delimiter")]
    DelimiterOverflow,

    #[error("unsupported WebSocket opcode {0}")]
    UnsupportedOpcode(u8),

    #[error("WebSocket frame is missing a required mask")]
    MissingMask,

    #[error("WebSocket continuation frame with no preceding fragmented message")]
    UnexpectedContinuation,

    #[error("malformed HTTP/1.x message: {0}")]
    MalformedHttp(String),

    #[error("HTTP header block exceeds max size {max} bytes")]
    HeaderTooLarge { max: usize },

    #[error("HTTP body exceeds max size {max} bytes")]
    BodyTooLarge { max: usize },
}

impl From<Error> for taps_core::Error {
    fn from(e: Error) -> Self {
        match &e {
            Error::MessageTooLarge { .. }
            | Error::WrongFixedSize { .. }
            | Error::MessageContainsDelimiter => taps_core::Error::send(e.to_string()),
            _ => taps_core::Error::receive(e.to_string()),
        }
    }
}
