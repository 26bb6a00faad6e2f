//! Built-in `Framer` implementations for the Transport Services runtime:
//! length-prefixed and delimited byte streams, fixed-size records, an
//! MTU-bounded datagram framer, WebSocket (RFC 6455), and HTTP/1.x.

mod delimiter;
mod error;
mod fixed_size;
mod http1x;
mod l2cap;
mod length_prefix;
mod websocket;

pub use delimiter::{DelimiterFramer, DEFAULT_MAX_MESSAGE_SIZE as DELIMITER_DEFAULT_MAX_MESSAGE_SIZE};
pub use error::Error;
pub use fixed_size::FixedSizeFramer;
pub use http1x::{Http1xFramer, Http1xRole};
pub use l2cap::L2capFramer;
pub use length_prefix::{LengthPrefixFramer, DEFAULT_MAX_SIZE as LENGTH_PREFIX_DEFAULT_MAX_SIZE};
pub use websocket::{Role as WebSocketRole, WebSocketFramer};
