#![warn(rust_2018_idioms)]

pub mod adapters;
pub mod candidate;
pub mod connection;
pub mod endpoint;
pub mod errors;
pub mod events;
pub mod framer;
pub mod group;
pub mod listener;
pub mod message;
pub mod preconnection;
pub mod properties;
pub mod racing;
pub mod security;
pub mod stack;
pub mod state;
pub mod stats;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use crate::connection::Connection;
pub use crate::endpoint::Endpoint;
pub use crate::errors::{Error, Result};
pub use crate::events::Event;
pub use crate::framer::{Framer, FramerPipeline};
pub use crate::group::ConnectionGroup;
pub use crate::listener::{Listener, NewConnections};
pub use crate::message::{Message, MessageContext};
pub use crate::preconnection::Preconnection;
pub use crate::properties::SelectionProperties;
pub use crate::security::SecurityParameters;
pub use crate::stack::ProtocolStack;
pub use crate::state::ConnectionState;
