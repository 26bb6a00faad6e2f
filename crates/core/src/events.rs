use crate::errors::Error;
use crate::message::{Message, MessageContext};

/// Typed, ordered, terminal-aware events emitted on a single Connection.
/// Exhaustive by design: adding a variant is a breaking change, which is
/// desired (see design notes on dynamic event dispatch).
#[derive(Debug, Clone)]
pub enum Event {
    /// Emitted at most once, before any `Received`. Only on
    /// client/rendezvous connections; accepted connections are delivered
    /// already Established via the Listener.
    Ready,
    Received(Message),
    ReceivedPartial { fragment: Message, end_of_message: bool },
    Sent(MessageContext),
    Expired(MessageContext),
    SendError(MessageContext, Error),
    ReceiveError(Error),
    PathChange,
    SoftError(String),
    /// Terminal: graceful close completed.
    Closed,
    /// Terminal: the connection failed fatally.
    ConnectionError(Error),
}

impl Event {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Closed | Event::ConnectionError(_))
    }
}

/// Events surfaced by a Listener, distinct from per-connection events.
#[derive(Debug, Clone)]
pub enum ListenerEvent {
    ConnectionReceived,
    EstablishmentError(Error),
    Stopped,
}

/// Events surfaced by a Preconnection-level establishment call that has
/// not yet produced a Connection.
#[derive(Debug, Clone)]
pub enum EstablishmentEvent {
    EstablishmentError(Error),
    RendezvousDone,
}
