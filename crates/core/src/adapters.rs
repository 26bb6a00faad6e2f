use std::net::IpAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::endpoint::Endpoint;
use crate::errors::Result;
use crate::security::{Certificate, SecurityParameters};
use crate::stack::ProtocolStack;

/// A live, half-duplex-agnostic transport connection handed back by a
/// [`TransportDriver`]. The core calls `read`/`write` from its own
/// reader/producer loops; the driver owns the actual socket.
#[async_trait]
pub trait TransportHandle: Send + Sync {
    async fn read(&self, buf: &mut [u8]) -> Result<usize>;
    async fn write(&self, buf: &[u8]) -> Result<usize>;
    /// Resolves once the handle's handshake (TCP connect, TLS, QUIC) has
    /// fully completed and the transport is ready to carry data.
    async fn ready(&self) -> Result<()>;
    /// Graceful close: signals end-of-stream on the write side.
    async fn close(&self) -> Result<()>;
    /// Best-effort immediate teardown; releases the underlying socket.
    async fn abort(&self);
    fn local_endpoint(&self) -> Endpoint;
    fn remote_endpoint(&self) -> Endpoint;
    fn negotiated_alpn(&self) -> Option<String> {
        None
    }
    fn peer_certificate(&self) -> Option<Certificate> {
        None
    }
}

/// A passive listening handle; each accepted transport is delivered as a
/// fresh [`TransportHandle`].
#[async_trait]
pub trait ListenHandle: Send + Sync {
    async fn accept(&self) -> Result<Box<dyn TransportHandle>>;
    async fn close(&self) -> Result<()>;
    fn local_endpoint(&self) -> Endpoint;
}

/// The platform adapter that owns sockets and exposes readiness as
/// awaitable futures. Everything OS-socket-shaped (epoll/kqueue/IOCP,
/// actual TCP/UDP/QUIC implementations) lives behind this trait.
#[async_trait]
pub trait TransportDriver: Send + Sync {
    async fn connect(
        &self,
        local: &Endpoint,
        remote: &Endpoint,
        stack: ProtocolStack,
    ) -> Result<Box<dyn TransportHandle>>;

    async fn listen(&self, local: &Endpoint, stack: ProtocolStack) -> Result<Box<dyn ListenHandle>>;
}

/// DNS-shaped name resolution, kept abstract so the core never links
/// against a concrete resolver implementation.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve_host(&self, name: &str) -> Result<Vec<IpAddr>>;
    async fn resolve_service(&self, name: &str) -> Result<u16>;
}

/// Monotonic time and sleep futures, used by race staggering and
/// timeouts. Abstracted so tests can run with a virtual clock.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

/// TLS/DTLS handshake orchestration, delegated entirely to an external
/// provider. The core only decides *when* to call these and what to do
/// with the result.
#[async_trait]
pub trait TlsProvider: Send + Sync {
    async fn wrap_client(
        &self,
        handle: Box<dyn TransportHandle>,
        params: &SecurityParameters,
    ) -> Result<Box<dyn TransportHandle>>;

    async fn wrap_server(
        &self,
        handle: Box<dyn TransportHandle>,
        params: &SecurityParameters,
    ) -> Result<Box<dyn TransportHandle>>;
}
