//! In-memory fakes for every adapter trait, used by this crate's own
//! tests and available to downstream crates under `#[cfg(test)]`-style
//! integration tests. Modeled on an in-memory `Conn` pair: no real
//! sockets are opened.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::adapters::{Clock, ListenHandle, Resolver, TransportDriver, TransportHandle};
use crate::endpoint::Endpoint;
use crate::errors::{Error, Result};
use crate::stack::ProtocolStack;

const MEMORY_PIPE_CAPACITY: usize = 64 * 1024;

/// Real-time [`Clock`] backed by the tokio timer.
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A [`Resolver`] backed by a fixed address book, for tests that need
/// hostname resolution without touching the network.
#[derive(Default)]
pub struct StaticResolver {
    hosts: HashMap<String, Vec<IpAddr>>,
    services: HashMap<String, u16>,
}

impl StaticResolver {
    pub fn with_host(mut self, name: impl Into<String>, ips: Vec<IpAddr>) -> Self {
        self.hosts.insert(name.into(), ips);
        self
    }

    pub fn with_service(mut self, name: impl Into<String>, port: u16) -> Self {
        self.services.insert(name.into(), port);
        self
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve_host(&self, name: &str) -> Result<Vec<IpAddr>> {
        self.hosts
            .get(name)
            .cloned()
            .ok_or_else(|| Error::establishment(format!("unknown host {name}")))
    }

    async fn resolve_service(&self, name: &str) -> Result<u16> {
        self.services
            .get(name)
            .copied()
            .ok_or_else(|| Error::not_supported(format!("unknown service {name}")))
    }
}

/// A [`TransportHandle`] backed by a `tokio::io::duplex` in-memory pipe.
pub struct MemoryTransportHandle {
    local: Endpoint,
    remote: Endpoint,
    reader: AsyncMutex<ReadHalf<DuplexStream>>,
    writer: AsyncMutex<WriteHalf<DuplexStream>>,
}

#[async_trait]
impl TransportHandle for MemoryTransportHandle {
    async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut r = self.reader.lock().await;
        r.read(buf).await.map_err(|e| Error::receive(e.to_string()))
    }

    async fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut w = self.writer.lock().await;
        w.write(buf).await.map_err(|e| Error::send(e.to_string()))
    }

    async fn ready(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut w = self.writer.lock().await;
        w.shutdown().await.map_err(|e| Error::connection(e.to_string()))
    }

    async fn abort(&self) {
        let mut w = self.writer.lock().await;
        let _ = w.shutdown().await;
    }

    fn local_endpoint(&self) -> Endpoint {
        self.local.clone()
    }

    fn remote_endpoint(&self) -> Endpoint {
        self.remote.clone()
    }
}

/// Builds a connected pair of in-memory transport handles, as if `a`
/// dialed `b`.
pub fn memory_pair(a: Endpoint, b: Endpoint) -> (MemoryTransportHandle, MemoryTransportHandle) {
    let (left, right) = tokio::io::duplex(MEMORY_PIPE_CAPACITY);
    let (lr, lw) = tokio::io::split(left);
    let (rr, rw) = tokio::io::split(right);
    (
        MemoryTransportHandle {
            local: a.clone(),
            remote: b.clone(),
            reader: AsyncMutex::new(lr),
            writer: AsyncMutex::new(lw),
        },
        MemoryTransportHandle {
            local: b,
            remote: a,
            reader: AsyncMutex::new(rr),
            writer: AsyncMutex::new(rw),
        },
    )
}

/// A [`TransportDriver`] whose `connect` can be told to fail a fixed
/// number of times before succeeding, for exercising the Racing Engine.
/// `listen` is not supported.
pub struct MemoryTransportDriver {
    fail_first: usize,
    always_fail: bool,
    counter: AtomicUsize,
}

impl MemoryTransportDriver {
    pub fn always_fail() -> Self {
        MemoryTransportDriver {
            fail_first: 0,
            always_fail: true,
            counter: AtomicUsize::new(0),
        }
    }

    pub fn always_succeed() -> Self {
        MemoryTransportDriver {
            fail_first: 0,
            always_fail: false,
            counter: AtomicUsize::new(0),
        }
    }

    pub fn unreachable_then_reachable(fail_first: usize) -> Self {
        MemoryTransportDriver {
            fail_first,
            always_fail: false,
            counter: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TransportDriver for MemoryTransportDriver {
    async fn connect(
        &self,
        local: &Endpoint,
        remote: &Endpoint,
        _stack: ProtocolStack,
    ) -> Result<Box<dyn TransportHandle>> {
        let attempt = self.counter.fetch_add(1, Ordering::SeqCst);
        if self.always_fail || attempt < self.fail_first {
            return Err(Error::connection("unreachable"));
        }
        let (mine, _theirs) = memory_pair(local.clone(), remote.clone());
        Ok(Box::new(mine))
    }

    async fn listen(&self, _local: &Endpoint, _stack: ProtocolStack) -> Result<Box<dyn ListenHandle>> {
        Err(Error::not_supported("MemoryTransportDriver does not support listen"))
    }
}

/// A [`ListenHandle`] fed by a channel of already-paired handles.
pub struct MemoryListenHandle {
    local: Endpoint,
    incoming: AsyncMutex<mpsc::Receiver<Box<dyn TransportHandle>>>,
}

#[async_trait]
impl ListenHandle for MemoryListenHandle {
    async fn accept(&self) -> Result<Box<dyn TransportHandle>> {
        let mut rx = self.incoming.lock().await;
        rx.recv().await.ok_or_else(|| Error::connection("listener closed"))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn local_endpoint(&self) -> Endpoint {
        self.local.clone()
    }
}

fn endpoint_key(ep: &Endpoint) -> String {
    format!("{:?}:{:?}", ep.kind(), ep.port())
}

/// A [`TransportDriver`] that actually routes `connect` calls to a
/// matching `listen` bind, so it can back full Listener/Connection
/// integration tests without opening a real socket.
#[derive(Default)]
pub struct NetworkTransportDriver {
    binds: Mutex<HashMap<String, mpsc::Sender<Box<dyn TransportHandle>>>>,
}

#[async_trait]
impl TransportDriver for NetworkTransportDriver {
    async fn connect(
        &self,
        local: &Endpoint,
        remote: &Endpoint,
        _stack: ProtocolStack,
    ) -> Result<Box<dyn TransportHandle>> {
        let tx = {
            let binds = self.binds.lock().unwrap();
            binds
                .get(&endpoint_key(remote))
                .cloned()
                .ok_or_else(|| Error::connection("connection refused"))?
        };
        let (client, server) = memory_pair(local.clone(), remote.clone());
        tx.send(Box::new(server))
            .await
            .map_err(|_| Error::connection("listener closed"))?;
        Ok(Box::new(client))
    }

    async fn listen(&self, local: &Endpoint, _stack: ProtocolStack) -> Result<Box<dyn ListenHandle>> {
        let (tx, rx) = mpsc::channel(16);
        self.binds.lock().unwrap().insert(endpoint_key(local), tx);
        Ok(Box::new(MemoryListenHandle {
            local: local.clone(),
            incoming: AsyncMutex::new(rx),
        }))
    }
}
