use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use log::{debug, warn};
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;

use crate::adapters::ListenHandle;
use crate::connection::Connection;
use crate::errors::Result;
use crate::events::ListenerEvent;
use crate::framer::FramerPipeline;
use crate::properties::SelectionProperties;

const EVENT_QUEUE_CAPACITY: usize = 64;

/// Live admission gate for not-yet-consumed accepted connections. The
/// limit is read on every `acquire`, so `Listener::set_new_connection_limit`
/// takes effect immediately instead of only at construction time.
struct AdmissionGate {
    limit: AtomicUsize,
    outstanding: AtomicUsize,
    notify: Notify,
}

impl AdmissionGate {
    fn new(limit: usize) -> Self {
        AdmissionGate {
            limit: AtomicUsize::new(limit),
            outstanding: AtomicUsize::new(0),
            notify: Notify::new(),
        }
    }

    fn set_limit(&self, limit: usize) {
        self.limit.store(limit, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Waits until accepting another connection would not exceed the
    /// live limit, then reserves a slot for it. A limit of zero pauses
    /// the accept loop entirely rather than busy-spinning.
    async fn acquire(&self) {
        loop {
            let notified = self.notify.notified();
            let limit = self.limit.load(Ordering::SeqCst);
            if limit > 0 && self.outstanding.load(Ordering::SeqCst) < limit {
                self.outstanding.fetch_add(1, Ordering::SeqCst);
                return;
            }
            notified.await;
        }
    }

    fn release(&self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

/// Stream of accepted connections. Each `recv` releases the admission
/// slot reserved when the connection was accepted, so raising or
/// lowering the live limit changes how far the accept loop can run
/// ahead of the consumer.
pub struct NewConnections {
    rx: mpsc::UnboundedReceiver<Arc<Connection>>,
    gate: Arc<AdmissionGate>,
}

impl NewConnections {
    pub async fn recv(&mut self) -> Option<Arc<Connection>> {
        let conn = self.rx.recv().await?;
        self.gate.release();
        Some(conn)
    }
}

/// Accept loop: binds the local endpoint via the `TransportDriver`, and
/// for each incoming transport wraps it into an already-`Established`
/// Connection with the Preconnection's framer stack and properties.
pub struct Listener {
    handle: Arc<dyn ListenHandle>,
    properties: SelectionProperties,
    framer_factory: Arc<dyn Fn() -> FramerPipeline + Send + Sync>,

    new_connections_tx: mpsc::UnboundedSender<Arc<Connection>>,
    new_connections_rx: AsyncMutex<Option<mpsc::UnboundedReceiver<Arc<Connection>>>>,
    events_tx: mpsc::Sender<ListenerEvent>,
    events_rx: AsyncMutex<Option<mpsc::Receiver<ListenerEvent>>>,

    admission: Arc<AdmissionGate>,
    accepted_count: Arc<AtomicUsize>,
    accept_task: StdMutex<Option<JoinHandle<()>>>,
}

impl Listener {
    pub fn new(
        handle: Arc<dyn ListenHandle>,
        properties: SelectionProperties,
        framer_factory: Arc<dyn Fn() -> FramerPipeline + Send + Sync>,
        new_connection_limit: usize,
    ) -> Arc<Listener> {
        let (new_connections_tx, new_connections_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

        let listener = Arc::new(Listener {
            handle: Arc::clone(&handle),
            properties: properties.clone(),
            framer_factory: Arc::clone(&framer_factory),
            new_connections_tx,
            new_connections_rx: AsyncMutex::new(Some(new_connections_rx)),
            events_tx,
            events_rx: AsyncMutex::new(Some(events_rx)),
            admission: Arc::new(AdmissionGate::new(new_connection_limit)),
            accepted_count: Arc::new(AtomicUsize::new(0)),
            accept_task: StdMutex::new(None),
        });

        let task = spawn_accept_loop(Arc::clone(&listener));
        *listener.accept_task.lock().unwrap() = Some(task);

        listener
    }

    pub fn properties(&self) -> &SelectionProperties {
        &self.properties
    }

    pub fn accepted_connection_count(&self) -> usize {
        self.accepted_count.load(Ordering::SeqCst)
    }

    /// Changes the live cap on not-yet-consumed accepted connections.
    /// Takes effect immediately: raising it wakes a paused accept loop,
    /// lowering it to zero pauses further accepts without dropping
    /// connections already in flight.
    pub fn set_new_connection_limit(&self, limit: usize) {
        self.admission.set_limit(limit);
    }

    /// Takes ownership of the stream of accepted connections. May only
    /// be called once.
    pub async fn new_connections(&self) -> Option<NewConnections> {
        let rx = self.new_connections_rx.lock().await.take()?;
        Some(NewConnections {
            rx,
            gate: Arc::clone(&self.admission),
        })
    }

    pub async fn events(&self) -> Option<mpsc::Receiver<ListenerEvent>> {
        self.events_rx.lock().await.take()
    }

    /// Idempotent: closes the listening socket and ends the
    /// `new_connections` stream. In-flight accepted connections continue
    /// normally.
    pub async fn stop(&self) -> Result<()> {
        if let Some(task) = self.accept_task.lock().unwrap().take() {
            task.abort();
        }
        self.handle.close().await?;
        let _ = self.events_tx.send(ListenerEvent::Stopped).await;
        Ok(())
    }
}

fn spawn_accept_loop(listener: Arc<Listener>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            listener.admission.acquire().await;

            match listener.handle.accept().await {
                Ok(transport) => {
                    debug!("listener: accepted a connection");
                    let pipeline = (listener.framer_factory)();
                    let conn = Connection::from_established(
                        transport,
                        pipeline,
                        listener.properties.clone(),
                        false,
                    );
                    listener.accepted_count.fetch_add(1, Ordering::SeqCst);
                    if listener.new_connections_tx.send(conn).is_err() {
                        listener.admission.release();
                        break;
                    }
                    let _ = listener
                        .events_tx
                        .send(ListenerEvent::ConnectionReceived)
                        .await;
                }
                Err(e) => {
                    listener.admission.release();
                    warn!("listener: accept failed: {e}");
                    let _ = listener
                        .events_tx
                        .send(ListenerEvent::EstablishmentError(e))
                        .await;
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::adapters::TransportDriver;
    use crate::endpoint::Endpoint;
    use crate::message::Message;
    use crate::properties::DEFAULT_NEW_CONNECTION_LIMIT;
    use crate::stack::ProtocolStack;
    use crate::testing::NetworkTransportDriver;

    #[tokio::test]
    async fn accept_loop_delivers_established_connections() {
        let driver = Arc::new(NetworkTransportDriver::default());
        let local = Endpoint::from_ip("127.0.0.1".parse().unwrap()).with_port(9000);

        let listen_handle = driver.listen(&local, ProtocolStack::Tcp).await.unwrap();
        let listener = Listener::new(
            Arc::from(listen_handle),
            SelectionProperties::default(),
            Arc::new(FramerPipeline::new),
            DEFAULT_NEW_CONNECTION_LIMIT,
        );
        let mut new_conns = listener.new_connections().await.unwrap();

        let driver: Arc<dyn TransportDriver> = driver;
        let client_handle = driver.connect(&local, &local, ProtocolStack::Tcp).await.unwrap();
        let client = Connection::from_established(
            client_handle,
            FramerPipeline::new(),
            SelectionProperties::default(),
            true,
        );
        client.send(Message::new(&b"hello"[..])).await.unwrap();

        let server = new_conns.recv().await.unwrap();
        let msg = server.receive().await.unwrap();
        assert_eq!(&msg.data[..], b"hello");
        assert_eq!(listener.accepted_connection_count(), 1);
    }

    #[tokio::test]
    async fn set_new_connection_limit_changes_the_live_admission_cap() {
        let driver = Arc::new(NetworkTransportDriver::default());
        let local = Endpoint::from_ip("127.0.0.1".parse().unwrap()).with_port(9001);

        let listen_handle = driver.listen(&local, ProtocolStack::Tcp).await.unwrap();
        let listener = Listener::new(
            Arc::from(listen_handle),
            SelectionProperties::default(),
            Arc::new(FramerPipeline::new),
            0,
        );
        let mut new_conns = listener.new_connections().await.unwrap();

        let driver: Arc<dyn TransportDriver> = driver;
        let _client_handle = driver.connect(&local, &local, ProtocolStack::Tcp).await.unwrap();

        let paused = tokio::time::timeout(Duration::from_millis(100), new_conns.recv()).await;
        assert!(paused.is_err(), "accept loop must stay paused while the live limit is zero");

        listener.set_new_connection_limit(1);
        let accepted = tokio::time::timeout(Duration::from_millis(200), new_conns.recv())
            .await
            .expect("raising the live limit should resume accepting")
            .expect("a connection should be delivered");
        assert_eq!(listener.accepted_connection_count(), 1);
        drop(accepted);
    }
}
