use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use log::{debug, warn};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::endpoint::Endpoint;
use crate::errors::{Error, Result};
use crate::events::Event;
use crate::framer::FramerPipeline;
use crate::message::{Message, MessageContext};
use crate::properties::SelectionProperties;
use crate::state::ConnectionState;
use crate::stats::{CandidateStats, ConnectionStats};

const SEND_QUEUE_CAPACITY: usize = 64;
const RECEIVE_QUEUE_CAPACITY: usize = 64;
const EVENT_QUEUE_CAPACITY: usize = 256;
const READ_BUFFER_SIZE: usize = 64 * 1024;

enum SendCommand {
    Send(Message, Instant),
    CloseWrite,
}

/// A single, actor-isolated connection: one consumer loop accepts
/// operations, one producer loop drives transport writes, one reader
/// loop pumps the inbound framer pipeline. All three communicate only
/// through bounded queues, so the Connection's exported surface never
/// needs an internal lock held across an await point.
pub struct Connection {
    id: Uuid,
    state: Arc<StdMutex<ConnectionState>>,
    local_endpoint: Endpoint,
    remote_endpoint: Endpoint,
    properties: SelectionProperties,
    group: StdMutex<Option<Arc<crate::group::ConnectionGroup>>>,

    send_tx: mpsc::Sender<SendCommand>,
    receive_rx: AsyncMutex<mpsc::Receiver<Message>>,
    events_rx: AsyncMutex<Option<mpsc::Receiver<Event>>>,
    events_tx: mpsc::Sender<Event>,

    stats: Arc<StdMutex<ConnectionStats>>,
    candidate_stats: StdMutex<Vec<CandidateStats>>,
    buffered_amount: Arc<AtomicUsize>,
    buffered_amount_low_threshold: Arc<AtomicUsize>,
    on_buffered_amount_low: Arc<StdMutex<Option<Box<dyn Fn() + Send + Sync>>>>,

    transport: Arc<dyn crate::adapters::TransportHandle>,
    writer_task: AsyncMutex<Option<JoinHandle<()>>>,
    reader_task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("local_endpoint", &self.local_endpoint)
            .field("remote_endpoint", &self.remote_endpoint)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Wraps an already-established transport handle (the winner of a
    /// race, or a freshly accepted connection) with a framer pipeline
    /// and starts its reader/writer loops. The connection is
    /// constructed directly into `Established` state.
    pub fn from_established(
        transport: Box<dyn crate::adapters::TransportHandle>,
        mut pipeline: FramerPipeline,
        properties: SelectionProperties,
        ready_event: bool,
    ) -> Arc<Connection> {
        let transport: Arc<dyn crate::adapters::TransportHandle> = Arc::from(transport);
        let local_endpoint = transport.local_endpoint();
        let remote_endpoint = transport.remote_endpoint();

        pipeline.freeze();
        pipeline.notify_open();
        let pipeline = Arc::new(StdMutex::new(pipeline));

        let (send_tx, send_rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        let (receive_tx, receive_rx) = mpsc::channel(RECEIVE_QUEUE_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

        let state = Arc::new(StdMutex::new(ConnectionState::Established));
        let stats = Arc::new(StdMutex::new(ConnectionStats::new()));
        let buffered_amount = Arc::new(AtomicUsize::new(0));
        let buffered_amount_low_threshold = Arc::new(AtomicUsize::new(0));
        let on_buffered_amount_low = Arc::new(StdMutex::new(None));

        let writer_task = spawn_writer(
            Arc::clone(&transport),
            Arc::clone(&pipeline),
            send_rx,
            events_tx.clone(),
            Arc::clone(&stats),
            Arc::clone(&state),
            Arc::clone(&buffered_amount),
            Arc::clone(&buffered_amount_low_threshold),
            Arc::clone(&on_buffered_amount_low),
        );
        let reader_task = spawn_reader(
            Arc::clone(&transport),
            Arc::clone(&pipeline),
            receive_tx,
            events_tx.clone(),
            Arc::clone(&stats),
            Arc::clone(&state),
        );

        let conn = Connection {
            id: Uuid::new_v4(),
            state,
            local_endpoint,
            remote_endpoint,
            properties,
            group: StdMutex::new(None),
            send_tx,
            receive_rx: AsyncMutex::new(receive_rx),
            events_rx: AsyncMutex::new(Some(events_rx)),
            events_tx: events_tx.clone(),
            stats,
            candidate_stats: StdMutex::new(Vec::new()),
            buffered_amount,
            buffered_amount_low_threshold,
            on_buffered_amount_low,
            transport,
            writer_task: AsyncMutex::new(Some(writer_task)),
            reader_task: AsyncMutex::new(Some(reader_task)),
        };

        if ready_event {
            let _ = events_tx.try_send(Event::Ready);
        }

        Arc::new(conn)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    pub fn properties(&self) -> &SelectionProperties {
        &self.properties
    }

    pub fn local_endpoint(&self) -> &Endpoint {
        &self.local_endpoint
    }

    pub fn remote_endpoint(&self) -> &Endpoint {
        &self.remote_endpoint
    }

    pub fn stats(&self) -> ConnectionStats {
        let mut snapshot = self.stats.lock().unwrap().clone();
        snapshot.buffered_amount = self.buffered_amount();
        snapshot
    }

    /// Per-candidate outcomes from the race that established this
    /// connection; empty for connections produced by a Listener's accept
    /// loop, which never races.
    pub fn candidate_stats(&self) -> Vec<CandidateStats> {
        self.candidate_stats.lock().unwrap().clone()
    }

    pub(crate) fn set_candidate_stats(&self, stats: Vec<CandidateStats>) {
        *self.candidate_stats.lock().unwrap() = stats;
    }

    pub fn buffered_amount(&self) -> usize {
        self.buffered_amount.load(Ordering::SeqCst)
    }

    pub fn set_buffered_amount_low_threshold(&self, threshold: usize) {
        self.buffered_amount_low_threshold
            .store(threshold, Ordering::SeqCst);
    }

    pub fn on_buffered_amount_low<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_buffered_amount_low.lock().unwrap() = Some(Box::new(callback));
    }

    pub(crate) fn join_group(&self, group: Arc<crate::group::ConnectionGroup>) {
        *self.group.lock().unwrap() = Some(group);
    }

    pub fn group(&self) -> Option<Arc<crate::group::ConnectionGroup>> {
        self.group.lock().unwrap().clone()
    }

    /// Enqueues `message` on the send queue. Valid only in `Established`.
    /// Suspends the caller when the writer's queue is full; the
    /// suspension is cancellation-safe (dropping the future before it
    /// resolves leaves no trace in the queue).
    pub async fn send(&self, message: Message) -> Result<()> {
        if self.state() != ConnectionState::Established {
            return Err(Error::ConnectionClosed);
        }
        let size = message.data.len();
        self.buffered_amount.fetch_add(size, Ordering::SeqCst);
        let enqueued_at = Instant::now();
        self.send_tx
            .send(SendCommand::Send(message, enqueued_at))
            .await
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Returns the next complete message from the inbound queue, or an
    /// error once the connection has left `Established`.
    pub async fn receive(&self) -> Result<Message> {
        let mut rx = self.receive_rx.lock().await;
        rx.recv().await.ok_or(Error::ConnectionClosed)
    }

    /// Drains every message currently buffered on the inbound queue
    /// without blocking further once it is empty. Used by callers that
    /// want a restartable producer rather than one-at-a-time `receive`.
    pub async fn try_receive_all(&self) -> Vec<Message> {
        let mut rx = self.receive_rx.lock().await;
        let mut out = Vec::new();
        while let Ok(m) = rx.try_recv() {
            out.push(m);
        }
        out
    }

    /// Takes ownership of this connection's event stream. May only be
    /// called once; subsequent calls return `None`.
    pub async fn events(&self) -> Option<mpsc::Receiver<Event>> {
        self.events_rx.lock().await.take()
    }

    /// Established -> Closing -> Closed. Drains the outbound queue,
    /// signals the transport to close its write side, then waits for
    /// the peer's end-of-stream (observed as the reader task exiting).
    /// Idempotent.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            match *state {
                ConnectionState::Closed => return Ok(()),
                ConnectionState::Closing => {}
                _ => *state = ConnectionState::Closing,
            }
        }

        let _ = self.send_tx.send(SendCommand::CloseWrite).await;

        if let Some(writer) = self.writer_task.lock().await.take() {
            let _ = writer.await;
        }

        let reader_done = {
            let mut guard = self.reader_task.lock().await;
            guard.take()
        };
        if let Some(reader) = reader_done {
            let _ = tokio::time::timeout(std::time::Duration::from_secs(5), reader).await;
        }

        let already_closed = {
            let mut state = self.state.lock().unwrap();
            let was_closed = *state == ConnectionState::Closed;
            *state = ConnectionState::Closed;
            was_closed
        };
        if !already_closed {
            let _ = self.events_tx.send(Event::Closed).await;
        }
        Ok(())
    }

    /// Forces immediate `Closed`, discarding queued sends. Idempotent.
    pub async fn abort(&self) -> Result<()> {
        let already_closed = {
            let mut state = self.state.lock().unwrap();
            let was_closed = *state == ConnectionState::Closed;
            *state = ConnectionState::Closed;
            was_closed
        };

        self.transport.abort().await;

        if let Some(writer) = self.writer_task.lock().await.take() {
            writer.abort();
        }
        if let Some(reader) = self.reader_task.lock().await.take() {
            reader.abort();
        }

        if !already_closed {
            let _ = self
                .events_tx
                .send(Event::ConnectionError(Error::connection("aborted")))
                .await;
        }
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_writer(
    transport: Arc<dyn crate::adapters::TransportHandle>,
    pipeline: Arc<StdMutex<FramerPipeline>>,
    mut send_rx: mpsc::Receiver<SendCommand>,
    events_tx: mpsc::Sender<Event>,
    stats: Arc<StdMutex<ConnectionStats>>,
    state: Arc<StdMutex<ConnectionState>>,
    buffered_amount: Arc<AtomicUsize>,
    buffered_amount_low_threshold: Arc<AtomicUsize>,
    on_buffered_amount_low: Arc<StdMutex<Option<Box<dyn Fn() + Send + Sync>>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(cmd) = send_rx.recv().await {
            match cmd {
                SendCommand::CloseWrite => {
                    let _ = transport.close().await;
                    break;
                }
                SendCommand::Send(message, enqueued_at) => {
                    let size = message.data.len();
                    if message.is_expired(enqueued_at) {
                        buffered_amount.fetch_sub(size, Ordering::SeqCst);
                        let _ = events_tx.send(Event::Expired(message.context.clone())).await;
                        continue;
                    }

                    let encoded = {
                        let mut p = pipeline.lock().unwrap();
                        p.encode_outbound(&message)
                    };

                    let outcome = match encoded {
                        Err(e) => Err(e),
                        Ok(chunks) => write_all_chunks(&transport, &chunks).await,
                    };

                    buffered_amount.fetch_sub(size, Ordering::SeqCst);
                    maybe_notify_buffered_low(
                        &buffered_amount,
                        &buffered_amount_low_threshold,
                        &on_buffered_amount_low,
                    );

                    match outcome {
                        Ok(()) => {
                            stats.lock().unwrap().record_sent(size);
                            let _ = events_tx.send(Event::Sent(message.context.clone())).await;
                            if message.context.final_ {
                                debug!("writer: final message sent, closing write side");
                                let _ = transport.close().await;
                                break;
                            }
                        }
                        Err(e) if e.is_fatal_to_connection() => {
                            *state.lock().unwrap() = ConnectionState::Closed;
                            let _ = events_tx.send(Event::ConnectionError(e)).await;
                            break;
                        }
                        Err(e) => {
                            warn!("writer: send failed: {e}");
                            stats.lock().unwrap().send_errors += 1;
                            let _ = events_tx.send(Event::SendError(message.context.clone(), e)).await;
                        }
                    }
                }
            }
        }
    })
}

async fn write_all_chunks(
    transport: &Arc<dyn crate::adapters::TransportHandle>,
    chunks: &[bytes::Bytes],
) -> Result<()> {
    for chunk in chunks {
        let mut offset = 0;
        while offset < chunk.len() {
            let n = transport.write(&chunk[offset..]).await?;
            if n == 0 {
                return Err(Error::send("transport accepted zero bytes"));
            }
            offset += n;
        }
    }
    Ok(())
}

fn maybe_notify_buffered_low(
    buffered_amount: &AtomicUsize,
    threshold: &AtomicUsize,
    callback: &StdMutex<Option<Box<dyn Fn() + Send + Sync>>>,
) {
    let threshold = threshold.load(Ordering::SeqCst);
    if buffered_amount.load(Ordering::SeqCst) > threshold {
        return;
    }
    if let Some(cb) = callback.lock().unwrap().as_ref() {
        cb();
    }
}

fn spawn_reader(
    transport: Arc<dyn crate::adapters::TransportHandle>,
    pipeline: Arc<StdMutex<FramerPipeline>>,
    receive_tx: mpsc::Sender<Message>,
    events_tx: mpsc::Sender<Event>,
    stats: Arc<StdMutex<ConnectionStats>>,
    state: Arc<StdMutex<ConnectionState>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            if *state.lock().unwrap() == ConnectionState::Closed {
                break;
            }
            match transport.read(&mut buf).await {
                Ok(0) => {
                    debug!("reader: end of stream");
                    break;
                }
                Ok(n) => {
                    let decoded = {
                        let mut p = pipeline.lock().unwrap();
                        p.decode_inbound(&buf[..n])
                    };
                    match decoded {
                        Ok(messages) => {
                            for m in messages {
                                stats.lock().unwrap().record_received(m.data.len());
                                let is_final = m.context.final_;
                                let _ = events_tx.send(Event::Received(m.clone())).await;
                                if receive_tx.send(m).await.is_err() {
                                    return;
                                }
                                if is_final {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            warn!("reader: framing error: {e}");
                            stats.lock().unwrap().receive_errors += 1;
                            let _ = events_tx.send(Event::ReceiveError(e)).await;
                        }
                    }
                }
                Err(e) => {
                    if e.is_fatal_to_connection() {
                        *state.lock().unwrap() = ConnectionState::Closed;
                        let _ = events_tx.send(Event::ConnectionError(e)).await;
                    } else {
                        stats.lock().unwrap().receive_errors += 1;
                        let _ = events_tx.send(Event::ReceiveError(e)).await;
                    }
                    break;
                }
            }
        }
        let mut pipeline = pipeline.lock().unwrap();
        pipeline.notify_close();
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framer::Framer;
    use crate::testing::memory_pair;

    fn noop_properties() -> SelectionProperties {
        SelectionProperties::default()
    }

    /// Fails every inbound parse with a non-fatal error, to drive the
    /// reader loop's `Event::ReceiveError` path without tearing down the
    /// connection.
    struct AlwaysFailsToParse;
    impl Framer for AlwaysFailsToParse {
        fn frame_outbound(&mut self, message: &Message) -> Result<Vec<bytes::Bytes>> {
            Ok(vec![message.data.clone()])
        }
        fn parse_inbound(&mut self, _bytes: &[u8]) -> Result<Vec<Message>> {
            Err(Error::receive("malformed frame"))
        }
    }

    /// Fails every outbound encode with a connection-fatal error, to
    /// drive the writer loop's `Event::ConnectionError` path.
    struct AlwaysFailsFatally;
    impl Framer for AlwaysFailsFatally {
        fn frame_outbound(&mut self, _message: &Message) -> Result<Vec<bytes::Bytes>> {
            Err(Error::connection("wire corrupted"))
        }
        fn parse_inbound(&mut self, bytes: &[u8]) -> Result<Vec<Message>> {
            Ok(vec![Message::new(bytes.to_vec())])
        }
    }

    #[tokio::test]
    async fn send_then_receive_round_trips_bytes() {
        let local = Endpoint::from_ip("127.0.0.1".parse().unwrap());
        let remote = Endpoint::from_ip("127.0.0.1".parse().unwrap()).with_port(9);
        let (client_handle, server_handle) = memory_pair(local, remote);

        let client = Connection::from_established(
            Box::new(client_handle),
            FramerPipeline::new(),
            noop_properties(),
            true,
        );
        let server = Connection::from_established(
            Box::new(server_handle),
            FramerPipeline::new(),
            noop_properties(),
            false,
        );

        client.send(Message::new(&b"ping"[..])).await.unwrap();
        let received = server.receive().await.unwrap();
        assert_eq!(&received.data[..], b"ping");

        let (client_result, server_result) = tokio::join!(client.close(), server.close());
        client_result.unwrap();
        server_result.unwrap();
        assert_eq!(client.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn abort_is_idempotent_and_sets_closed() {
        let local = Endpoint::from_ip("127.0.0.1".parse().unwrap());
        let remote = Endpoint::from_ip("127.0.0.1".parse().unwrap()).with_port(9);
        let (client_handle, _server_handle) = memory_pair(local, remote);
        let client = Connection::from_established(
            Box::new(client_handle),
            FramerPipeline::new(),
            noop_properties(),
            true,
        );

        client.abort().await.unwrap();
        client.abort().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn send_after_close_is_rejected() {
        let local = Endpoint::from_ip("127.0.0.1".parse().unwrap());
        let remote = Endpoint::from_ip("127.0.0.1".parse().unwrap()).with_port(9);
        let (client_handle, _server_handle) = memory_pair(local, remote);
        let client = Connection::from_established(
            Box::new(client_handle),
            FramerPipeline::new(),
            noop_properties(),
            true,
        );
        client.close().await.unwrap();
        let err = client.send(Message::new(&b"late"[..])).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn receive_errors_are_counted_in_stats() {
        let local = Endpoint::from_ip("127.0.0.1".parse().unwrap());
        let remote = Endpoint::from_ip("127.0.0.1".parse().unwrap()).with_port(9);
        let (client_handle, server_handle) = memory_pair(local, remote);

        let mut pipeline = FramerPipeline::new();
        pipeline.add(Box::new(AlwaysFailsToParse)).unwrap();
        let client = Connection::from_established(Box::new(client_handle), pipeline, noop_properties(), true);
        let server = Connection::from_established(
            Box::new(server_handle),
            FramerPipeline::new(),
            noop_properties(),
            false,
        );

        let mut events = client.events().await.unwrap();
        server.send(Message::new(&b"ping"[..])).await.unwrap();

        assert!(matches!(events.recv().await.unwrap(), Event::Ready));
        assert!(matches!(events.recv().await.unwrap(), Event::ReceiveError(_)));
        assert_eq!(client.stats().receive_errors, 1);
    }

    #[tokio::test]
    async fn close_after_concurrent_fatal_error_does_not_double_emit_terminal_event() {
        let local = Endpoint::from_ip("127.0.0.1".parse().unwrap());
        let remote = Endpoint::from_ip("127.0.0.1".parse().unwrap()).with_port(9);
        let (client_handle, server_handle) = memory_pair(local, remote);
        drop(server_handle);

        let mut pipeline = FramerPipeline::new();
        pipeline.add(Box::new(AlwaysFailsFatally)).unwrap();
        let client = Connection::from_established(Box::new(client_handle), pipeline, noop_properties(), true);

        let mut events = client.events().await.unwrap();
        assert!(matches!(events.recv().await.unwrap(), Event::Ready));

        // Enqueues ahead of the CloseWrite command `close()` will send, so
        // the writer hits the fatal framer error (and sets Closed itself)
        // before close()'s own join-then-transition completes.
        client.send(Message::new(&b"x"[..])).await.unwrap();
        client.close().await.unwrap();

        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(matches!(events.recv().await.unwrap(), Event::ConnectionError(_)));

        let second = tokio::time::timeout(std::time::Duration::from_millis(200), events.recv()).await;
        assert!(
            second.is_err(),
            "close() must not emit a second terminal event once the writer already closed the connection"
        );
    }
}
