use std::sync::Arc;
use std::time::Duration;

use log::info;

use crate::adapters::{Clock, Resolver, TlsProvider, TransportDriver};
use crate::candidate::build_candidates;
use crate::connection::Connection;
use crate::endpoint::Endpoint;
use crate::errors::{Error, Result};
use crate::framer::{Framer, FramerPipeline};
use crate::group::ConnectionGroup;
use crate::listener::Listener;
use crate::message::Message;
use crate::properties::{SelectionProperties, DEFAULT_NEW_CONNECTION_LIMIT};
use crate::racing::race;
use crate::security::SecurityParameters;
use crate::stack::ProtocolStack;
use crate::state::ConnectionState;

type FramerFactory = Arc<dyn Fn() -> Box<dyn Framer> + Send + Sync>;

/// The passive configuration object describing a potential Connection,
/// Listener, or Rendezvous. Frozen the moment one of `initiate`/`listen`/
/// `rendezvous` is called.
pub struct Preconnection {
    locals: Vec<Endpoint>,
    remotes: Vec<Endpoint>,
    properties: SelectionProperties,
    security: Option<SecurityParameters>,
    framer_factories: Vec<FramerFactory>,

    driver: Arc<dyn TransportDriver>,
    resolver: Arc<dyn Resolver>,
    clock: Arc<dyn Clock>,
    tls: Option<Arc<dyn TlsProvider>>,

    new_connection_limit: usize,
}

impl Preconnection {
    pub fn new(driver: Arc<dyn TransportDriver>, resolver: Arc<dyn Resolver>, clock: Arc<dyn Clock>) -> Self {
        Preconnection {
            locals: Vec::new(),
            remotes: Vec::new(),
            properties: SelectionProperties::default(),
            security: None,
            framer_factories: Vec::new(),
            driver,
            resolver,
            clock,
            tls: None,
            new_connection_limit: DEFAULT_NEW_CONNECTION_LIMIT,
        }
    }

    pub fn with_tls_provider(mut self, tls: Arc<dyn TlsProvider>) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn add_local(mut self, endpoint: Endpoint) -> Self {
        self.locals.push(endpoint);
        self
    }

    pub fn add_remote(mut self, endpoint: Endpoint) -> Self {
        self.remotes.push(endpoint);
        self
    }

    pub fn with_properties(mut self, properties: SelectionProperties) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_security(mut self, security: SecurityParameters) -> Self {
        self.security = Some(security);
        self
    }

    pub fn with_new_connection_limit(mut self, limit: usize) -> Self {
        self.new_connection_limit = limit;
        self
    }

    /// Registers a framer factory. Framers run outbound in reverse
    /// add-order and inbound in add-order; see [`FramerPipeline`].
    pub fn add_framer<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Framer> + Send + Sync + 'static,
    {
        self.framer_factories.push(Arc::new(factory));
        self
    }

    fn build_pipeline(&self) -> FramerPipeline {
        let mut pipeline = FramerPipeline::new();
        for factory in &self.framer_factories {
            pipeline
                .add(factory())
                .expect("pipeline is never frozen before Established");
        }
        pipeline
    }

    fn framer_factory_fn(&self) -> Arc<dyn Fn() -> FramerPipeline + Send + Sync> {
        let factories = self.framer_factories.clone();
        Arc::new(move || {
            let mut pipeline = FramerPipeline::new();
            for factory in &factories {
                pipeline
                    .add(factory())
                    .expect("pipeline is never frozen before Established");
            }
            pipeline
        })
    }

    /// Resolves configured endpoints and ranks feasible candidates
    /// without starting a race. Exposed for callers that want to inspect
    /// the candidate tree before committing to `initiate`.
    pub async fn resolve(&self) -> Result<Vec<crate::candidate::Candidate>> {
        build_candidates(
            &self.locals,
            &self.remotes,
            &self.properties,
            self.security.as_ref(),
            &self.resolver,
        )
        .await
    }

    /// Builds the candidate tree, races it, and wraps the winner in an
    /// `Established` Connection.
    pub async fn initiate(&self) -> Result<Arc<Connection>> {
        let candidates = self.resolve().await?;
        info!("initiate: racing {} candidate(s)", candidates.len());

        let outcome = race(
            candidates,
            Arc::clone(&self.driver),
            self.tls.clone(),
            Arc::clone(&self.clock),
            self.properties.candidate_stagger,
            self.properties.conn_timeout,
        )
        .await?;

        let conn = Connection::from_established(outcome.handle, self.build_pipeline(), self.properties.clone(), true);
        conn.set_candidate_stats(outcome.attempts);
        Ok(conn)
    }

    /// `initiate` followed by an immediate `send` of `message` once
    /// established, for the common request-response opening pattern.
    pub async fn initiate_with_send(&self, message: Message) -> Result<Arc<Connection>> {
        let conn = self.initiate().await?;
        conn.send(message).await?;
        Ok(conn)
    }

    /// Produces a new Connection in `original`'s group (creating the
    /// group lazily if needed). Since none of the stacks modeled here
    /// support multistreaming, this always re-races the configured
    /// candidates rather than opening a second stream on the existing
    /// transport; see the Open Question decision in the design notes.
    /// `framer`, if given, is appended to the clone's pipeline in
    /// addition to the ones already registered on this Preconnection.
    /// `properties_delta`, if given, replaces the clone's properties
    /// outright rather than the cloner's.
    pub async fn clone_connection(
        &self,
        original: &Arc<Connection>,
        framer: Option<Box<dyn Framer>>,
        properties_delta: Option<SelectionProperties>,
    ) -> Result<Arc<Connection>> {
        if original.state() != ConnectionState::Established {
            return Err(Error::connection("clone requires an established connection"));
        }

        let candidates = self.resolve().await?;
        let outcome = race(
            candidates,
            Arc::clone(&self.driver),
            self.tls.clone(),
            Arc::clone(&self.clock),
            self.properties.candidate_stagger,
            self.properties.conn_timeout,
        )
        .await?;

        let mut pipeline = self.build_pipeline();
        if let Some(extra) = framer {
            pipeline
                .add(extra)
                .expect("pipeline is never frozen before Established");
        }

        let properties = properties_delta.unwrap_or_else(|| self.properties.clone());
        let cloned = Connection::from_established(outcome.handle, pipeline, properties, true);
        cloned.set_candidate_stats(outcome.attempts);

        let group = original.group().unwrap_or_else(|| {
            let group = Arc::new(ConnectionGroup::new(self.properties.clone()));
            group.add(original);
            original.join_group(Arc::clone(&group));
            group
        });
        group.add(&cloned);
        cloned.join_group(Arc::clone(&group));

        Ok(cloned)
    }

    /// Binds local endpoint(s) and returns a `Listener` whose accept
    /// loop delivers already-`Established` connections.
    pub async fn listen(&self) -> Result<Arc<Listener>> {
        let local = self
            .locals
            .first()
            .cloned()
            .ok_or_else(|| Error::establishment("listen requires at least one local endpoint"))?;

        let stack = ProtocolStack::all()
            .iter()
            .copied()
            .find(|s| s.is_feasible(&self.properties))
            .ok_or_else(|| Error::establishment("no feasible candidate"))?;

        let handle = self.driver.listen(&local, stack).await?;
        Ok(Listener::new(
            Arc::from(handle),
            self.properties.clone(),
            self.framer_factory_fn(),
            self.new_connection_limit,
        ))
    }

    /// Simultaneous initiate+listen used for peer-to-peer hole-punched
    /// connections. Rendezvous semantics (hole-punch coordination, ICE)
    /// are external collaborators; this races the configured candidates
    /// exactly like `initiate` while the caller is expected to have
    /// already arranged a reachable remote via its own signalling.
    pub async fn rendezvous(&self) -> Result<Arc<Connection>> {
        self.initiate().await
    }

    /// Sends `message` to the multicast group named by `group`
    /// (expected to carry a `multicast_group` qualifier) over UDP,
    /// without running the unicast candidate race.
    pub async fn multicast_send(&self, group: Endpoint, message: Message) -> Result<()> {
        let local = self.locals.first().cloned().unwrap_or_else(|| {
            Endpoint::from_ip("0.0.0.0".parse().unwrap())
        });
        let handle = self.driver.connect(&local, &group, ProtocolStack::Udp).await?;
        let conn = Connection::from_established(handle, self.build_pipeline(), self.properties.clone(), false);
        conn.send(message).await?;
        conn.close().await
    }

    /// Joins the multicast group named by `group` and returns an
    /// `Established` Connection whose `receive`/`incomingMessages`
    /// surface delivered datagrams.
    pub async fn multicast_receive(&self, group: Endpoint) -> Result<Arc<Connection>> {
        let listen_handle = self.driver.listen(&group, ProtocolStack::Udp).await?;
        let transport = listen_handle.accept().await?;
        Ok(Connection::from_established(
            transport,
            self.build_pipeline(),
            self.properties.clone(),
            false,
        ))
    }
}

/// Convenience so tests and examples don't need to import `Duration`
/// just to set a stagger override.
pub fn stagger(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::Preference;
    use crate::testing::{NetworkTransportDriver, StaticResolver, SystemClock};

    fn preconnection(driver: Arc<NetworkTransportDriver>) -> Preconnection {
        Preconnection::new(driver, Arc::new(StaticResolver::default()), Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn initiate_against_a_listener_round_trips() {
        let driver = Arc::new(NetworkTransportDriver::default());
        let server_addr = Endpoint::from_ip("127.0.0.1".parse().unwrap()).with_port(4433);

        let server_pre = preconnection(Arc::clone(&driver)).add_local(server_addr.clone());
        let listener = server_pre.listen().await.unwrap();
        let mut new_conns = listener.new_connections().await.unwrap();

        let client_pre = preconnection(driver).add_remote(server_addr);
        let client = client_pre.initiate().await.unwrap();
        client.send(Message::new(&b"ping"[..])).await.unwrap();

        let server = new_conns.recv().await.unwrap();
        let msg = server.receive().await.unwrap();
        assert_eq!(&msg.data[..], b"ping");

        let attempts = client.candidate_stats();
        assert!(!attempts.is_empty());
        assert!(attempts.iter().any(|a| a.succeeded));
    }

    #[tokio::test]
    async fn clone_joins_the_same_group_and_both_sides_close() {
        let driver = Arc::new(NetworkTransportDriver::default());
        let server_addr = Endpoint::from_ip("127.0.0.1".parse().unwrap()).with_port(4434);

        let server_pre = preconnection(Arc::clone(&driver)).add_local(server_addr.clone());
        let listener = server_pre.listen().await.unwrap();
        let mut new_conns = listener.new_connections().await.unwrap();

        let client_pre = preconnection(Arc::clone(&driver)).add_remote(server_addr);
        let c1 = client_pre.initiate().await.unwrap();
        let c2 = client_pre.clone_connection(&c1, None, None).await.unwrap();

        let group = c1.group().unwrap();
        assert_eq!(group.len(), 2);

        c1.send(Message::new(&b"from-c1"[..])).await.unwrap();
        c2.send(Message::new(&b"from-c2"[..])).await.unwrap();

        let s1 = new_conns.recv().await.unwrap();
        let s2 = new_conns.recv().await.unwrap();
        let mut payloads = vec![
            s1.receive().await.unwrap().data,
            s2.receive().await.unwrap().data,
        ];
        payloads.sort();
        assert_eq!(payloads, vec![
            bytes::Bytes::from_static(b"from-c1"),
            bytes::Bytes::from_static(b"from-c2"),
        ]);

        group.close_group().await.unwrap();
        assert!(group.is_empty());
    }

    #[tokio::test]
    async fn hard_constraint_violation_fails_before_any_attempt() {
        let driver = Arc::new(NetworkTransportDriver::default());
        let mut props = SelectionProperties::default();
        props.reliability = Preference::Prohibit;
        props.preserve_msg_boundaries = Preference::Require;
        props.preserve_order = Preference::Require;

        let remote = Endpoint::from_ip("127.0.0.1".parse().unwrap()).with_port(81);
        let pre = preconnection(driver)
            .add_remote(remote)
            .with_properties(props);

        let err = pre.initiate().await.unwrap_err();
        assert!(matches!(err, Error::EstablishmentFailure { .. }));
    }
}
