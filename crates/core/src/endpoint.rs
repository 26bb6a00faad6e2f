use std::net::IpAddr;

/// Identifies the addressing scheme of an [`Endpoint`]. Exactly one kind
/// per endpoint; an endpoint with two equivalent addresses is modeled as
/// two endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointKind {
    Host(String),
    Ip(IpAddr),
    BlePeripheral(String),
    BleService(String),
}

/// A value-type describing a potential local or remote communication
/// peer. Endpoints are immutable and cheap to clone; ownership is by copy
/// at every call site, matching the source's "endpoints are values" rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    kind: EndpointKind,
    port: Option<u16>,
    service: Option<String>,
    interface: Option<String>,
    hop_limit: Option<u8>,
    multicast_group: Option<IpAddr>,
    protocol_hint: Option<String>,
}

impl Endpoint {
    pub fn from_host(name: impl Into<String>) -> Self {
        Endpoint::new(EndpointKind::Host(name.into()))
    }

    pub fn from_ip(addr: IpAddr) -> Self {
        Endpoint::new(EndpointKind::Ip(addr))
    }

    fn new(kind: EndpointKind) -> Self {
        Endpoint {
            kind,
            port: None,
            service: None,
            interface: None,
            hop_limit: None,
            multicast_group: None,
            protocol_hint: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn with_hop_limit(mut self, hop_limit: u8) -> Self {
        self.hop_limit = Some(hop_limit);
        self
    }

    pub fn with_multicast_group(mut self, group: IpAddr) -> Self {
        self.multicast_group = Some(group);
        self
    }

    pub fn with_protocol_hint(mut self, hint: impl Into<String>) -> Self {
        self.protocol_hint = Some(hint.into());
        self
    }

    pub fn kind(&self) -> &EndpointKind {
        &self.kind
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }

    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    pub fn hop_limit(&self) -> Option<u8> {
        self.hop_limit
    }

    pub fn protocol_hint(&self) -> Option<&str> {
        self.protocol_hint.as_deref()
    }

    /// True when this endpoint already names a concrete address and needs
    /// no resolution step.
    pub fn is_resolved(&self) -> bool {
        matches!(self.kind, EndpointKind::Ip(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_endpoint_requires_resolution() {
        let ep = Endpoint::from_host("example.com").with_port(443);
        assert!(!ep.is_resolved());
        assert_eq!(ep.port(), Some(443));
    }

    #[test]
    fn ip_endpoint_is_already_resolved() {
        let ep = Endpoint::from_ip("127.0.0.1".parse().unwrap());
        assert!(ep.is_resolved());
    }
}
