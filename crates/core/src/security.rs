use std::fmt;
use std::sync::Arc;

/// A peer certificate as surfaced by the `TlsProvider` adapter, opaque to
/// the core beyond its DER encoding.
#[derive(Clone)]
pub struct Certificate(pub Arc<Vec<u8>>);

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Certificate({} bytes)", self.0.len())
    }
}

/// Callback invoked when a candidate's TLS handshake completes with an
/// untrusted peer. Returning `false` fails the candidate.
pub type TrustVerificationFn = Arc<dyn Fn(&Certificate) -> bool + Send + Sync>;

/// Callback invoked to select a client identity in response to a server's
/// certificate request.
pub type IdentityChallengeFn = Arc<dyn Fn() -> Option<Certificate> + Send + Sync>;

/// Security configuration owned by the Preconnection and moved into the
/// Connection on establishment. The core never inspects key material; it
/// only orchestrates when the handshake runs and consults the trust
/// callback.
#[derive(Clone)]
pub struct SecurityParameters {
    pub allowed_protocols: Vec<String>,
    pub client_certificate: Option<Certificate>,
    pub server_certificate: Option<Certificate>,
    pub pinned_certificates: Vec<Certificate>,
    pub alpn: Vec<String>,
    pub psk_identity: Option<Vec<u8>>,
    pub psk_key: Option<Arc<Vec<u8>>>,
    pub trust_verification: Option<TrustVerificationFn>,
    pub identity_challenge: Option<IdentityChallengeFn>,
}

impl fmt::Debug for SecurityParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityParameters")
            .field("allowed_protocols", &self.allowed_protocols)
            .field("alpn", &self.alpn)
            .field("has_client_certificate", &self.client_certificate.is_some())
            .field("has_server_certificate", &self.server_certificate.is_some())
            .field("pinned_certificates", &self.pinned_certificates.len())
            .field("has_psk", &self.psk_key.is_some())
            .finish()
    }
}

impl Default for SecurityParameters {
    fn default() -> Self {
        SecurityParameters {
            allowed_protocols: Vec::new(),
            client_certificate: None,
            server_certificate: None,
            pinned_certificates: Vec::new(),
            alpn: Vec::new(),
            psk_identity: None,
            psk_key: None,
            trust_verification: None,
            identity_challenge: None,
        }
    }
}

impl SecurityParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_unsecured(&self) -> bool {
        self.client_certificate.is_none()
            && self.server_certificate.is_none()
            && self.psk_key.is_none()
    }

    /// Runs the trust callback, defaulting to "trusted" when none is
    /// registered (matches a stack that performed its own verification).
    pub fn verify_trust(&self, cert: &Certificate) -> bool {
        match &self.trust_verification {
            Some(f) => f(cert),
            None => true,
        }
    }
}
