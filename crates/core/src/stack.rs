use std::fmt;

use crate::properties::{Preference, SelectionProperties};

/// A concrete protocol composition a candidate can attempt. Ordered
/// roughly by handshake cost, cheapest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolStack {
    Udp,
    Tcp,
    UdpDtls,
    TcpTls,
    Quic,
}

impl fmt::Display for ProtocolStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProtocolStack::Udp => "UDP",
            ProtocolStack::Tcp => "TCP",
            ProtocolStack::UdpDtls => "UDP+DTLS",
            ProtocolStack::TcpTls => "TCP+TLS",
            ProtocolStack::Quic => "QUIC",
        };
        write!(f, "{s}")
    }
}

impl ProtocolStack {
    /// All stacks the core knows how to attempt, used as the
    /// enumeration universe in the Candidate Tree Builder.
    pub fn all() -> &'static [ProtocolStack] {
        &[
            ProtocolStack::Udp,
            ProtocolStack::Tcp,
            ProtocolStack::UdpDtls,
            ProtocolStack::TcpTls,
            ProtocolStack::Quic,
        ]
    }

    pub fn is_reliable(&self) -> bool {
        matches!(
            self,
            ProtocolStack::Tcp | ProtocolStack::TcpTls | ProtocolStack::Quic
        )
    }

    pub fn preserves_order(&self) -> bool {
        self.is_reliable()
    }

    pub fn preserves_msg_boundaries(&self) -> bool {
        matches!(
            self,
            ProtocolStack::Udp | ProtocolStack::UdpDtls | ProtocolStack::Quic
        )
    }

    pub fn has_congestion_control(&self) -> bool {
        self.is_reliable()
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, ProtocolStack::UdpDtls | ProtocolStack::TcpTls)
    }

    pub fn supports_zero_rtt(&self) -> bool {
        matches!(self, ProtocolStack::Quic)
    }

    /// Relative handshake cost; lower is cheaper. Used as a tie-break in
    /// ranking, after preference score and address-family order.
    pub fn handshake_cost(&self) -> u8 {
        match self {
            ProtocolStack::Udp => 0,
            ProtocolStack::Tcp => 1,
            ProtocolStack::Quic => 2,
            ProtocolStack::UdpDtls => 2,
            ProtocolStack::TcpTls => 3,
        }
    }

    /// True iff this stack satisfies every `require`/`prohibit` hard
    /// constraint named in `props`.
    pub fn is_feasible(&self, props: &SelectionProperties) -> bool {
        let checks: [(Preference, bool); 4] = [
            (props.reliability, self.is_reliable()),
            (props.preserve_msg_boundaries, self.preserves_msg_boundaries()),
            (props.preserve_order, self.preserves_order()),
            (props.congestion_control, self.has_congestion_control()),
        ];
        for (pref, provides) in checks {
            match pref {
                Preference::Require if !provides => return false,
                Preference::Prohibit if provides => return false,
                _ => {}
            }
        }
        if props.zero_rtt == Preference::Require && !self.supports_zero_rtt() {
            return false;
        }
        true
    }

    /// Preference-based score for ranking: +1 per satisfied `prefer`,
    /// -1 per satisfied `avoid`.
    pub fn preference_score(&self, props: &SelectionProperties) -> i32 {
        let mut score = 0;
        let checks: [(Preference, bool); 4] = [
            (props.reliability, self.is_reliable()),
            (props.preserve_msg_boundaries, self.preserves_msg_boundaries()),
            (props.preserve_order, self.preserves_order()),
            (props.congestion_control, self.has_congestion_control()),
        ];
        for (pref, provides) in checks {
            match pref {
                Preference::Prefer if provides => score += 1,
                Preference::Avoid if provides => score -= 1,
                _ => {}
            }
        }
        score
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcp_satisfies_reliable_require() {
        let mut props = SelectionProperties::default();
        props.reliability = Preference::Require;
        assert!(ProtocolStack::Tcp.is_feasible(&props));
        assert!(!ProtocolStack::Udp.is_feasible(&props));
    }

    #[test]
    fn reliability_prohibit_excludes_tcp_stacks() {
        let mut props = SelectionProperties::default();
        props.reliability = Preference::Prohibit;
        props.preserve_msg_boundaries = Preference::Require;
        let feasible: Vec<_> = ProtocolStack::all()
            .iter()
            .filter(|s| s.is_feasible(&props))
            .collect();
        assert!(!feasible.contains(&&ProtocolStack::Tcp));
        assert!(feasible.contains(&&ProtocolStack::Udp));
    }
}
