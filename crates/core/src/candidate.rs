use std::cmp::Ordering;
use std::sync::Arc;

use log::debug;

use crate::adapters::Resolver;
use crate::endpoint::Endpoint;
use crate::errors::{Error, Result};
use crate::properties::SelectionProperties;
use crate::security::SecurityParameters;
use crate::stack::ProtocolStack;

/// A concrete `(local, remote, stack, security)` quadruple attempted
/// during establishment. Candidates form an ordered list within a race;
/// lower `rank` attempts first.
#[derive(Clone)]
#[derive(Debug)]
pub struct Candidate {
    pub local: Endpoint,
    pub remote: Endpoint,
    pub stack: ProtocolStack,
    pub security: Option<SecurityParameters>,
    pub priority: i32,
    rank: usize,
}

impl Candidate {
    pub fn description(&self) -> String {
        format!(
            "{} -> {} via {}",
            describe_endpoint(&self.local),
            describe_endpoint(&self.remote),
            self.stack
        )
    }

    pub fn rank(&self) -> usize {
        self.rank
    }
}

fn describe_endpoint(ep: &Endpoint) -> String {
    use crate::endpoint::EndpointKind::*;
    match ep.kind() {
        Host(name) => name.clone(),
        Ip(addr) => addr.to_string(),
        BlePeripheral(id) => format!("ble-peripheral:{id}"),
        BleService(id) => format!("ble-service:{id}"),
    }
}

/// Resolves endpoints, enumerates feasible protocol stacks, takes the
/// cross product, ranks the result and returns the ordered candidate
/// list the Racing Engine should attempt in order.
///
/// `locals` may be empty (ephemeral local endpoint, client-initiate) and
/// `remotes` may be empty (listen). Exactly one of the two being empty is
/// the caller's responsibility to enforce; this function treats an empty
/// side as a single "unspecified" placeholder endpoint.
pub async fn build_candidates(
    locals: &[Endpoint],
    remotes: &[Endpoint],
    props: &SelectionProperties,
    security: Option<&SecurityParameters>,
    resolver: &Arc<dyn Resolver>,
) -> Result<Vec<Candidate>> {
    let resolved_locals = resolve_all(locals, resolver).await?;
    let resolved_remotes = resolve_all(remotes, resolver).await?;

    let feasible_stacks: Vec<ProtocolStack> = ProtocolStack::all()
        .iter()
        .copied()
        .filter(|s| s.is_feasible(props))
        .collect();

    if feasible_stacks.is_empty() {
        return Err(Error::establishment("no feasible candidate"));
    }

    let mut candidates = Vec::new();
    for remote in &resolved_remotes {
        for local in &resolved_locals {
            for stack in &feasible_stacks {
                if stack.is_secure() && security.map(|s| s.is_unsecured()).unwrap_or(true) {
                    // A secure stack with no security parameters configured
                    // cannot be attempted; skip rather than fail the race.
                    continue;
                }
                let score = stack.preference_score(props);
                candidates.push(Candidate {
                    local: local.clone(),
                    remote: remote.clone(),
                    stack: *stack,
                    security: security.cloned(),
                    priority: score,
                    rank: 0,
                });
            }
        }
    }

    if candidates.is_empty() {
        return Err(Error::establishment("no feasible candidate"));
    }

    rank_candidates(&mut candidates, &resolved_remotes);

    for (i, c) in candidates.iter().enumerate() {
        debug!("candidate[{}] = {} (priority {})", i, c.description(), c.priority);
    }

    Ok(candidates)
}

/// Sorts by score desc, tie-break by remote address-family interleave
/// (the order the remotes were supplied in, since `resolve_all` already
/// interleaves IPv6/IPv4 per Happy Eyeballs v2), then by stack handshake
/// cost, then assigns the final sequential `rank`.
fn rank_candidates(candidates: &mut [Candidate], remote_order: &[Endpoint]) {
    let remote_index = |ep: &Endpoint| remote_order.iter().position(|r| r == ep).unwrap_or(usize::MAX);

    candidates.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| remote_index(&a.remote).cmp(&remote_index(&b.remote)))
            .then_with(|| a.stack.handshake_cost().cmp(&b.stack.handshake_cost()))
    });

    for (i, c) in candidates.iter_mut().enumerate() {
        c.rank = i;
    }
}

async fn resolve_all(endpoints: &[Endpoint], resolver: &Arc<dyn Resolver>) -> Result<Vec<Endpoint>> {
    if endpoints.is_empty() {
        return Ok(vec![unspecified_endpoint()]);
    }

    let mut out = Vec::new();
    for ep in endpoints {
        if ep.is_resolved() {
            out.push(ep.clone());
            continue;
        }
        match ep.kind() {
            crate::endpoint::EndpointKind::Host(name) => {
                let ips = resolver.resolve_host(name).await?;
                for ip in ips {
                    let mut resolved = Endpoint::from_ip(ip);
                    if let Some(port) = ep.port() {
                        resolved = resolved.with_port(port);
                    }
                    out.push(resolved);
                }
            }
            _ => out.push(ep.clone()),
        }
    }
    if out.is_empty() {
        return Err(Error::establishment("resolver returned no addresses"));
    }
    Ok(out)
}

fn unspecified_endpoint() -> Endpoint {
    Endpoint::from_ip("0.0.0.0".parse().unwrap())
}

/// Ordering helper so candidates can be stored in binary heaps if a
/// future scheduler needs it; not required by the plain Vec-based race.
impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank
    }
}
impl Eq for Candidate {}
impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank.cmp(&other.rank)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn make(local: Endpoint, remote: Endpoint, stack: ProtocolStack, rank: usize) -> Candidate {
        Candidate {
            local,
            remote,
            stack,
            security: None,
            priority: 0,
            rank,
        }
    }
}
