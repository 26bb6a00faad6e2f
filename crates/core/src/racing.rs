use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::adapters::{Clock, TlsProvider, TransportDriver, TransportHandle};
use crate::candidate::Candidate;
use crate::errors::{Error, Result};
use crate::stats::CandidateStats;

/// The transport handle and candidate that won a race, handed to the
/// Connection FSM to be wrapped with the framer pipeline.
pub struct RaceOutcome {
    pub handle: Box<dyn TransportHandle>,
    pub candidate: Candidate,
    /// One entry per candidate that was offered to the race, in the
    /// order supplied. Candidates the winner pre-empted before their
    /// staggered start ran are left with `attempted: false`.
    pub attempts: Vec<CandidateStats>,
}

impl std::fmt::Debug for RaceOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RaceOutcome")
            .field("candidate", &self.candidate)
            .field("attempts", &self.attempts)
            .finish()
    }
}

/// Concurrently attempts `candidates` in rank order under staggered
/// start, cancelling losers as soon as a winner is declared. See the
/// Racing Engine algorithm: each candidate is a cancellable task: no
/// OS-thread assumptions beyond cooperative progress.
pub async fn race(
    candidates: Vec<Candidate>,
    driver: Arc<dyn TransportDriver>,
    tls: Option<Arc<dyn TlsProvider>>,
    clock: Arc<dyn Clock>,
    stagger: Duration,
    conn_timeout: Duration,
) -> Result<RaceOutcome> {
    if candidates.is_empty() {
        return Err(Error::establishment("no feasible candidate"));
    }

    let attempt_count = candidates.len();
    let mut attempts: Vec<CandidateStats> = candidates
        .iter()
        .map(|c| CandidateStats {
            description: c.description(),
            stack: c.stack,
            rank: c.rank(),
            attempted: false,
            succeeded: false,
            error: None,
            time_to_ready: None,
        })
        .collect();

    let (tx, mut rx) = mpsc::channel::<(usize, std::result::Result<(Box<dyn TransportHandle>, Candidate), String>, Duration)>(
        attempt_count,
    );
    let mut handles = Vec::with_capacity(attempt_count);

    for (i, candidate) in candidates.into_iter().enumerate() {
        let tx = tx.clone();
        let driver = Arc::clone(&driver);
        let tls = tls.clone();
        let clock = Arc::clone(&clock);
        let delay = stagger.saturating_mul(i as u32);

        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                clock.sleep(delay).await;
            }
            debug!("racing: attempting candidate[{i}] {}", candidate.description());
            let attempt_start = clock.now();
            let result = attempt_candidate(&candidate, &driver, tls.as_deref()).await;
            let elapsed = clock.now().saturating_duration_since(attempt_start);
            let outcome = result
                .map(|handle| (handle, candidate))
                .map_err(|e| e.to_string());
            let _ = tx.send((i, outcome, elapsed)).await;
        });
        handles.push(handle);
    }
    drop(tx);

    let race_future = async {
        let mut errors = Vec::new();
        while let Some((i, result, elapsed)) = rx.recv().await {
            attempts[i].attempted = true;
            match result {
                Ok((handle, candidate)) => {
                    attempts[i].succeeded = true;
                    attempts[i].time_to_ready = Some(elapsed);
                    for (j, h) in handles.iter().enumerate() {
                        if j != i {
                            h.abort();
                        }
                    }
                    info!("racing: candidate[{i}] {} won", candidate.description());
                    return Ok(RaceOutcome {
                        handle,
                        candidate,
                        attempts,
                    });
                }
                Err(e) => {
                    attempts[i].error = Some(e.clone());
                    warn!("racing: candidate[{i}] failed: {e}");
                    errors.push(format!("candidate[{i}]: {e}"));
                }
            }
        }
        Err(Error::establishment(format!(
            "no candidate succeeded ({attempt_count} attempted): {}",
            errors.join("; ")
        )))
    };

    match tokio::time::timeout(conn_timeout, race_future).await {
        Ok(result) => result,
        Err(_) => {
            for h in &handles {
                h.abort();
            }
            Err(Error::establishment(format!(
                "race timed out after {conn_timeout:?}"
            )))
        }
    }
}

async fn attempt_candidate(
    candidate: &Candidate,
    driver: &Arc<dyn TransportDriver>,
    tls: Option<&dyn TlsProvider>,
) -> Result<Box<dyn TransportHandle>> {
    let mut handle = driver
        .connect(&candidate.local, &candidate.remote, candidate.stack)
        .await?;
    handle.ready().await?;

    if candidate.stack.is_secure() {
        let params = candidate
            .security
            .as_ref()
            .ok_or_else(|| Error::not_supported("secure stack requires SecurityParameters"))?;
        let provider = tls.ok_or_else(|| Error::not_supported("no TlsProvider configured"))?;
        handle = provider.wrap_client(handle, params).await?;
        handle.ready().await?;

        if let Some(cert) = handle.peer_certificate() {
            if !params.verify_trust(&cert) {
                return Err(Error::establishment("peer certificate failed trust verification"));
            }
        }
    }

    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use crate::stack::ProtocolStack;
    use crate::testing::{MemoryTransportDriver, SystemClock};

    fn candidate(stack: ProtocolStack, rank: usize) -> Candidate {
        crate::candidate::test_support::make(
            Endpoint::from_ip("127.0.0.1".parse().unwrap()),
            Endpoint::from_ip("127.0.0.1".parse().unwrap()).with_port(9),
            stack,
            rank,
        )
    }

    #[tokio::test]
    async fn first_reachable_candidate_wins() {
        let driver: Arc<dyn TransportDriver> =
            Arc::new(MemoryTransportDriver::unreachable_then_reachable(1));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let candidates = vec![
            candidate(ProtocolStack::Tcp, 0),
            candidate(ProtocolStack::Udp, 1),
        ];

        let outcome = race(
            candidates,
            driver,
            None,
            clock,
            Duration::from_millis(5),
            Duration::from_secs(2),
        )
        .await
        .unwrap();

        assert_eq!(outcome.candidate.rank(), 1);

        assert_eq!(outcome.attempts.len(), 2);
        assert!(outcome.attempts[0].attempted);
        assert!(!outcome.attempts[0].succeeded);
        assert!(outcome.attempts[0].error.is_some());
        assert!(outcome.attempts[1].attempted);
        assert!(outcome.attempts[1].succeeded);
        assert!(outcome.attempts[1].time_to_ready.is_some());
    }

    #[tokio::test]
    async fn empty_candidate_list_fails_immediately() {
        let driver: Arc<dyn TransportDriver> = Arc::new(MemoryTransportDriver::always_fail());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let err = race(vec![], driver, None, clock, Duration::from_millis(1), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EstablishmentFailure { .. }));
    }

    #[tokio::test]
    async fn race_times_out_when_nothing_succeeds() {
        let driver: Arc<dyn TransportDriver> = Arc::new(MemoryTransportDriver::always_fail());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let candidates = vec![candidate(ProtocolStack::Tcp, 0)];
        let err = race(
            candidates,
            driver,
            None,
            clock,
            Duration::from_millis(1),
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::EstablishmentFailure { .. }));
    }
}
