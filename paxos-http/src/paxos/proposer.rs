use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::paxos::quorum::{broadcast, Tally};
use crate::paxos::types::{
    AcceptRequest, AcceptStatus, Outcome, Prepare, Promise, Proposal, ProposalId,
};
use crate::paxos::AcceptorClient;

/// Timing and retry knobs of a proposer.
#[derive(Debug, Clone)]
pub struct ProposerSettings {
    pub prepare_timeout: Duration,
    pub accept_timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
}

impl Default for ProposerSettings {
    fn default() -> Self {
        ProposerSettings {
            prepare_timeout: Duration::from_millis(1000),
            accept_timeout: Duration::from_millis(1000),
            max_retries: 5,
            backoff_min: Duration::from_millis(10),
            backoff_max: Duration::from_millis(200),
        }
    }
}

/// Why a single round did not commit.
enum RoundFailure {
    /// At least one acceptor explicitly refused.
    Rejected,
    /// Too few acceptors answered.
    Silent,
}

/// A Paxos proposer driving single-decree rounds against a fixed set of
/// acceptors.
pub struct Proposer {
    id: String,
    acceptors: Vec<Arc<dyn AcceptorClient>>,
    settings: ProposerSettings,
    /// Last round handed out, shared by every key.
    round: AtomicU64,
}

impl Proposer {
    pub fn new(
        id: impl Into<String>,
        acceptors: Vec<Arc<dyn AcceptorClient>>,
        settings: ProposerSettings,
    ) -> Self {
        Proposer {
            id: id.into(),
            acceptors,
            settings,
            round: AtomicU64::new(0),
        }
    }

    /// Makes the next proposal use `round`.
    pub fn starting_at(self, round: u64) -> Self {
        self.round.store(round.saturating_sub(1), Ordering::SeqCst);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn next_id(&self) -> ProposalId {
        let round = self.round.fetch_add(1, Ordering::SeqCst) + 1;
        ProposalId::new(round, self.id.as_str())
    }

    /// Remembers a competing id so the next proposal outranks it.
    fn observe(&self, seen: &ProposalId) {
        self.round.fetch_max(seen.round, Ordering::SeqCst);
    }

    /// Runs rounds until `key` commits or the retry budget is spent.
    pub async fn propose(&self, key: &str, value: &str) -> Outcome {
        let mut last_failure = RoundFailure::Silent;

        for attempt in 0..=self.settings.max_retries {
            if attempt > 0 {
                self.backoff().await;
            }
            let id = self.next_id();
            info!(
                "[Proposer {}] Attempt {} for key '{}' with id {}",
                self.id,
                attempt + 1,
                key,
                id
            );
            match self.run_round(key, value, id).await {
                Ok(chosen) => return Outcome::Committed(chosen),
                Err(failure) => last_failure = failure,
            }
        }

        match last_failure {
            RoundFailure::Rejected => {
                warn!(
                    "[Proposer {}] Giving up on key '{}': rejected after {} attempts",
                    self.id,
                    key,
                    self.settings.max_retries + 1
                );
                Outcome::Rejected
            }
            RoundFailure::Silent => {
                warn!(
                    "[Proposer {}] Giving up on key '{}': no quorum answered after {} attempts",
                    self.id,
                    key,
                    self.settings.max_retries + 1
                );
                Outcome::Timeout
            }
        }
    }

    async fn backoff(&self) {
        let lo = self.settings.backoff_min.as_millis() as u64;
        let hi = (self.settings.backoff_max.as_millis() as u64).max(lo);
        let delay = rand::rng().random_range(lo..=hi);
        debug!("[Proposer {}] Backing off {}ms", self.id, delay);
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    async fn run_round(
        &self,
        key: &str,
        value: &str,
        id: ProposalId,
    ) -> Result<String, RoundFailure> {
        let proposal = Proposal {
            key: key.to_string(),
            id,
            value: value.to_string(),
        };

        let promises = self.prepare_phase(&proposal).await?;
        let adopted = adopt_value(&promises).unwrap_or(value).to_string();
        if adopted != value {
            info!(
                "[Proposer {}] Adopting previously accepted value '{}' for key '{}'",
                self.id, adopted, key
            );
        }

        let proposal = Proposal {
            value: adopted,
            ..proposal
        };
        self.accept_phase(proposal).await
    }

    /// Phase 1. Returns the ACKed promises once a majority has promised.
    async fn prepare_phase(&self, proposal: &Proposal) -> Result<Vec<Promise>, RoundFailure> {
        let prepare = Prepare {
            proposal: proposal.clone(),
        };
        let mut replies = broadcast(&self.acceptors, self.settings.prepare_timeout, |acceptor| {
            let prepare = prepare.clone();
            async move { acceptor.prepare(prepare).await }
        });

        let mut tally = Tally::new(self.acceptors.len());
        let mut promises = Vec::new();
        while !tally.decided() {
            let Some(reply) = replies.recv().await else {
                break;
            };
            match reply.result {
                Ok(promise) if promise.is_ack() => {
                    tally.yes += 1;
                    promises.push(promise);
                }
                Ok(promise) => {
                    tally.no += 1;
                    if let Some(promised) = &promise.promised {
                        self.observe(promised);
                    }
                    info!(
                        "[Proposer {}] Acceptor {} NACKed prepare {}",
                        self.id, reply.peer, proposal.id
                    );
                }
                Err(e) => {
                    tally.silent += 1;
                    warn!("[Proposer {}] Prepare lost: {}", self.id, e);
                }
            }
        }

        if tally.reached() {
            debug!(
                "[Proposer {}] {} promises for {} (needed {})",
                self.id,
                tally.yes,
                proposal.id,
                tally.needed()
            );
            Ok(promises)
        } else {
            warn!(
                "[Proposer {}] Only {} promises for {} (needed {})",
                self.id,
                tally.yes,
                proposal.id,
                tally.needed()
            );
            Err(failure_of(&tally))
        }
    }

    /// Phase 2. Returns the committed value once a majority has accepted.
    async fn accept_phase(&self, proposal: Proposal) -> Result<String, RoundFailure> {
        let request = AcceptRequest {
            proposal: proposal.clone(),
        };
        let mut replies = broadcast(&self.acceptors, self.settings.accept_timeout, |acceptor| {
            let request = request.clone();
            async move { acceptor.accept(request).await }
        });

        let mut tally = Tally::new(self.acceptors.len());
        let mut committed = 0;
        while !tally.decided() {
            let Some(reply) = replies.recv().await else {
                break;
            };
            match reply.result {
                Ok(resp) if resp.is_accepted() => {
                    tally.yes += 1;
                    if resp.status == AcceptStatus::Committed {
                        committed += 1;
                    }
                }
                Ok(resp) => {
                    tally.no += 1;
                    if let Some(promised) = &resp.promised {
                        self.observe(promised);
                    }
                    info!(
                        "[Proposer {}] Acceptor {} NACKed accept {}",
                        self.id, reply.peer, proposal.id
                    );
                }
                Err(e) => {
                    tally.silent += 1;
                    warn!("[Proposer {}] Accept request lost: {}", self.id, e);
                }
            }
        }

        if !tally.reached() {
            warn!(
                "[Proposer {}] Only {} acceptances for {} (needed {})",
                self.id,
                tally.yes,
                proposal.id,
                tally.needed()
            );
            return Err(failure_of(&tally));
        }

        if committed > 0 {
            info!(
                "[Proposer {}] Key '{}' committed '{}' with id {}; learners converged",
                self.id, proposal.key, proposal.value, proposal.id
            );
        } else {
            info!(
                "[Proposer {}] Key '{}' accepted '{}' with id {}; learners still converging",
                self.id, proposal.key, proposal.value, proposal.id
            );
        }
        Ok(proposal.value)
    }
}

fn failure_of(tally: &Tally) -> RoundFailure {
    if tally.no > 0 {
        RoundFailure::Rejected
    } else {
        RoundFailure::Silent
    }
}

/// The value accepted under the highest id among `promises`, if any acceptor
/// reported one.
pub fn adopt_value(promises: &[Promise]) -> Option<&str> {
    promises
        .iter()
        .filter_map(|promise| promise.previously_accepted.as_ref())
        .max_by(|a, b| a.id.cmp(&b.id))
        .map(|accepted| accepted.value.as_str())
}
