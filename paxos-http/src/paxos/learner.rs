use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::error::TransportError;
use crate::paxos::quorum::{majority, Peer};
use crate::paxos::types::{AcceptResponse, AcceptStatus, AcceptedValue, LearnReport, ProposalId};
use crate::paxos::LearnerClient;

#[derive(Debug, Default)]
struct KeyVotes {
    /// Distinct acceptors that reported each proposal id.
    votes: HashMap<ProposalId, HashSet<String>>,
    chosen: Option<AcceptedValue>,
}

/// Learner role: counts acceptance reports and records the chosen value of
/// each key once a majority of acceptors agree on one proposal.
pub struct Learner {
    id: String,
    num_acceptors: usize,
    keys: DashMap<String, KeyVotes>,
}

impl Learner {
    pub fn new(id: impl Into<String>, num_acceptors: usize) -> Self {
        Learner {
            id: id.into(),
            num_acceptors,
            keys: DashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn quorum(&self) -> usize {
        majority(self.num_acceptors)
    }

    /// Handles an acceptance report. Never rejects.
    pub fn handle_learn(&self, report: LearnReport) -> AcceptResponse {
        let LearnReport {
            key,
            proposal_id,
            value,
            acceptor,
        } = report;

        let mut entry = self.keys.entry(key.clone()).or_default();
        let voters = entry.votes.entry(proposal_id.clone()).or_default();
        voters.insert(acceptor);
        let count = voters.len();

        if let Some(chosen) = &entry.chosen {
            debug!(
                "[Learner {}] Key '{}' already chose '{}', report for {} is a no-op",
                self.id, key, chosen.value, proposal_id
            );
            return AcceptResponse::new(proposal_id, AcceptStatus::Committed);
        }

        if count >= self.quorum() {
            info!(
                "[Learner {}] Key '{}' chose '{}' under id {} ({} of {} acceptors)",
                self.id, key, value, proposal_id, count, self.num_acceptors
            );
            entry.chosen = Some(AcceptedValue {
                id: proposal_id.clone(),
                value,
            });
            return AcceptResponse::new(proposal_id, AcceptStatus::Committed);
        }

        debug!(
            "[Learner {}] Recorded vote for key '{}' id {} ({}/{} needed)",
            self.id,
            key,
            proposal_id,
            count,
            self.quorum()
        );
        AcceptResponse::new(proposal_id, AcceptStatus::Ack)
    }

    pub fn chosen(&self, key: &str) -> Option<AcceptedValue> {
        self.keys.get(key).and_then(|entry| entry.chosen.clone())
    }

    /// Number of distinct acceptors that reported `id` for `key`.
    pub fn votes(&self, key: &str, id: &ProposalId) -> usize {
        self.keys
            .get(key)
            .and_then(|entry| entry.votes.get(id).map(HashSet::len))
            .unwrap_or(0)
    }
}

impl Peer for Learner {
    fn peer_id(&self) -> &str {
        &self.id
    }
}

#[async_trait]
impl LearnerClient for Learner {
    async fn learn(&self, report: LearnReport) -> Result<AcceptResponse, TransportError> {
        Ok(self.handle_learn(report))
    }
}
