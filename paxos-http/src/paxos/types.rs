use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one proposal attempt.
///
/// Ordered by `round` first and by `proposer` second, so two proposers can
/// never issue equal ids and every pair of ids is comparable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProposalId {
    pub round: u64,
    pub proposer: String,
}

impl ProposalId {
    pub fn new(round: u64, proposer: impl Into<String>) -> Self {
        ProposalId {
            round,
            proposer: proposer.into(),
        }
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.round, self.proposer)
    }
}

/// A value proposed for a key under a given id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub key: String,
    pub id: ProposalId,
    pub value: String,
}

/// An accepted `(id, value)` pair as reported back in a promise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedValue {
    pub id: ProposalId,
    pub value: String,
}

/// Phase 1a.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prepare {
    pub proposal: Proposal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PromiseStatus {
    Ack,
    Nack,
}

/// Phase 1b.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promise {
    pub prepare: Prepare,
    pub status: PromiseStatus,
    /// Set on ACK when the acceptor already accepted a value for this key.
    #[serde(default)]
    pub previously_accepted: Option<AcceptedValue>,
    /// Set on NACK to the id the acceptor has promised instead.
    #[serde(default)]
    pub promised: Option<ProposalId>,
}

impl Promise {
    pub fn is_ack(&self) -> bool {
        self.status == PromiseStatus::Ack
    }
}

/// Phase 2a.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptRequest {
    pub proposal: Proposal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AcceptStatus {
    Ack,
    Nack,
    Committed,
}

/// Phase 2b, also the learner's answer to a [`LearnReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptResponse {
    pub proposal_id: ProposalId,
    pub status: AcceptStatus,
    #[serde(default)]
    pub promised: Option<ProposalId>,
}

impl AcceptResponse {
    pub fn new(proposal_id: ProposalId, status: AcceptStatus) -> Self {
        AcceptResponse {
            proposal_id,
            status,
            promised: None,
        }
    }

    /// ACK or COMMITTED.
    pub fn is_accepted(&self) -> bool {
        matches!(self.status, AcceptStatus::Ack | AcceptStatus::Committed)
    }
}

/// Sent by an acceptor to every learner after accepting a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnReport {
    pub key: String,
    pub proposal_id: ProposalId,
    pub value: String,
    /// Identity of the reporting acceptor.
    pub acceptor: String,
}

/// Final result of a proposer round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Committed(String),
    Rejected,
    Timeout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proposal_ids_order_by_round_then_proposer() {
        let a = ProposalId::new(1, "b");
        let b = ProposalId::new(2, "a");
        let c = ProposalId::new(2, "b");
        assert!(a < b, "lower round must sort first");
        assert!(b < c, "equal rounds fall back to the proposer identity");
        assert_ne!(ProposalId::new(3, "p1"), ProposalId::new(3, "p2"));
    }

    #[test]
    fn statuses_use_upper_case_on_the_wire() {
        let resp = AcceptResponse::new(ProposalId::new(1, "p"), AcceptStatus::Committed);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["status"], "COMMITTED");

        let promise: Promise = serde_json::from_value(serde_json::json!({
            "prepare": {"proposal": {"key": "k", "id": {"round": 4, "proposer": "p"}, "value": "v"}},
            "status": "NACK"
        }))
        .unwrap();
        assert!(!promise.is_ack());
        assert_eq!(promise.previously_accepted, None);
    }
}
