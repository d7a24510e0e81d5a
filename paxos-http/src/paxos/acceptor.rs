use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::paxos::quorum::{broadcast, Peer, Tally};
use crate::paxos::types::{
    AcceptRequest, AcceptResponse, AcceptStatus, AcceptedValue, LearnReport, Prepare, Promise,
    PromiseStatus, Proposal, ProposalId,
};
use crate::paxos::{AcceptorClient, LearnerClient};

/// Promise/accept state of one key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyState {
    pub promised: Option<ProposalId>,
    pub accepted: Option<AcceptedValue>,
    /// Id of the last ACKed prepare, kept until an accept request for the key
    /// has been handled.
    pub pending_promise: Option<ProposalId>,
}

/// Acceptor role. Holds the per-key state and reports every accepted
/// proposal to the configured learners.
pub struct Acceptor {
    id: String,
    learners: Vec<Arc<dyn LearnerClient>>,
    learn_timeout: Duration,
    keys: DashMap<String, KeyState>,
}

impl Acceptor {
    pub fn new(
        id: impl Into<String>,
        learners: Vec<Arc<dyn LearnerClient>>,
        learn_timeout: Duration,
    ) -> Self {
        Acceptor {
            id: id.into(),
            learners,
            learn_timeout,
            keys: DashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn snapshot(&self, key: &str) -> Option<KeyState> {
        self.keys.get(key).map(|state| state.clone())
    }

    /// Handles a phase 1a message.
    pub fn handle_prepare(&self, prepare: Prepare) -> Promise {
        let id = prepare.proposal.id.clone();
        let mut state = self.keys.entry(prepare.proposal.key.clone()).or_default();

        // Only a strictly higher id earns a promise.
        if let Some(promised) = state.promised.as_ref().filter(|p| id <= **p).cloned() {
            warn!(
                "[Acceptor {}] Rejected prepare for key '{}' with id {} (already promised {})",
                self.id, prepare.proposal.key, id, promised
            );
            return Promise {
                prepare,
                status: PromiseStatus::Nack,
                previously_accepted: None,
                promised: Some(promised),
            };
        }

        state.promised = Some(id.clone());
        state.pending_promise = Some(id.clone());
        let previously_accepted = state.accepted.clone();
        drop(state);

        info!(
            "[Acceptor {}] Promised to accept ids >= {} for key '{}'",
            self.id, id, prepare.proposal.key
        );
        Promise {
            prepare,
            status: PromiseStatus::Ack,
            previously_accepted,
            promised: None,
        }
    }

    /// Handles a phase 2a message, reporting to the learners when the
    /// proposal is accepted.
    pub async fn handle_accept(&self, request: AcceptRequest) -> AcceptResponse {
        let Proposal { key, id, value } = request.proposal;

        let rejected_by = {
            let mut state = self.keys.entry(key.clone()).or_default();
            state.pending_promise = None;
            match state.promised.as_ref().filter(|p| id < **p).cloned() {
                Some(promised) => Some(promised),
                None => {
                    state.promised = Some(id.clone());
                    state.accepted = Some(AcceptedValue {
                        id: id.clone(),
                        value: value.clone(),
                    });
                    None
                }
            }
        };

        if let Some(promised) = rejected_by {
            warn!(
                "[Acceptor {}] Rejected accept for key '{}' with id {} (already promised {})",
                self.id, key, id, promised
            );
            return AcceptResponse {
                proposal_id: id,
                status: AcceptStatus::Nack,
                promised: Some(promised),
            };
        }

        info!(
            "[Acceptor {}] Accepted id {} with value '{}' for key '{}'",
            self.id, id, value, key
        );
        let report = LearnReport {
            key,
            proposal_id: id.clone(),
            value,
            acceptor: self.id.clone(),
        };
        let status = self.notify_learners(report).await;
        AcceptResponse::new(id, status)
    }

    /// Reports an accepted proposal to every learner and folds their answers
    /// into a single status.
    async fn notify_learners(&self, report: LearnReport) -> AcceptStatus {
        if self.learners.is_empty() {
            return AcceptStatus::Ack;
        }
        let key = report.key.clone();

        let mut replies = broadcast(&self.learners, self.learn_timeout, |learner| {
            let report = report.clone();
            async move { learner.learn(report).await }
        });

        // yes = COMMITTED answers, no = ACK or NACK answers.
        let mut tally = Tally::new(self.learners.len());
        let mut acked = 0;
        while let Some(reply) = replies.recv().await {
            match reply.result {
                Ok(resp) => match resp.status {
                    AcceptStatus::Committed => tally.yes += 1,
                    AcceptStatus::Ack => {
                        tally.no += 1;
                        acked += 1;
                    }
                    AcceptStatus::Nack => {
                        tally.no += 1;
                        debug!("[Acceptor {}] Learner {} NACKed", self.id, reply.peer)
                    }
                },
                Err(e) => {
                    tally.silent += 1;
                    warn!("[Acceptor {}] Learn report not delivered: {}", self.id, e)
                }
            }
            // Past this point the remaining learners cannot change the answer.
            if tally.decided() && tally.yes + acked > 0 {
                break;
            }
        }

        if tally.reached() {
            info!(
                "[Acceptor {}] {} of {} learners committed key '{}'",
                self.id,
                tally.yes,
                self.learners.len(),
                key
            );
            AcceptStatus::Committed
        } else if tally.yes + acked > 0 {
            AcceptStatus::Ack
        } else {
            warn!(
                "[Acceptor {}] No learner acknowledged key '{}'",
                self.id, key
            );
            AcceptStatus::Nack
        }
    }
}

impl Peer for Acceptor {
    fn peer_id(&self) -> &str {
        &self.id
    }
}

#[async_trait]
impl AcceptorClient for Acceptor {
    async fn prepare(&self, prepare: Prepare) -> Result<Promise, TransportError> {
        Ok(self.handle_prepare(prepare))
    }

    async fn accept(&self, request: AcceptRequest) -> Result<AcceptResponse, TransportError> {
        Ok(self.handle_accept(request).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paxos::learner::Learner;

    fn prepare(key: &str, round: u64, proposer: &str) -> Prepare {
        Prepare {
            proposal: Proposal {
                key: key.to_string(),
                id: ProposalId::new(round, proposer),
                value: String::new(),
            },
        }
    }

    fn accept(key: &str, round: u64, proposer: &str, value: &str) -> AcceptRequest {
        AcceptRequest {
            proposal: Proposal {
                key: key.to_string(),
                id: ProposalId::new(round, proposer),
                value: value.to_string(),
            },
        }
    }

    fn lonely_acceptor() -> Acceptor {
        Acceptor::new("a1", Vec::new(), Duration::from_millis(50))
    }

    #[test]
    fn promise_requires_strictly_higher_id() {
        let acceptor = lonely_acceptor();
        assert!(acceptor.handle_prepare(prepare("k", 3, "p")).is_ack());

        let same = acceptor.handle_prepare(prepare("k", 3, "p"));
        assert!(!same.is_ack(), "an equal id must be NACKed");
        assert_eq!(same.promised, Some(ProposalId::new(3, "p")));

        let lower = acceptor.handle_prepare(prepare("k", 2, "z"));
        assert!(!lower.is_ack());
        assert!(acceptor.handle_prepare(prepare("k", 4, "a")).is_ack());
        assert_eq!(
            acceptor.snapshot("k").unwrap().promised,
            Some(ProposalId::new(4, "a"))
        );
    }

    #[test]
    fn keys_do_not_share_promises() {
        let acceptor = lonely_acceptor();
        assert!(acceptor.handle_prepare(prepare("a", 9, "p")).is_ack());
        assert!(
            acceptor.handle_prepare(prepare("b", 1, "p")).is_ack(),
            "a promise on key 'a' must not affect key 'b'"
        );
    }

    #[test]
    fn promised_id_never_decreases() {
        let acceptor = lonely_acceptor();
        let rounds = [5, 2, 7, 7, 1, 9, 3];
        let mut highest = None;
        for round in rounds {
            acceptor.handle_prepare(prepare("k", round, "p"));
            let promised = acceptor.snapshot("k").unwrap().promised;
            assert!(promised >= highest, "promise went backwards at round {round}");
            highest = promised;
        }
        assert_eq!(highest, Some(ProposalId::new(9, "p")));
    }

    #[tokio::test]
    async fn accept_gating_follows_the_promise() {
        let acceptor = lonely_acceptor();
        acceptor.handle_prepare(prepare("k", 5, "p"));

        let stale = acceptor.handle_accept(accept("k", 4, "p", "old")).await;
        assert_eq!(stale.status, AcceptStatus::Nack);
        assert_eq!(stale.promised, Some(ProposalId::new(5, "p")));
        assert_eq!(acceptor.snapshot("k").unwrap().accepted, None);

        let equal = acceptor.handle_accept(accept("k", 5, "p", "v")).await;
        assert_eq!(
            equal.status,
            AcceptStatus::Ack,
            "the promised id itself must be accepted"
        );

        let higher = acceptor.handle_accept(accept("k", 6, "q", "w")).await;
        assert!(higher.is_accepted());
        let state = acceptor.snapshot("k").unwrap();
        assert_eq!(
            state.accepted,
            Some(AcceptedValue {
                id: ProposalId::new(6, "q"),
                value: "w".to_string()
            })
        );
        assert_eq!(state.promised, Some(ProposalId::new(6, "q")));
    }

    #[tokio::test]
    async fn promise_carries_previously_accepted_value() {
        let acceptor = lonely_acceptor();
        acceptor.handle_accept(accept("k", 2, "p", "first")).await;

        let promise = acceptor.handle_prepare(prepare("k", 3, "q"));
        assert!(promise.is_ack());
        assert_eq!(
            promise.previously_accepted,
            Some(AcceptedValue {
                id: ProposalId::new(2, "p"),
                value: "first".to_string()
            })
        );
    }

    #[tokio::test]
    async fn accept_clears_pending_promise_only() {
        let acceptor = lonely_acceptor();
        acceptor.handle_prepare(prepare("k", 1, "p"));
        assert_eq!(
            acceptor.snapshot("k").unwrap().pending_promise,
            Some(ProposalId::new(1, "p"))
        );

        acceptor.handle_accept(accept("k", 1, "p", "v")).await;
        let state = acceptor.snapshot("k").unwrap();
        assert_eq!(state.pending_promise, None);
        assert_eq!(state.promised, Some(ProposalId::new(1, "p")));
    }

    #[tokio::test]
    async fn accept_reports_learner_commit() {
        let learners: Vec<Arc<dyn LearnerClient>> = vec![
            Arc::new(Learner::new("l1", 1)),
            Arc::new(Learner::new("l2", 1)),
        ];
        let acceptor = Acceptor::new("a1", learners, Duration::from_millis(200));
        let resp = acceptor.handle_accept(accept("k", 1, "p", "v")).await;
        assert_eq!(
            resp.status,
            AcceptStatus::Committed,
            "a single acceptor is a majority for learners configured with one acceptor"
        );
    }

    #[tokio::test]
    async fn accept_without_learner_quorum_is_ack() {
        let learners: Vec<Arc<dyn LearnerClient>> = vec![Arc::new(Learner::new("l1", 3))];
        let acceptor = Acceptor::new("a1", learners, Duration::from_millis(200));
        let resp = acceptor.handle_accept(accept("k", 1, "p", "v")).await;
        assert_eq!(resp.status, AcceptStatus::Ack);
    }

    #[tokio::test]
    async fn silent_learner_does_not_hold_up_the_answer() {
        use crate::network::simulation::{Fault, SimulatedNetwork};

        let network = SimulatedNetwork::new();
        network.inject("l2", Fault::Silent);
        let learners = vec![
            network.learner_link(Arc::new(Learner::new("l1", 3))),
            network.learner_link(Arc::new(Learner::new("l2", 3))),
        ];
        let acceptor = Acceptor::new("a1", learners, Duration::from_secs(5));

        let resp = tokio::time::timeout(
            Duration::from_millis(500),
            acceptor.handle_accept(accept("k", 1, "p", "v")),
        )
        .await
        .expect("an ACK from l1 already settles the answer");
        assert_eq!(resp.status, AcceptStatus::Ack);
    }

    #[tokio::test]
    async fn unreachable_learners_only_shrink_the_count() {
        use crate::network::simulation::{Fault, SimulatedNetwork};

        let network = SimulatedNetwork::new();
        network.inject("l3", Fault::Unreachable);
        let learners = vec![
            network.learner_link(Arc::new(Learner::new("l1", 1))),
            network.learner_link(Arc::new(Learner::new("l2", 1))),
            network.learner_link(Arc::new(Learner::new("l3", 1))),
        ];
        let acceptor = Acceptor::new("a1", learners, Duration::from_millis(200));

        let resp = acceptor.handle_accept(accept("k", 1, "p", "v")).await;
        assert_eq!(
            resp.status,
            AcceptStatus::Committed,
            "two of three learners committing is still a learner majority"
        );
    }

    #[tokio::test]
    async fn no_learner_answering_is_nack() {
        use crate::network::simulation::{Fault, SimulatedNetwork};

        let network = SimulatedNetwork::new();
        network.inject("l1", Fault::Unreachable);
        let learners = vec![network.learner_link(Arc::new(Learner::new("l1", 1)))];
        let acceptor = Acceptor::new("a1", learners, Duration::from_millis(200));

        let resp = acceptor.handle_accept(accept("k", 1, "p", "v")).await;
        assert_eq!(resp.status, AcceptStatus::Nack);
        assert!(
            acceptor.snapshot("k").unwrap().accepted.is_some(),
            "the accept itself is still recorded"
        );
    }
}
