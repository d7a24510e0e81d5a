use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use tracing::debug;

use crate::error::TransportError;
use crate::paxos::acceptor::Acceptor;
use crate::paxos::learner::Learner;
use crate::paxos::proposer::{Proposer, ProposerSettings};
use crate::paxos::quorum::Peer;
use crate::paxos::types::{AcceptRequest, AcceptResponse, LearnReport, Prepare, Promise};
use crate::paxos::{AcceptorClient, LearnerClient};

/// How a simulated peer misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Calls fail straight away, like a refused connection.
    Unreachable,
    /// Calls never complete; only the caller's timeout ends them.
    Silent,
}

#[derive(Default)]
struct NetworkState {
    faults: DashMap<String, Fault>,
    delay_ms: Option<(u64, u64)>,
}

/// In-process network connecting role instances directly, with optional
/// random delay and per-peer faults.
#[derive(Clone, Default)]
pub struct SimulatedNetwork {
    state: Arc<NetworkState>,
}

impl SimulatedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message waits a random `min_ms..=max_ms` before delivery.
    pub fn with_delay(min_ms: u64, max_ms: u64) -> Self {
        SimulatedNetwork {
            state: Arc::new(NetworkState {
                faults: DashMap::new(),
                delay_ms: Some((min_ms, max_ms.max(min_ms))),
            }),
        }
    }

    pub fn inject(&self, peer: &str, fault: Fault) {
        self.state.faults.insert(peer.to_string(), fault);
    }

    pub fn heal(&self, peer: &str) {
        self.state.faults.remove(peer);
    }

    pub fn acceptor_link(&self, acceptor: Arc<Acceptor>) -> Arc<dyn AcceptorClient> {
        Arc::new(Link {
            node: acceptor,
            network: self.clone(),
        })
    }

    pub fn learner_link(&self, learner: Arc<Learner>) -> Arc<dyn LearnerClient> {
        Arc::new(Link {
            node: learner,
            network: self.clone(),
        })
    }

    /// Waits out the simulated latency, then fails if `peer` is faulted.
    async fn deliver(&self, peer: &str) -> Result<(), TransportError> {
        if let Some((lo, hi)) = self.state.delay_ms {
            let delay = rand::rng().random_range(lo..=hi);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let fault = self.state.faults.get(peer).map(|f| *f);
        match fault {
            None => Ok(()),
            Some(Fault::Unreachable) => {
                debug!("[Simulation] Dropping message to {}", peer);
                Err(TransportError::Unreachable {
                    peer: peer.to_string(),
                    reason: "partitioned".to_string(),
                })
            }
            Some(Fault::Silent) => {
                debug!("[Simulation] Swallowing message to {}", peer);
                futures::future::pending().await
            }
        }
    }
}

/// A role instance as seen through the simulated network.
struct Link<T> {
    node: Arc<T>,
    network: SimulatedNetwork,
}

impl<T: Peer> Peer for Link<T> {
    fn peer_id(&self) -> &str {
        self.node.peer_id()
    }
}

#[async_trait]
impl AcceptorClient for Link<Acceptor> {
    async fn prepare(&self, prepare: Prepare) -> Result<Promise, TransportError> {
        self.network.deliver(self.peer_id()).await?;
        Ok(self.node.handle_prepare(prepare))
    }

    async fn accept(&self, request: AcceptRequest) -> Result<AcceptResponse, TransportError> {
        self.network.deliver(self.peer_id()).await?;
        Ok(self.node.handle_accept(request).await)
    }
}

#[async_trait]
impl LearnerClient for Link<Learner> {
    async fn learn(&self, report: LearnReport) -> Result<AcceptResponse, TransportError> {
        self.network.deliver(self.peer_id()).await?;
        Ok(self.node.handle_learn(report))
    }
}

/// Acceptors and learners wired together over one simulated network.
pub struct LocalCluster {
    pub network: SimulatedNetwork,
    pub acceptors: Vec<Arc<Acceptor>>,
    pub learners: Vec<Arc<Learner>>,
}

impl LocalCluster {
    /// Acceptors are named `acceptor-1..`, learners `learner-1..`.
    pub fn new(
        network: SimulatedNetwork,
        num_acceptors: usize,
        num_learners: usize,
        learn_timeout: Duration,
    ) -> Self {
        let learners: Vec<Arc<Learner>> = (1..=num_learners)
            .map(|i| Arc::new(Learner::new(format!("learner-{}", i), num_acceptors)))
            .collect();
        let learner_links: Vec<Arc<dyn LearnerClient>> = learners
            .iter()
            .map(|l| network.learner_link(Arc::clone(l)))
            .collect();
        let acceptors = (1..=num_acceptors)
            .map(|i| {
                Arc::new(Acceptor::new(
                    format!("acceptor-{}", i),
                    learner_links.clone(),
                    learn_timeout,
                ))
            })
            .collect();

        LocalCluster {
            network,
            acceptors,
            learners,
        }
    }

    pub fn proposer(&self, id: &str, settings: ProposerSettings) -> Proposer {
        let links = self
            .acceptors
            .iter()
            .map(|a| self.network.acceptor_link(Arc::clone(a)))
            .collect();
        Proposer::new(id, links, settings)
    }
}
