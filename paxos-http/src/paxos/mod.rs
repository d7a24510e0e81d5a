pub mod acceptor;
pub mod learner;
pub mod proposer;
pub mod quorum;
pub mod types;

use async_trait::async_trait;

use crate::error::TransportError;
use quorum::Peer;
use types::{AcceptRequest, AcceptResponse, LearnReport, Prepare, Promise};

/// How a proposer reaches one acceptor.
#[async_trait]
pub trait AcceptorClient: Peer {
    /// Phase 1: ask the acceptor to promise not to accept lower ids.
    async fn prepare(&self, prepare: Prepare) -> Result<Promise, TransportError>;
    /// Phase 2: ask the acceptor to accept the proposal.
    async fn accept(&self, request: AcceptRequest) -> Result<AcceptResponse, TransportError>;
}

/// How an acceptor reaches one learner.
#[async_trait]
pub trait LearnerClient: Peer {
    async fn learn(&self, report: LearnReport) -> Result<AcceptResponse, TransportError>;
}
