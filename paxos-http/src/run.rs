use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use axum::Router;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::{Config, Role, RunConfig};
use crate::logger;
use crate::network::http_client::HttpPeer;
use crate::network::http_server::{acceptor_router, learner_router, proposer_router, serve};
use crate::network::simulation::{LocalCluster, SimulatedNetwork};
use crate::paxos::acceptor::Acceptor;
use crate::paxos::learner::Learner;
use crate::paxos::proposer::Proposer;
use crate::paxos::types::Outcome;
use crate::paxos::{AcceptorClient, LearnerClient};

/// Runs the role configured for `node_id` until Ctrl-C.
pub async fn run_node(node_id: u64, config: &Path) -> anyhow::Result<()> {
    let cfg = Config::load(config, node_id)
        .with_context(|| format!("loading config {}", config.display()))?;
    logger::init_tracing_with(&cfg.run_config.log_level);
    info!(
        "Node {} @{} role={}",
        cfg.node.node_id, cfg.node.address, cfg.node.role
    );

    let router = build_router(&cfg)?;
    let listener = TcpListener::bind(&cfg.node.address)
        .await
        .with_context(|| format!("binding {}", cfg.node.address))?;
    serve(listener, router, shutdown_signal()).await?;
    info!("Node {} stopped", cfg.node.node_id);
    Ok(())
}

/// Builds the role instance for this node and its HTTP routes.
pub fn build_router(cfg: &Config) -> anyhow::Result<Router> {
    let client = reqwest::Client::new();
    let name = cfg.node.name();

    let router = match cfg.node.role {
        Role::Acceptor => {
            let learners: Vec<Arc<dyn LearnerClient>> = cfg
                .peers(Role::Learner)
                .into_iter()
                .map(|n| {
                    Arc::new(HttpPeer::new(n.name(), &n.address, client.clone()))
                        as Arc<dyn LearnerClient>
                })
                .collect();
            if learners.is_empty() {
                warn!("Acceptor {} has no learners configured", name);
            }
            let acceptor = Acceptor::new(name, learners, cfg.run_config.learn_timeout());
            acceptor_router(Arc::new(acceptor))
        }
        Role::Learner => {
            let learner = Learner::new(name, cfg.num_acceptors());
            learner_router(Arc::new(learner))
        }
        Role::Proposer => {
            let acceptors: Vec<Arc<dyn AcceptorClient>> = cfg
                .peers(Role::Acceptor)
                .into_iter()
                .map(|n| {
                    Arc::new(HttpPeer::new(n.name(), &n.address, client.clone()))
                        as Arc<dyn AcceptorClient>
                })
                .collect();
            if acceptors.is_empty() {
                bail!("proposer {} has no acceptors configured", name);
            }
            let proposer = Proposer::new(name, acceptors, cfg.run_config.proposer_settings());
            proposer_router(Arc::new(proposer))
        }
    };
    Ok(router)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

/// Runs one decision over an in-process cluster and prints what every role
/// ended up with.
pub async fn run_local(
    num_acceptors: usize,
    num_learners: usize,
    key: &str,
    value: &str,
) -> anyhow::Result<Outcome> {
    logger::init_tracing_with("info");
    let run_config = RunConfig::default();
    let cluster = LocalCluster::new(
        SimulatedNetwork::with_delay(10, 100),
        num_acceptors,
        num_learners,
        run_config.learn_timeout(),
    );
    let proposer = cluster.proposer("proposer-1", run_config.proposer_settings());

    println!(
        "Proposing '{}' for key '{}' to {} acceptors and {} learners...",
        value, key, num_acceptors, num_learners
    );
    let outcome = proposer.propose(key, value).await;
    println!("Outcome: {:?}", outcome);

    if matches!(outcome, Outcome::Committed(_)) && !settle(&cluster, key, SETTLE_LIMIT).await {
        warn!("Cluster still converging on key '{}' after {:?}", key, SETTLE_LIMIT);
    }

    for acceptor in &cluster.acceptors {
        println!("{}: {:?}", acceptor.id(), acceptor.snapshot(key));
    }
    for learner in &cluster.learners {
        println!("{}: chosen {:?}", learner.id(), learner.chosen(key));
    }
    Ok(outcome)
}

const SETTLE_LIMIT: Duration = Duration::from_secs(3);

/// Polls until every acceptor has accepted and every learner has chosen a
/// value for `key`. Calls past the quorum finish in the background, so a
/// committed outcome can come back before the rest of the cluster catches up.
pub async fn settle(cluster: &LocalCluster, key: &str, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    loop {
        let accepted = cluster
            .acceptors
            .iter()
            .all(|a| a.snapshot(key).is_some_and(|s| s.accepted.is_some()));
        let chosen = cluster.learners.iter().all(|l| l.chosen(key).is_some());
        if accepted && chosen {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
