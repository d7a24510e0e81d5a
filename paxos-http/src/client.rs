use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context};
use rand::Rng;
use tracing::warn;

use crate::config::{ClusterConfig, Role};
use crate::network::http_client::base_url_for;
use crate::network::http_server::ProposeRequest;

/// Tally of a demo client run.
#[derive(Debug, Default)]
pub struct ClientReport {
    pub successes: usize,
    /// Failed requests per proposer URL.
    pub failures: BTreeMap<String, usize>,
}

/// Base URLs of every proposer in the cluster.
pub fn proposer_urls(cluster: &ClusterConfig) -> Vec<String> {
    cluster
        .with_role(Role::Proposer)
        .map(|n| base_url_for(&n.address))
        .collect()
}

/// Sends `requests` decision requests for `key`, each to a randomly picked
/// proposer, printing `.` per success and `x` per failure.
pub async fn run_client(
    config: &Path,
    key: &str,
    value: &str,
    requests: usize,
) -> anyhow::Result<ClientReport> {
    let cluster = ClusterConfig::load(config)
        .with_context(|| format!("loading config {}", config.display()))?;
    let proposers = proposer_urls(&cluster);
    if proposers.is_empty() {
        bail!("no proposers in {}", config.display());
    }

    let client = reqwest::Client::new();
    let body = ProposeRequest {
        key: key.to_string(),
        value: value.to_string(),
    };
    let mut report = ClientReport::default();

    for _ in 0..requests {
        let pick = rand::rng().random_range(0..proposers.len());
        let url = &proposers[pick];
        let ok = match client.post(format!("{}/", url)).json(&body).send().await {
            Ok(resp) => {
                let success = resp.status().is_success();
                match resp.text().await {
                    Ok(text) => println!("{}", text),
                    Err(e) => warn!("Unreadable response from {}: {}", url, e),
                }
                success
            }
            Err(e) => {
                warn!("Request to {} failed: {}", url, e);
                false
            }
        };

        if ok {
            report.successes += 1;
            print!(".");
        } else {
            *report.failures.entry(url.clone()).or_default() += 1;
            print!("x");
        }
        std::io::stdout().flush()?;
    }
    println!();
    println!("Failures {:?}", report.failures);
    Ok(report)
}
