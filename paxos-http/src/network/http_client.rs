use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::TransportError;
use crate::paxos::quorum::Peer;
use crate::paxos::types::{AcceptRequest, AcceptResponse, LearnReport, Prepare, Promise};
use crate::paxos::{AcceptorClient, LearnerClient};

/// Turns a configured address, either `host:port` or a full `http://` URL,
/// into a base URL without a trailing slash.
pub fn base_url_for(address: &str) -> String {
    if address.starts_with("http://") || address.starts_with("https://") {
        address.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", address.trim_end_matches('/'))
    }
}

/// A remote acceptor or learner reached over HTTP+JSON.
pub struct HttpPeer {
    id: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpPeer {
    /// `address` is either `host:port` or a full `http://` URL.
    pub fn new(id: impl Into<String>, address: &str, client: reqwest::Client) -> Self {
        HttpPeer {
            id: id.into(),
            base_url: base_url_for(address),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POSTs `body` to `route`. A 409 still carries a protocol answer when
    /// `conflict_is_answer` is set.
    async fn post<Req, Resp>(
        &self,
        route: &str,
        body: &Req,
        conflict_is_answer: bool,
    ) -> Result<Resp, TransportError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, route);
        debug!("[HTTP] POST {}", url);

        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::Unreachable {
                peer: self.id.clone(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() && !(conflict_is_answer && status == StatusCode::CONFLICT) {
            return Err(TransportError::Status {
                peer: self.id.clone(),
                status: status.as_u16(),
            });
        }

        resp.json::<Resp>()
            .await
            .map_err(|e| TransportError::Decode {
                peer: self.id.clone(),
                reason: e.to_string(),
            })
    }
}

impl Peer for HttpPeer {
    fn peer_id(&self) -> &str {
        &self.id
    }
}

#[async_trait]
impl AcceptorClient for HttpPeer {
    async fn prepare(&self, prepare: Prepare) -> Result<Promise, TransportError> {
        self.post("prepare", &prepare, false).await
    }

    async fn accept(&self, request: AcceptRequest) -> Result<AcceptResponse, TransportError> {
        self.post("accept_request", &request, true).await
    }
}

#[async_trait]
impl LearnerClient for HttpPeer {
    async fn learn(&self, report: LearnReport) -> Result<AcceptResponse, TransportError> {
        self.post("learn", &report, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_accepts_bare_addresses_and_urls() {
        let client = reqwest::Client::new();
        assert_eq!(
            HttpPeer::new("a", "127.0.0.1:8889", client.clone()).base_url(),
            "http://127.0.0.1:8889"
        );
        assert_eq!(
            HttpPeer::new("a", "http://acceptor:80/", client).base_url(),
            "http://acceptor:80"
        );
        assert_eq!(base_url_for("https://learner:443"), "https://learner:443");
        assert_eq!(base_url_for("learner:8895/"), "http://learner:8895");
    }

    #[tokio::test]
    async fn unreachable_peer_is_a_transport_error() {
        // Port 9 (discard) is essentially never served locally.
        let peer = HttpPeer::new("gone", "127.0.0.1:9", reqwest::Client::new());
        let prepare = Prepare {
            proposal: crate::paxos::types::Proposal {
                key: "k".into(),
                id: crate::paxos::types::ProposalId::new(1, "p"),
                value: "v".into(),
            },
        };
        let err = AcceptorClient::prepare(&peer, prepare).await.unwrap_err();
        assert!(
            matches!(err, TransportError::Unreachable { .. }),
            "expected Unreachable, got {err:?}"
        );
    }
}
