//! Axum routers exposing each role over HTTP+JSON.

use std::future::Future;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::error::RequestError;
use crate::paxos::acceptor::{Acceptor, KeyState};
use crate::paxos::learner::Learner;
use crate::paxos::proposer::Proposer;
use crate::paxos::types::{
    AcceptRequest, AcceptResponse, AcceptStatus, AcceptedValue, LearnReport, Outcome, Prepare,
    Promise,
};

/// Body of a client's decision request to a proposer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposeRequest {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutcomeKind {
    Committed,
    Rejected,
    Timeout,
}

/// Proposer's answer to a [`ProposeRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposeResponse {
    pub outcome: OutcomeKind,
    #[serde(default)]
    pub value: Option<String>,
}

impl From<Outcome> for ProposeResponse {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Committed(value) => ProposeResponse {
                outcome: OutcomeKind::Committed,
                value: Some(value),
            },
            Outcome::Rejected => ProposeResponse {
                outcome: OutcomeKind::Rejected,
                value: None,
            },
            Outcome::Timeout => ProposeResponse {
                outcome: OutcomeKind::Timeout,
                value: None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChosenResponse {
    pub key: String,
    pub chosen: Option<AcceptedValue>,
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        warn!("[HTTP] {}", self);
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

fn parse<T: DeserializeOwned>(body: &Bytes) -> Result<T, RequestError> {
    Ok(serde_json::from_slice(body)?)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "SUCCESS" }))
}

pub fn acceptor_router(acceptor: Arc<Acceptor>) -> Router {
    Router::new()
        .route("/prepare", post(prepare).get(health))
        .route("/accept_request", post(accept_request).get(health))
        .route("/health", get(health))
        .route("/state/{key}", get(acceptor_state))
        .with_state(acceptor)
}

async fn prepare(
    State(acceptor): State<Arc<Acceptor>>,
    body: Bytes,
) -> Result<Json<Promise>, RequestError> {
    let prepare: Prepare = parse(&body)?;
    Ok(Json(acceptor.handle_prepare(prepare)))
}

async fn accept_request(
    State(acceptor): State<Arc<Acceptor>>,
    body: Bytes,
) -> Result<(StatusCode, Json<AcceptResponse>), RequestError> {
    let request: AcceptRequest = parse(&body)?;
    let resp = acceptor.handle_accept(request).await;
    let status = match resp.status {
        AcceptStatus::Nack => StatusCode::CONFLICT,
        AcceptStatus::Ack | AcceptStatus::Committed => StatusCode::OK,
    };
    Ok((status, Json(resp)))
}

async fn acceptor_state(
    State(acceptor): State<Arc<Acceptor>>,
    Path(key): Path<String>,
) -> Json<KeyState> {
    Json(acceptor.snapshot(&key).unwrap_or_default())
}

pub fn learner_router(learner: Arc<Learner>) -> Router {
    Router::new()
        .route("/learn", post(learn).get(health))
        .route("/health", get(health))
        .route("/chosen/{key}", get(chosen))
        .with_state(learner)
}

async fn learn(
    State(learner): State<Arc<Learner>>,
    body: Bytes,
) -> Result<Json<AcceptResponse>, RequestError> {
    let report: LearnReport = parse(&body)?;
    Ok(Json(learner.handle_learn(report)))
}

async fn chosen(
    State(learner): State<Arc<Learner>>,
    Path(key): Path<String>,
) -> Json<ChosenResponse> {
    let chosen = learner.chosen(&key);
    Json(ChosenResponse { key, chosen })
}

pub fn proposer_router(proposer: Arc<Proposer>) -> Router {
    Router::new()
        .route("/", post(propose).get(health))
        .route("/health", get(health))
        .with_state(proposer)
}

async fn propose(
    State(proposer): State<Arc<Proposer>>,
    body: Bytes,
) -> Result<(StatusCode, Json<ProposeResponse>), RequestError> {
    let request: ProposeRequest = parse(&body)?;
    info!(
        "[HTTP] Decision request for key '{}' on proposer {}",
        request.key,
        proposer.id()
    );
    let resp = ProposeResponse::from(proposer.propose(&request.key, &request.value).await);
    let status = match resp.outcome {
        OutcomeKind::Committed => StatusCode::OK,
        OutcomeKind::Rejected => StatusCode::CONFLICT,
        OutcomeKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
    };
    Ok((status, Json(resp)))
}

/// Serves `router` on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("[HTTP] Listening on {}", addr);
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
