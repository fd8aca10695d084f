//! REST API server for PeerChain
//!
//! Exposes the coordinator's query interface over HTTP and lets clients submit
//! transactions to a named peer and trigger consensus rounds.

use axum::{
    extract::{Path, Request, State},
    http::{self, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use crate::blockchain::Block;
use crate::consensus::{ConsensusState, Mainnet, RoundReport};
use crate::error::ChainError;
use crate::persistence::Persistence;
use crate::transaction::Transaction;

pub const DEFAULT_API_PORT: u16 = 3000;

/// Shared handle to the coordinator used by every route.
#[derive(Clone)]
pub struct Node {
    pub mainnet: Arc<Mutex<Mainnet>>,
    persistence: Option<Arc<dyn Persistence>>,
    round_running: Arc<AtomicBool>,
}

/// Clears the running flag when a round ends or its request is dropped.
struct RoundGuard(Arc<AtomicBool>);

impl Drop for RoundGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Node {
    pub fn new(mainnet: Mainnet) -> Self {
        Self {
            mainnet: Arc::new(Mutex::new(mainnet)),
            persistence: None,
            round_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Save the canonical chain after every adopted round.
    pub fn with_persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn is_mining(&self) -> bool {
        self.round_running.load(Ordering::SeqCst)
    }

    /// Run one consensus round on a blocking thread.
    pub async fn run_round(&self) -> Result<RoundReport, ApiError> {
        if self
            .round_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ApiError::RoundInProgress);
        }
        let _guard = RoundGuard(self.round_running.clone());

        let mut mainnet = self.mainnet.clone().lock_owned().await;
        let persistence = self.persistence.clone();

        let report = tokio::task::spawn_blocking(move || -> Result<RoundReport, ChainError> {
            let report = mainnet.run_round()?;
            if report.adopted {
                if let Some(store) = &persistence {
                    if let Err(e) = store.save_chain(&mainnet.get_chain()) {
                        warn!(error = %e, "Failed to persist chain");
                    }
                }
            }
            Ok(report)
        })
        .await
        .map_err(|e| ApiError::InternalError(format!("Mining task failed: {}", e)))??;

        Ok(report)
    }
}

// ============================================================================
// API Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BlockchainError(ChainError),
    InvalidInput(String),
    NotFound(String),
    RoundInProgress,
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BlockchainError(e @ ChainError::UnknownPeer(_)) => {
                (StatusCode::NOT_FOUND, e.to_string())
            }
            ApiError::BlockchainError(e @ ChainError::AnnouncementTimeout(_)) => {
                (StatusCode::GATEWAY_TIMEOUT, e.to_string())
            }
            ApiError::BlockchainError(e @ (ChainError::DatabaseError(_) | ChainError::IoError(_))) => {
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            ApiError::BlockchainError(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::RoundInProgress => (
                StatusCode::CONFLICT,
                "A consensus round is already running".to_string(),
            ),
            ApiError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<ChainError> for ApiError {
    fn from(err: ChainError) -> Self {
        ApiError::BlockchainError(err)
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SubmitTransactionRequest {
    pub peer: String,
    pub sender_address: String,
    pub recipient_address: String,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Serialize)]
struct SuccessResponse {
    message: String,
}

#[derive(Serialize)]
pub struct PeerSummary {
    pub name: String,
    pub pending: usize,
    pub wins: u64,
    pub chain_length: usize,
}

// ============================================================================
// Middleware
// ============================================================================

async fn logging_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    info!(
        method = %method,
        path = %path,
        status = %response.status().as_u16(),
        duration_ms = %start.elapsed().as_millis(),
        "api.request"
    );

    response
}

// ============================================================================
// API Server
// ============================================================================

/// Build the API router with all endpoints
pub fn build_api_router(node: Arc<Node>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(vec![
            http::Method::GET,
            http::Method::POST,
            http::Method::OPTIONS,
        ])
        .allow_headers(vec![http::header::CONTENT_TYPE]);

    let api_routes = Router::new()
        // Chain endpoints
        .route("/chain", get(get_chain))
        .route("/chain/block/:index", get(get_block_by_index))
        // Transaction endpoints
        .route("/transactions", post(submit_transaction))
        .route("/transactions/pending", get(get_pending_transactions))
        // Consensus endpoints
        .route("/mine", post(mine_round))
        .route("/peers", get(get_peers))
        // System endpoints
        .route("/health", get(health_check))
        .layer(middleware::from_fn(logging_middleware))
        .with_state(node);

    Router::new().nest("/api", api_routes).layer(cors)
}

pub async fn run_api_server(node: Arc<Node>, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let app = build_api_router(node);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!(%addr, "API server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Route Handlers
// ============================================================================

async fn health_check(State(node): State<Arc<Node>>) -> impl IntoResponse {
    let (state, rounds) = if node.is_mining() {
        (ConsensusState::MiningRound, None)
    } else {
        let mainnet = node.mainnet.lock().await;
        (mainnet.state(), Some(mainnet.rounds_completed()))
    };

    Json(serde_json::json!({
        "status": "healthy",
        "node_state": state,
        "rounds_completed": rounds,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn get_chain(State(node): State<Arc<Node>>) -> impl IntoResponse {
    let mainnet = node.mainnet.lock().await;
    Json(mainnet.get_chain())
}

async fn get_block_by_index(
    State(node): State<Arc<Node>>,
    Path(index): Path<u64>,
) -> Result<Json<Block>, ApiError> {
    let mainnet = node.mainnet.lock().await;

    usize::try_from(index)
        .ok()
        .and_then(|i| mainnet.canonical_chain().blocks().get(i))
        .cloned()
        .ok_or_else(|| ApiError::NotFound(format!("Block {} not found", index)))
        .map(Json)
}

async fn get_pending_transactions(State(node): State<Arc<Node>>) -> impl IntoResponse {
    let mainnet = node.mainnet.lock().await;
    Json(serde_json::json!({
        "count": mainnet.pending_count(),
        "transactions": mainnet.pending_transactions()
    }))
}

async fn submit_transaction(
    State(node): State<Arc<Node>>,
    Json(req): Json<SubmitTransactionRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    if req.sender_address.is_empty() || req.recipient_address.is_empty() {
        return Err(ApiError::InvalidInput(
            "sender_address and recipient_address are required".to_string(),
        ));
    }

    let mut tx = Transaction::new(req.sender_address, req.recipient_address, req.value);
    tx.data = req.data;

    if node.is_mining() {
        return Err(ApiError::RoundInProgress);
    }
    let mut mainnet = node.mainnet.lock().await;
    mainnet.submit_transaction(&req.peer, tx)?;

    Ok(Json(SuccessResponse {
        message: format!("Transaction queued at {}", req.peer),
    }))
}

async fn mine_round(State(node): State<Arc<Node>>) -> Result<Json<RoundReport>, ApiError> {
    node.run_round().await.map(Json)
}

async fn get_peers(State(node): State<Arc<Node>>) -> impl IntoResponse {
    let mainnet = node.mainnet.lock().await;
    let peers: Vec<PeerSummary> = mainnet
        .peers()
        .iter()
        .map(|peer| PeerSummary {
            name: peer.name().to_string(),
            pending: peer.mempool().len(),
            wins: mainnet.wins().get(peer.name()).copied().unwrap_or(0),
            chain_length: peer.chain().len(),
        })
        .collect();

    Json(serde_json::json!({
        "count": peers.len(),
        "current_mainnet_peer_name": mainnet.canonical_peer(),
        "peers": peers
    }))
}
