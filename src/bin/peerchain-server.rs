#![forbid(unsafe_code)]
//! HTTP API server for PeerChain

use peerchain::api::{run_api_server, Node};
use peerchain::config::load_config;
use peerchain::consensus::Mainnet;
use peerchain::persistence::{Database, Persistence};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = load_config()?;
    let settings = config.settings();

    let store: Option<Arc<dyn Persistence>> = match config.database_path() {
        Some(path) => Some(Arc::new(Database::open(path)?)),
        None => None,
    };

    let restored = match &store {
        Some(db) => db.load_chain()?,
        None => None,
    };
    let mainnet = match restored {
        Some(snapshot) => {
            info!(length = snapshot.length, peer = %snapshot.current_mainnet_peer_name, "Restored chain");
            Mainnet::from_snapshot(snapshot, settings)?
        }
        None => {
            let peers = config.consensus.peers.clone();
            tokio::task::spawn_blocking(move || Mainnet::new(peers, settings)).await??
        }
    };

    let mut node = Node::new(mainnet);
    if let Some(store) = store {
        node = node.with_persistence(store);
    }

    run_api_server(Arc::new(node), config.api.port).await
}
