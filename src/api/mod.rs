pub mod health;
pub mod positions;
pub mod stats;
pub mod trades;
pub mod vault;

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::LazyLock;

use axum::{routing::get, Router};
use regex::Regex;
use tower_http::cors::{Any, CorsLayer};

use crate::config::{Config, Network, NetworkEndpoints};
use crate::datasource::{ChainRpc, IndexerApi};
use crate::engine::VolumeCache;
use crate::error::AppError;

/// The upstream pair serving one network.
#[derive(Clone)]
pub struct SourceSet {
    pub rpc: Arc<dyn ChainRpc>,
    pub indexer: Arc<dyn IndexerApi>,
    pub endpoints: NetworkEndpoints,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub sources: Arc<HashMap<Network, SourceSet>>,
    pub volume_cache: Arc<VolumeCache>,
}

impl AppState {
    pub fn new(
        config: Config,
        sources: HashMap<Network, SourceSet>,
        volume_cache: Arc<VolumeCache>,
    ) -> Self {
        Self {
            config,
            sources: Arc::new(sources),
            volume_cache,
        }
    }

    pub fn source(&self, network: Network) -> Result<&SourceSet, AppError> {
        self.sources
            .get(&network)
            .ok_or_else(|| AppError::BadRequest(format!("Network {} is not configured", network)))
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/trades", get(trades::get_trades))
        .route("/positions", get(positions::get_positions))
        .route("/vault-positions", get(vault::get_vault_positions))
        .route("/stats", get(stats::get_stats))
        .layer(cors)
        .with_state(state)
}

static HEX_ADDRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("address regex is valid"));

/// Format gate at the API boundary: a 20-byte 0x-prefixed hex address.
/// Validated before any upstream call is issued.
pub(crate) fn validate_address(raw: &str) -> Result<&str, AppError> {
    if HEX_ADDRESS_RE.is_match(raw) {
        Ok(raw)
    } else {
        Err(AppError::BadRequest("Invalid address".to_string()))
    }
}

pub(crate) fn parse_network(raw: &str) -> Result<Network, AppError> {
    Network::from_str(raw)
        .map_err(|_| AppError::BadRequest("Network must be mainnet or testnet".to_string()))
}
