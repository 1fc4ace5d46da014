use std::collections::HashMap;
use std::sync::Arc;

use axum::http::StatusCode;
use perpscope::api::{self, AppState, SourceSet};
use perpscope::config::{Config, Network, NetworkEndpoints};
use perpscope::datasource::{IndexedTrade, MockChainRpc, MockIndexer};
use perpscope::engine::VolumeCache;
use tower::util::ServiceExt;

const TRADER: &str = "0x6b175474e89094c44da98b954eedeac495271d0f";

fn setup_app(indexer: MockIndexer) -> axum::Router {
    let mut networks = HashMap::new();
    networks.insert(
        Network::Mainnet,
        NetworkEndpoints {
            rpc_url: "http://rpc.invalid".to_string(),
            graphql_url: "http://indexer.invalid".to_string(),
            protocol_address: "0x0000000000000000000000000000000000000abc".to_string(),
            explorer_url: String::new(),
        },
    );
    let config = Config {
        port: 0,
        networks,
        bech32_prefix: "pp".to_string(),
        stable_symbol: "USDC".to_string(),
        lookback_blocks: 1_000,
        vault_apy: 0.10,
        volume_refresh_secs: 3_600,
        global_history_limit: 100,
    };

    let mut sources = HashMap::new();
    sources.insert(
        Network::Mainnet,
        SourceSet {
            rpc: Arc::new(MockChainRpc::new(10)),
            indexer: Arc::new(indexer),
            endpoints: config.endpoints(Network::Mainnet).unwrap().clone(),
        },
    );
    let volume_cache = Arc::new(VolumeCache::new(config.global_history_limit));
    api::create_router(AppState::new(config, sources, volume_cache))
}

async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = axum::http::Request::builder()
        .method("GET")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

fn open_trade(id: i64) -> IndexedTrade {
    IndexedTrade {
        id,
        market_symbol: Some("ATOM/USD".to_string()),
        leverage: Some(5.0),
        long: Some(true),
        collateral_raw: Some("100000000".to_string()),
        collateral_token: Some("USDC".to_string()),
        open_price: Some(8.0),
        is_open: true,
        stop_loss: Some(7.0),
        take_profit: Some(10.0),
        liquidation_price: Some(6.6),
        unrealized_pnl_pct: Some(0.10),
        opened_at: chrono::DateTime::from_timestamp(1_740_000_000, 0),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_positions_projection() {
    let mut closed = open_trade(2);
    closed.is_open = false;
    let indexer = MockIndexer::new()
        .with_trade(open_trade(1))
        .with_trade(closed);
    let app = setup_app(indexer);

    let (status, body) = get_json(
        app,
        &format!("/positions?address={}&network=mainnet", TRADER),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalPositions"], 1);
    assert_eq!(body["totalUnrealizedPnl"], 10.0);

    let position = &body["positions"][0];
    assert_eq!(position["id"], 1);
    assert_eq!(position["pair"], "ATOM/USD");
    assert_eq!(position["direction"], "long");
    assert_eq!(position["entryPrice"], 8.0);
    // +10% at 5x leverage on a long: entry * 1.02.
    let mark_price = position["markPrice"].as_f64().unwrap();
    assert!((mark_price - 8.16).abs() < 1e-9);
    assert_eq!(position["liquidationPrice"], 6.6);
    assert_eq!(position["stopLoss"], 7.0);
    assert_eq!(position["takeProfit"], 10.0);
}

#[tokio::test]
async fn test_positions_empty() {
    let app = setup_app(MockIndexer::new());
    let (status, body) = get_json(
        app,
        &format!("/positions?address={}&network=mainnet", TRADER),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalPositions"], 0);
    assert_eq!(body["totalUnrealizedPnl"], 0.0);
}

#[tokio::test]
async fn test_positions_indexer_down_is_bad_gateway() {
    let app = setup_app(MockIndexer::offline());
    let (status, _) = get_json(
        app,
        &format!("/positions?address={}&network=mainnet", TRADER),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_positions_invalid_address() {
    let app = setup_app(MockIndexer::new());
    let (status, _) = get_json(app, "/positions?address=0x123&network=mainnet").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
