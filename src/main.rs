use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use perpscope::api::{self, AppState, SourceSet};
use perpscope::config::Config;
use perpscope::datasource::{GraphqlIndexer, HttpRpcClient};
use perpscope::engine::VolumeCache;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let port = config.port;

    // Wire one source set per configured network
    let mut sources = HashMap::new();
    for (network, endpoints) in &config.networks {
        sources.insert(
            *network,
            SourceSet {
                rpc: Arc::new(HttpRpcClient::new(endpoints.rpc_url.clone())),
                indexer: Arc::new(GraphqlIndexer::new(endpoints.graphql_url.clone())),
                endpoints: endpoints.clone(),
            },
        );
    }

    let volume_cache = Arc::new(VolumeCache::new(config.global_history_limit));

    // Refresh the volume aggregate at startup and on a long interval,
    // serving stale values in between.
    {
        let cache = volume_cache.clone();
        let sources = sources.clone();
        let refresh_secs = config.volume_refresh_secs;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(refresh_secs.max(60)));
            loop {
                interval.tick().await;
                for (network, source) in &sources {
                    if let Err(e) = cache.refresh(*network, source.indexer.as_ref()).await {
                        tracing::warn!(network = %network, error = %e, "volume refresh failed");
                    }
                }
            }
        });
    }

    // Create router
    let app = api::create_router(AppState::new(config, sources, volume_cache));

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on {}", addr);

    // Run server
    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}
