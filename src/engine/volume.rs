//! Process-wide cache for the protocol-wide volume aggregate.
//!
//! The aggregate is computed from the global (all-trader) change-log, which
//! is far too expensive to pull per request. One entry per network,
//! refreshed at startup and on a long fixed interval; reads serve whatever
//! is cached (stale included) and a single-flight guard keeps at most one
//! recomputation per network in flight.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::config::Network;
use crate::datasource::{DataSourceError, IndexerApi};
use crate::engine::stats::notional_volume;

/// Cached aggregate with its refresh instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshot {
    pub volume_usd: f64,
    pub last_refreshed: DateTime<Utc>,
}

/// Injected cache object; the one piece of process-wide mutable state.
#[derive(Debug)]
pub struct VolumeCache {
    entries: RwLock<HashMap<Network, VolumeSnapshot>>,
    refresh_guards: HashMap<Network, Mutex<()>>,
    history_limit: i64,
}

impl VolumeCache {
    pub fn new(history_limit: i64) -> Self {
        let refresh_guards = Network::ALL
            .iter()
            .map(|network| (*network, Mutex::new(())))
            .collect();
        Self {
            entries: RwLock::new(HashMap::new()),
            refresh_guards,
            history_limit,
        }
    }

    /// Current snapshot, however stale.
    pub async fn get(&self, network: Network) -> Option<VolumeSnapshot> {
        self.entries.read().await.get(&network).copied()
    }

    /// Current snapshot, refreshing first only if nothing is cached yet.
    pub async fn get_or_refresh(
        &self,
        network: Network,
        indexer: &dyn IndexerApi,
    ) -> Option<VolumeSnapshot> {
        if let Some(snapshot) = self.get(network).await {
            return Some(snapshot);
        }
        match self.refresh(network, indexer).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(%network, error = %e, "volume refresh failed");
                None
            }
        }
    }

    /// Recompute the aggregate for one network. Serialized per network:
    /// a caller that arrives while a refresh is in flight waits for it and
    /// reuses its result instead of recomputing.
    pub async fn refresh(
        &self,
        network: Network,
        indexer: &dyn IndexerApi,
    ) -> Result<VolumeSnapshot, DataSourceError> {
        let requested_at = Utc::now();
        let guard = self
            .refresh_guards
            .get(&network)
            .expect("every network has a refresh guard");
        let _in_flight = guard.lock().await;

        if let Some(snapshot) = self.get(network).await {
            if snapshot.last_refreshed >= requested_at {
                return Ok(snapshot);
            }
        }

        let actions = indexer.fetch_global_history(self.history_limit).await?;
        let snapshot = VolumeSnapshot {
            volume_usd: notional_volume(&actions),
            last_refreshed: Utc::now(),
        };
        self.entries.write().await.insert(network, snapshot);
        info!(%network, volume_usd = snapshot.volume_usd, "volume aggregate refreshed");
        Ok(snapshot)
    }
}
