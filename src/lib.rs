pub mod api;
pub mod codec;
pub mod config;
pub mod datasource;
pub mod domain;
pub mod engine;
pub mod error;

pub use config::{Config, Network, NetworkEndpoints};
pub use datasource::{ChainRpc, DataSourceError, IndexerApi};
pub use domain::{
    Direction, LifecycleState, MarketInfo, OpenPosition, PnlSource, Trade, TradeId, VaultPosition,
};
pub use engine::{PriceContext, VolumeCache};
pub use error::AppError;
