//! Pure computation core: normalization, fee resolution, reconciliation,
//! and aggregates.

pub mod fees;
pub mod normalize;
pub mod reconcile;
pub mod stats;
pub mod volume;

pub use fees::{resolve_fees, FeeComponents, FeeLookup, FEE_BATCH_SIZE, FEE_FETCH_TIMEOUT};
pub use normalize::{raw_to_units, PriceContext, PAIR_INFERENCE_MAX_RATIO};
pub use reconcile::{reconcile, AdapterOutputs};
pub use stats::{compute_stats, notional_volume, TradeStats};
pub use volume::{VolumeCache, VolumeSnapshot};
