pub mod default_universe;
pub mod dual_sma;
pub mod zscore_mean_reversion;

pub use default_universe::StaticUniverseBuilder;
pub use dual_sma::DualSmaStrategy;
pub use zscore_mean_reversion::ZScoreMeanReversionStrategy;
