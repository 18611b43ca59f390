mod manager;
mod sizing;

pub use manager::{RiskConfig, RiskManager, VaState};
pub use sizing::{MarketConstraints, SizeCalculator};
