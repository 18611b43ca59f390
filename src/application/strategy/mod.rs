mod volatility_breakout;

pub use volatility_breakout::{StrategyConfig, TpMode, VolatilityBreakoutStrategy};
