mod execution_loop;
mod filters;
mod governor;
mod order_manager;
mod signal_router;

pub use execution_loop::{EngineConfig, ExecutionLoop, SignalContext};
pub use filters::{FilterConfig, FilterVerdict, MarketFilters};
pub use governor::{Governor, GovernorConfig, GovernorDecision};
pub use order_manager::{OrderManager, OrderManagerConfig};
pub use signal_router::{RouteDecision, SignalRouter};
