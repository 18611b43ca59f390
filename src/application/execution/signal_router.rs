use crate::domain::repositories::TradeStore;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq)]
pub enum RouteDecision {
    Accept,
    Reject { claimed_symbol: String },
}

impl RouteDecision {
    pub fn is_accept(&self) -> bool {
        matches!(self, RouteDecision::Accept)
    }
}

/// One-symbol-per-VA gate. Claims live in memory and are lazily seeded from
/// stored positions, so a restart mid-position keeps routing honest.
pub struct SignalRouter {
    store: Arc<dyn TradeStore>,
    claims: RwLock<HashMap<String, String>>,
}

impl SignalRouter {
    pub fn new(store: Arc<dyn TradeStore>) -> Self {
        Self {
            store,
            claims: RwLock::new(HashMap::new()),
        }
    }

    pub async fn can_trade_symbol(&self, va_id: &str, symbol: &str) -> Result<RouteDecision> {
        let mut claims = self.claims.write().await;

        let current = match claims.get(va_id) {
            Some(symbol) => Some(symbol.clone()),
            None => {
                let positions = self.store.positions(Some(va_id)).await?;
                let seeded = positions.first().map(|p| p.symbol.clone());
                if let Some(ref symbol) = seeded {
                    claims.insert(va_id.to_string(), symbol.clone());
                }
                seeded
            }
        };

        match current {
            None => {
                claims.insert(va_id.to_string(), symbol.to_string());
                Ok(RouteDecision::Accept)
            }
            Some(claimed) if claimed == symbol => Ok(RouteDecision::Accept),
            Some(claimed) => Ok(RouteDecision::Reject {
                claimed_symbol: claimed,
            }),
        }
    }

    pub async fn release_symbol(&self, va_id: &str) {
        self.claims.write().await.remove(va_id);
    }

    pub async fn active_symbol(&self, va_id: &str) -> Option<String> {
        self.claims.read().await.get(va_id).cloned()
    }
}
