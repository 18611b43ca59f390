//! Reconciler scenarios: stop-loss repair, panic-close, and divergence
//! incidents against a seeded simulated exchange.

use chrono::Utc;
use silotrade::application::reconciliation::Reconciler;
use silotrade::application::risk::{RiskConfig, RiskManager};
use silotrade::domain::account::{IncidentType, Severity};
use silotrade::domain::exchange::ExchangePosition;
use silotrade::domain::ports::ExchangeClient;
use silotrade::domain::repositories::TradeStore;
use silotrade::domain::types::{EntryType, Order, OrderStatus, Side};
use silotrade::infrastructure::memory::MemoryStore;
use silotrade::infrastructure::sim::SimulatedExchange;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

fn exchange_position(symbol: &str, side: Side, qty: f64, sl: Option<f64>) -> ExchangePosition {
    ExchangePosition {
        symbol: symbol.to_string(),
        side,
        qty,
        avg_entry_price: 100.0,
        mark_price: 100.0,
        unrealized_pnl: 0.0,
        leverage: 3.0,
        stop_loss_price: sl,
        take_profit_price: None,
    }
}

fn entry_order(symbol: &str, exchange_order_id: &str, price: f64) -> Order {
    let now = Utc::now();
    Order {
        id: Uuid::new_v4().to_string(),
        va_id: "VA001".to_string(),
        symbol: symbol.to_string(),
        side: Side::Buy,
        order_type: EntryType::Market,
        qty: 1.0,
        price,
        reduce_only: false,
        client_order_id: format!("ORD-VA001-{}", now.timestamp_millis()),
        exchange_order_id: Some(exchange_order_id.to_string()),
        status: OrderStatus::Filled,
        filled_qty: 1.0,
        stop_loss_price: None,
        sl_order_id: None,
        tp_order_id: None,
        created_at: now,
        updated_at: now,
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    exchange: Arc<SimulatedExchange>,
    risk: Arc<RwLock<RiskManager>>,
    reconciler: Reconciler,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let exchange = Arc::new(SimulatedExchange::new());
    let mut risk = RiskManager::new(RiskConfig::default(), 100_000.0);
    risk.register_va("VA001", 1000.0);
    let risk = Arc::new(RwLock::new(risk));

    let store_dyn: Arc<dyn TradeStore> = store.clone();
    let reconciler = Reconciler::new(exchange.clone(), store_dyn, risk.clone());
    Harness {
        store,
        exchange,
        risk,
        reconciler,
    }
}

#[tokio::test]
async fn missing_stop_is_repaired_from_the_entry_order() {
    let h = harness();
    h.risk
        .write()
        .await
        .record_position("VA001", "BTCUSDT", 1.0, 100.0);

    let order = entry_order("BTCUSDT", "X-1", 100.0);
    h.store.create_order(&order).await.unwrap();
    h.exchange
        .seed_position(exchange_position("BTCUSDT", Side::Buy, 1.0, None))
        .await;

    h.reconciler.reconcile_positions(Utc::now()).await.unwrap();

    // The stop was attached 2% below entry and no position was closed.
    let positions = h.exchange.get_positions().await.unwrap();
    assert_eq!(positions[0].stop_loss_price, Some(98.0));
    assert!(h.exchange.panic_close_calls().await.is_empty());

    // The repair is recorded on the local entry order.
    let repaired = h.store.get_order(&order.id).await.unwrap().unwrap();
    assert_eq!(repaired.stop_loss_price, Some(98.0));
}

#[tokio::test]
async fn panic_close_when_no_entry_order_exists() {
    let h = harness();
    h.risk
        .write()
        .await
        .record_position("VA001", "BTCUSDT", 1.0, 100.0);

    // Exchange holds a bare long with no stop; there is no local entry
    // order and nothing open on the exchange to amend.
    h.exchange
        .seed_position(exchange_position("BTCUSDT", Side::Buy, 1.0, None))
        .await;

    h.reconciler.reconcile_positions(Utc::now()).await.unwrap();

    let closes = h.exchange.panic_close_calls().await;
    assert_eq!(closes.len(), 1);
    // Closing a BUY position means a reduce-only SELL for the full size.
    assert_eq!(closes[0].side, Side::Sell);
    assert!(closes[0].reduce_only);
    assert!((closes[0].qty - 1.0).abs() < 1e-9);

    let incidents = h.store.recent_incidents(10).await.unwrap();
    let panic = incidents
        .iter()
        .find(|i| i.incident_type == IncidentType::PanicClose)
        .expect("panic_close incident must be recorded");
    assert_eq!(panic.order_id.as_deref(), Some(closes[0].order_id.as_str()));
    assert_eq!(panic.symbol.as_deref(), Some("BTCUSDT"));
    assert_eq!(panic.va_id.as_deref(), Some("VA001"));
}

#[tokio::test]
async fn attach_refusal_escalates_to_panic_close() {
    let h = harness();
    h.risk
        .write()
        .await
        .record_position("VA001", "ETHUSDT", -2.0, 100.0);

    h.store
        .create_order(&entry_order("ETHUSDT", "X-2", 100.0))
        .await
        .unwrap();
    h.exchange
        .seed_position(exchange_position("ETHUSDT", Side::Sell, 2.0, None))
        .await;
    h.exchange.set_attach_fails(true);

    h.reconciler.reconcile_positions(Utc::now()).await.unwrap();

    let closes = h.exchange.panic_close_calls().await;
    assert_eq!(closes.len(), 1);
    // Closing a SELL position buys it back.
    assert_eq!(closes[0].side, Side::Buy);
    assert!((closes[0].qty - 2.0).abs() < 1e-9);
}

#[tokio::test]
async fn failed_panic_close_files_a_critical_incident() {
    let h = harness();
    h.risk
        .write()
        .await
        .record_position("VA001", "BTCUSDT", 1.0, 100.0);

    h.exchange
        .seed_position(exchange_position("BTCUSDT", Side::Buy, 1.0, None))
        .await;
    h.exchange.set_panic_close_fails(true);

    h.reconciler.reconcile_positions(Utc::now()).await.unwrap();

    let incidents = h.store.recent_incidents(10).await.unwrap();
    let failure = incidents
        .iter()
        .find(|i| i.incident_type == IncidentType::PanicCloseFailed)
        .expect("panic_close_failed incident must be recorded");
    assert_eq!(failure.severity, Severity::Critical);
    assert!(failure.metadata.get("error").is_some());
}

#[tokio::test]
async fn unowned_exchange_position_raises_divergence() {
    let h = harness();

    // No silo owns DOGEUSDT locally; the position carries a stop, so the
    // only finding is the divergence itself.
    h.exchange
        .seed_position(exchange_position("DOGEUSDT", Side::Buy, 5.0, Some(95.0)))
        .await;

    h.reconciler.reconcile_positions(Utc::now()).await.unwrap();

    let incidents = h.store.recent_incidents(10).await.unwrap();
    let divergence = incidents
        .iter()
        .find(|i| i.incident_type == IncidentType::ReconcileDivergence)
        .expect("divergence incident must be recorded");
    assert_eq!(divergence.symbol.as_deref(), Some("DOGEUSDT"));
    assert!(h.exchange.panic_close_calls().await.is_empty());
}

#[tokio::test]
async fn exchange_order_state_overwrites_local_rows() {
    let h = harness();

    let mut order = entry_order("BTCUSDT", "X-9", 100.0);
    order.status = OrderStatus::Submitted;
    order.filled_qty = 0.0;
    h.store.create_order(&order).await.unwrap();

    let mut xo = silotrade::domain::exchange::ExchangeOrder {
        order_id: "X-9".to_string(),
        client_order_id: order.client_order_id.clone(),
        symbol: "BTCUSDT".to_string(),
        side: Side::Buy,
        order_type: "Market".to_string(),
        price: 100.0,
        qty: 1.0,
        reduce_only: false,
        status: "PartiallyFilled".to_string(),
        filled_qty: 0.4,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    h.exchange.seed_open_order(xo.clone()).await;

    h.reconciler.reconcile_orders().await.unwrap();
    let local = h.store.get_order(&order.id).await.unwrap().unwrap();
    assert_eq!(local.status, OrderStatus::PartialFill);
    assert!((local.filled_qty - 0.4).abs() < 1e-9);

    // A later pass with more progress keeps moving the row forward.
    xo.status = "Filled".to_string();
    xo.filled_qty = 1.0;
    h.exchange.cancel_order("BTCUSDT", "X-9").await.unwrap();
    h.exchange.seed_open_order(xo).await;

    h.reconciler.reconcile_orders().await.unwrap();
    let local = h.store.get_order(&order.id).await.unwrap().unwrap();
    assert_eq!(local.status, OrderStatus::Filled);
}
