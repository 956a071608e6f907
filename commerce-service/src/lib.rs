//! Transactional commerce core: stock reservation, payment settlement across
//! gateways, and the customer wallet ledger.

pub mod config;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod inventory;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod location;
pub mod memory;
pub mod models;
pub mod orchestrator;
pub mod orders;
pub mod repository;
pub mod store;
pub mod wallet;
pub mod webhook;

use axum::{
    routing::{get, patch, post, put},
    Router,
};

use crate::handlers::AppState;

/// All HTTP routes, without middleware.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        // Inventory
        .route("/inventory", get(handlers::list_stock).post(handlers::assign_stock))
        .route("/inventory/reserve", post(handlers::reserve_stock))
        .route("/inventory/release", post(handlers::release_stock))
        .route("/inventory/fulfill", post(handlers::fulfill_stock))
        .route("/inventory/low-stock", get(handlers::low_stock))
        .route("/inventory/reorder-suggestions", get(handlers::reorder_suggestions))
        .route("/inventory/:variant_id/:location_id", get(handlers::get_stock))
        .route("/inventory/:variant_id/:location_id/restock", post(handlers::restock))
        .route("/inventory/:variant_id/:location_id/thresholds", put(handlers::update_thresholds))
        .route("/inventory/:variant_id/:location_id/availability", get(handlers::check_availability))
        // Wallet
        .route("/wallets", post(handlers::create_wallet))
        .route("/users/:user_id/wallet", get(handlers::get_wallet))
        .route("/users/:user_id/wallet/top-up", post(handlers::top_up_wallet))
        .route("/users/:user_id/wallet/history", get(handlers::wallet_history))
        // Transactions
        .route("/transactions/:transaction_id", get(handlers::get_transaction))
        .route("/users/:user_id/transactions", get(handlers::transaction_history))
        .route("/transactions/:transaction_id/confirm", post(handlers::confirm_transaction))
        .route("/transactions/:transaction_id/fail", post(handlers::fail_transaction))
        .route("/transactions/:transaction_id/retry", post(handlers::retry_transaction))
        .route("/transactions/:transaction_id/refund", post(handlers::refund_transaction))
        .route("/transactions/:transaction_id/verify-cod", post(handlers::verify_cod))
        .route("/transactions/:transaction_id/reconcile", post(handlers::reconcile_transaction))
        // Orders
        .route("/orders", post(handlers::place_order))
        .route("/orders/:order_id", get(handlers::get_order))
        .route("/users/:user_id/orders", get(handlers::list_orders))
        .route("/orders/:order_id/status", patch(handlers::update_order_status))
        .route("/orders/:order_id/cancel", post(handlers::cancel_order))
        // Webhooks
        .route("/webhooks/razorpay", post(handlers::razorpay_webhook))
        .route("/webhooks/stripe", post(handlers::stripe_webhook))
        .with_state(state)
}
