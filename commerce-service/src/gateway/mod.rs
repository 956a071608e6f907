//! Payment gateway adapters.
//!
//! `GatewayAdapter` is the closed set of adapter kinds the orchestrator
//! dispatches on: card/UPI processors, the customer wallet, and cash on
//! delivery. Adapters hold credentials and clients only; transaction state
//! belongs to the orchestrator.

pub mod card;
pub mod local;
pub mod razorpay;
pub mod signature;
pub mod stripe;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::errors::{CommerceError, CommerceResult};
use crate::models::Gateway;
use crate::wallet::WalletLedger;

pub use card::CardGateway;
pub use local::{CodGateway, WalletGateway};

/// What a gateway needs to open a payment.
#[derive(Debug, Clone)]
pub struct IntentRequest<'a> {
    pub transaction_id: Uuid,
    pub order_id: &'a str,
    pub user_id: &'a str,
    pub amount: Decimal,
    pub currency: &'a str,
    pub metadata: &'a Value,
}

/// A gateway-side payment intent.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    /// Absent for gateways with no external counterpart.
    pub gateway_order_id: Option<String>,
    pub details: Value,
}

#[derive(Debug, Clone)]
pub struct RefundCall<'a> {
    pub gateway_order_id: Option<&'a str>,
    pub gateway_transaction_id: Option<&'a str>,
    pub amount: Decimal,
    pub currency: &'a str,
    pub idempotency_key: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefundResult {
    pub refund_id: Option<String>,
    pub details: Value,
}

/// Gateway view of a payment, as returned by a status poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentStatus {
    Paid { gateway_transaction_id: String },
    Failed { reason: String },
    Pending,
}

/// A card/UPI processor API (Razorpay, Stripe).
#[async_trait]
pub trait CardProcessor: Send + Sync {
    fn gateway(&self) -> Gateway;

    /// Opens a gateway order and returns its id. `amount_minor` is in the
    /// currency's smallest unit.
    async fn create_order(&self, request: &IntentRequest<'_>, amount_minor: i64) -> CommerceResult<Intent>;

    async fn refund(&self, call: &RefundCall<'_>, amount_minor: i64) -> CommerceResult<RefundResult>;

    async fn fetch_status(&self, gateway_order_id: &str) -> CommerceResult<PaymentStatus>;

    fn verify_signature(&self, payload: &[u8], signature: &str) -> bool;
}

/// The adapter kinds. Adding one is a compile error at every dispatch site
/// until it is handled.
#[derive(Clone)]
pub enum GatewayAdapter {
    CardOrUpi(CardGateway),
    Wallet(WalletGateway),
    CashOnDelivery(CodGateway),
}

impl GatewayAdapter {
    pub async fn create_intent(&self, request: &IntentRequest<'_>) -> CommerceResult<Intent> {
        match self {
            GatewayAdapter::CardOrUpi(card) => card.create_intent(request).await,
            GatewayAdapter::Wallet(wallet) => wallet.create_intent(request).await,
            GatewayAdapter::CashOnDelivery(cod) => Ok(cod.create_intent(request)),
        }
    }

    pub fn verify_signature(&self, payload: &[u8], signature: &str) -> bool {
        match self {
            GatewayAdapter::CardOrUpi(card) => card.verify_signature(payload, signature),
            GatewayAdapter::Wallet(_) | GatewayAdapter::CashOnDelivery(_) => false,
        }
    }

    pub async fn refund(&self, call: &RefundCall<'_>) -> CommerceResult<RefundResult> {
        match self {
            GatewayAdapter::CardOrUpi(card) => card.refund(call).await,
            GatewayAdapter::Wallet(_) | GatewayAdapter::CashOnDelivery(_) => Ok(local::local_refund(call)),
        }
    }

    pub async fn fetch_status(&self, gateway_order_id: &str) -> CommerceResult<PaymentStatus> {
        match self {
            GatewayAdapter::CardOrUpi(card) => card.fetch_status(gateway_order_id).await,
            GatewayAdapter::Wallet(_) | GatewayAdapter::CashOnDelivery(_) => Ok(PaymentStatus::Pending),
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self, GatewayAdapter::CardOrUpi(_))
    }
}

/// Adapter lookup by persisted gateway tag.
#[derive(Clone)]
pub struct Gateways {
    cards: HashMap<Gateway, CardGateway>,
    wallet: WalletGateway,
    cod: CodGateway,
}

impl Gateways {
    pub fn new(wallet: WalletLedger) -> Self {
        Self {
            cards: HashMap::new(),
            wallet: WalletGateway::new(wallet),
            cod: CodGateway,
        }
    }

    pub fn with_card(mut self, processor: Arc<dyn CardProcessor>) -> Self {
        let gateway = processor.gateway();
        self.cards.insert(gateway, CardGateway::new(processor));
        self
    }

    pub fn adapter(&self, gateway: Gateway) -> CommerceResult<GatewayAdapter> {
        match gateway {
            Gateway::Razorpay | Gateway::Stripe => self
                .cards
                .get(&gateway)
                .cloned()
                .map(GatewayAdapter::CardOrUpi)
                .ok_or(CommerceError::GatewayNotConfigured(gateway)),
            Gateway::Wallet => Ok(GatewayAdapter::Wallet(self.wallet.clone())),
            Gateway::Cod => Ok(GatewayAdapter::CashOnDelivery(self.cod.clone())),
        }
    }
}

/// Runs a gateway call under `limit`. Expiry becomes `GatewayTimeout`.
pub async fn bounded<T, F>(gateway: Gateway, operation: &'static str, limit: Duration, call: F) -> CommerceResult<T>
where
    F: Future<Output = CommerceResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(gateway = %gateway, operation, timeout_ms = limit.as_millis() as u64, "Gateway call timed out");
            Err(CommerceError::GatewayTimeout { gateway, operation })
        }
    }
}

/// Amount in minor units (paise, cents), rounded half-even.
pub fn to_minor_units(amount: Decimal) -> CommerceResult<i64> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven)
        .to_i64()
        .ok_or_else(|| CommerceError::Validation(format!("Amount out of range: {}", amount)))
}
