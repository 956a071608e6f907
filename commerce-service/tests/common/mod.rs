//! Shared fixtures: every service wired over an in-memory store, plus a
//! scripted card processor.

#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use commerce_service::config::{PaymentSettings, PricingSettings, WalletSettings};
use commerce_service::errors::{CommerceError, CommerceResult};
use commerce_service::events::Notifier;
use commerce_service::gateway::signature::{razorpay_signature, verify_razorpay};
use commerce_service::gateway::{
    CardProcessor, Gateways, Intent, IntentRequest, PaymentStatus, RefundCall, RefundResult,
};
use commerce_service::inventory::InventoryLedger;
use commerce_service::location::FixedLocationResolver;
use commerce_service::memory::MemoryStore;
use commerce_service::models::{
    Coordinates, Gateway, OrderItem, PaymentMethod, StockKey, StockThresholds,
};
use commerce_service::orchestrator::{PaymentRequest, TransactionOrchestrator};
use commerce_service::orders::{OrderService, PlaceOrder};
use commerce_service::wallet::WalletLedger;
use commerce_service::webhook::WebhookReconciler;

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const LOCATION: &str = "blr-dark-store-1";

/// Card processor whose answers are set by the test.
#[derive(Default)]
pub struct MockProcessor {
    orders_created: AtomicUsize,
    refunds: Mutex<Vec<(String, i64)>>,
    create_delay_ms: AtomicU64,
    fail_create: AtomicBool,
    fail_refund: AtomicBool,
    status: Mutex<Option<PaymentStatus>>,
}

impl MockProcessor {
    pub fn delay_create(&self, delay: Duration) {
        self.create_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_refund(&self, fail: bool) {
        self.fail_refund.store(fail, Ordering::SeqCst);
    }

    pub fn report_status(&self, status: PaymentStatus) {
        *self.status.lock().unwrap() = Some(status);
    }

    pub fn orders_created(&self) -> usize {
        self.orders_created.load(Ordering::SeqCst)
    }

    /// `(idempotency key, amount in minor units)` per refund call.
    pub fn refunds(&self) -> Vec<(String, i64)> {
        self.refunds.lock().unwrap().clone()
    }
}

#[async_trait]
impl CardProcessor for MockProcessor {
    fn gateway(&self) -> Gateway {
        Gateway::Razorpay
    }

    async fn create_order(&self, request: &IntentRequest<'_>, amount_minor: i64) -> CommerceResult<Intent> {
        let delay = self.create_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(CommerceError::Gateway {
                gateway: Gateway::Razorpay,
                message: "card network unavailable".to_string(),
                retryable: true,
            });
        }
        let n = self.orders_created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Intent {
            gateway_order_id: Some(format!("order_mock_{}", n)),
            details: json!({
                "amount": amount_minor,
                "notes": { "transaction_id": request.transaction_id.to_string() },
            }),
        })
    }

    async fn refund(&self, call: &RefundCall<'_>, amount_minor: i64) -> CommerceResult<RefundResult> {
        if self.fail_refund.load(Ordering::SeqCst) {
            return Err(CommerceError::Gateway {
                gateway: Gateway::Razorpay,
                message: "refund rejected".to_string(),
                retryable: false,
            });
        }
        let mut refunds = self.refunds.lock().unwrap();
        refunds.push((call.idempotency_key.to_string(), amount_minor));
        Ok(RefundResult {
            refund_id: Some(format!("rfnd_mock_{}", refunds.len())),
            details: json!({ "amount": amount_minor }),
        })
    }

    async fn fetch_status(&self, _gateway_order_id: &str) -> CommerceResult<PaymentStatus> {
        Ok(self.status.lock().unwrap().clone().unwrap_or(PaymentStatus::Pending))
    }

    fn verify_signature(&self, payload: &[u8], signature: &str) -> bool {
        verify_razorpay(WEBHOOK_SECRET, payload, signature)
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub inventory: InventoryLedger,
    pub wallet: WalletLedger,
    pub payments: TransactionOrchestrator,
    pub orders: OrderService,
    pub webhooks: WebhookReconciler,
    pub processor: Arc<MockProcessor>,
}

pub fn harness() -> Harness {
    harness_with(PaymentSettings {
        gateway_timeout: Duration::from_millis(200),
        ..PaymentSettings::default()
    })
}

pub fn harness_with(settings: PaymentSettings) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let notifier = Notifier::log_only();
    let processor = Arc::new(MockProcessor::default());

    let inventory = InventoryLedger::new(store.clone(), notifier.clone());
    let wallet = WalletLedger::new(
        store.clone(),
        notifier.clone(),
        settings.currency.clone(),
        WalletSettings::default(),
    );
    let gateways = Gateways::new(wallet.clone()).with_card(processor.clone());
    let payments = TransactionOrchestrator::new(
        store.clone(),
        wallet.clone(),
        gateways,
        notifier.clone(),
        settings,
    );
    let orders = OrderService::new(
        store.clone(),
        inventory.clone(),
        payments.clone(),
        Arc::new(FixedLocationResolver::new(LOCATION)),
        notifier,
        PricingSettings::default(),
    );
    let webhooks = WebhookReconciler::new(orders.clone(), payments.clone());

    Harness {
        store,
        inventory,
        wallet,
        payments,
        orders,
        webhooks,
        processor,
    }
}

impl Harness {
    pub async fn stock(&self, variant_id: &str, on_hand: i64) -> StockKey {
        let key = StockKey::new(variant_id, LOCATION);
        self.inventory
            .assign(&key, on_hand, StockThresholds::default())
            .await
            .expect("assign stock");
        key
    }

    /// Creates the wallet and tops it up with `amount` (skipped when zero).
    pub async fn funded_wallet(&self, user_id: &str, amount: Decimal) {
        self.wallet.create_wallet(user_id).await.expect("create wallet");
        if amount > Decimal::ZERO {
            self.wallet
                .credit(user_id, amount, "Opening balance", &format!("seed:{}", user_id))
                .await
                .expect("seed wallet");
        }
    }

    pub fn payment(&self, user_id: &str, amount: Decimal, gateway: Gateway) -> PaymentRequest {
        PaymentRequest {
            user_id: user_id.to_string(),
            order_id: format!("ORD-{}", uuid::Uuid::new_v4().simple()),
            amount,
            payment_method: method_for(gateway),
            gateway,
            cashback: Decimal::ZERO,
            metadata: Value::Null,
        }
    }
}

pub fn method_for(gateway: Gateway) -> PaymentMethod {
    match gateway {
        Gateway::Razorpay | Gateway::Stripe => PaymentMethod::Card,
        Gateway::Wallet => PaymentMethod::Wallet,
        Gateway::Cod => PaymentMethod::Cod,
    }
}

pub fn item(variant_id: &str, price: Decimal, quantity: i64) -> OrderItem {
    OrderItem {
        product_id: format!("prod-{}", variant_id),
        variant_id: variant_id.to_string(),
        name: format!("Item {}", variant_id),
        price,
        quantity,
    }
}

pub fn order_request(user_id: &str, items: Vec<OrderItem>, gateway: Gateway) -> PlaceOrder {
    PlaceOrder {
        user_id: user_id.to_string(),
        items,
        coordinates: Coordinates {
            latitude: 12.9716,
            longitude: 77.5946,
        },
        payment_method: method_for(gateway),
        gateway,
        discount: Decimal::ZERO,
        cashback: Decimal::ZERO,
        metadata: Value::Null,
    }
}

/// A signed Razorpay webhook body for `event` on a gateway order.
pub fn razorpay_event(event: &str, gateway_order_id: &str, payment_id: &str) -> (Vec<u8>, String) {
    let body = json!({
        "event": event,
        "payload": { "payment": { "entity": {
            "id": payment_id,
            "order_id": gateway_order_id,
            "error_description": if event == "payment.failed" { json!("Card declined") } else { Value::Null },
        }}}
    });
    let bytes = serde_json::to_vec(&body).unwrap();
    let signature = razorpay_signature(WEBHOOK_SECRET, &bytes);
    (bytes, signature)
}
