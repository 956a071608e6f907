use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::PricingSettings;
use crate::errors::{CommerceError, CommerceResult};
use crate::events::{CommerceEvent, Notifier};
use crate::inventory::InventoryLedger;
use crate::location::LocationResolver;
use crate::models::{
    page_window, CodVerificationStatus, Coordinates, Gateway, InventoryState, Order, OrderItem,
    OrderPaymentStatus, OrderStatus, Outcome, Page, PaymentMethod, Pricing, StatusChange, StockLine,
    Transaction, TransactionStatus,
};
use crate::orchestrator::{PaymentRequest, TransactionOrchestrator};
use crate::store::{OrderStore, MAX_WRITE_ATTEMPTS};

#[derive(Debug, Clone)]
pub struct PlaceOrder {
    pub user_id: String,
    pub items: Vec<OrderItem>,
    pub coordinates: Coordinates,
    pub payment_method: PaymentMethod,
    pub gateway: Gateway,
    pub discount: Decimal,
    pub cashback: Decimal,
    pub metadata: Value,
}

/// An accepted order and the payment attempt opened for it.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order: Order,
    pub transaction: Transaction,
}

fn money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Flat pricing: discount first, then surge and tax on the discounted
/// subtotal, plus the delivery fee.
pub fn price(items: &[OrderItem], discount: Decimal, settings: &PricingSettings) -> CommerceResult<Pricing> {
    let too_large = || CommerceError::Validation("Order total is too large".to_string());
    let mut subtotal = Decimal::ZERO;
    for item in items {
        let line = item
            .price
            .checked_mul(Decimal::from(item.quantity))
            .ok_or_else(too_large)?;
        subtotal = subtotal.checked_add(line).ok_or_else(too_large)?;
    }
    let subtotal = money(subtotal);
    if discount < Decimal::ZERO || discount > subtotal {
        return Err(CommerceError::Validation(format!(
            "Discount must be between 0 and the subtotal {}",
            subtotal
        )));
    }
    let discount = money(discount);
    let after_discount = subtotal - discount;
    let hundred = Decimal::ONE_HUNDRED;
    let percent_of = |rate: Decimal| {
        after_discount
            .checked_mul(rate)
            .and_then(|v| v.checked_div(hundred))
            .map(money)
            .ok_or_else(too_large)
    };
    let surge_fee = percent_of(settings.surge_percent)?;
    let tax = percent_of(settings.tax_percent)?;
    let delivery_fee = money(settings.delivery_fee);
    let total_amount = [delivery_fee, surge_fee, tax]
        .into_iter()
        .try_fold(after_discount, |total, part| total.checked_add(part))
        .ok_or_else(too_large)?;

    Ok(Pricing {
        subtotal,
        discount,
        delivery_fee,
        surge_fee,
        tax,
        total_amount,
    })
}

/// Largest quantity accepted on one order line.
pub const MAX_LINE_QUANTITY: i64 = 10_000;

fn new_order_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("ORD-{}", id[..8].to_uppercase())
}

fn validate(request: &PlaceOrder) -> CommerceResult<()> {
    if request.user_id.trim().is_empty() {
        return Err(CommerceError::Validation("user_id is required".to_string()));
    }
    if request.items.is_empty() {
        return Err(CommerceError::Validation(
            "Order must contain at least one item".to_string(),
        ));
    }
    for item in &request.items {
        if item.quantity <= 0 || item.quantity > MAX_LINE_QUANTITY {
            return Err(CommerceError::Validation(format!(
                "Quantity for {} must be between 1 and {}",
                item.variant_id, MAX_LINE_QUANTITY
            )));
        }
        if item.price < Decimal::ZERO {
            return Err(CommerceError::Validation(format!(
                "Price for {} cannot be negative",
                item.variant_id
            )));
        }
    }
    Ok(())
}

/// Order placement and the post-order lifecycle: ties stock holds to the
/// payment outcome and undoes both on cancellation.
#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn OrderStore>,
    inventory: InventoryLedger,
    payments: TransactionOrchestrator,
    resolver: Arc<dyn LocationResolver>,
    notifier: Notifier,
    pricing: PricingSettings,
}

impl OrderService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        inventory: InventoryLedger,
        payments: TransactionOrchestrator,
        resolver: Arc<dyn LocationResolver>,
        notifier: Notifier,
        pricing: PricingSettings,
    ) -> Self {
        Self {
            store,
            inventory,
            payments,
            resolver,
            notifier,
            pricing,
        }
    }

    pub async fn get_order(&self, order_id: &str) -> CommerceResult<Order> {
        self.store
            .find_order(order_id)
            .await?
            .ok_or_else(|| CommerceError::OrderNotFound(order_id.to_string()))
    }

    pub async fn list_orders(
        &self,
        user_id: &str,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> CommerceResult<Page<Order>> {
        let (limit, offset) = page_window(limit, offset);
        let (items, total) = self.store.list_orders(user_id, limit, offset).await?;
        Ok(Page::new(items, total, offset))
    }

    /// Resolves a location, reserves every line, then opens the payment.
    /// Nothing stays reserved if the order does not reach a payment attempt.
    pub async fn place_order(&self, request: PlaceOrder) -> CommerceResult<PlacedOrder> {
        validate(&request)?;

        let location_id = self
            .resolver
            .resolve(&request.coordinates, &request.items)
            .await?
            .ok_or(CommerceError::NoFulfillableLocation)?;
        let pricing = price(&request.items, request.discount, &self.pricing)?;

        let now = Utc::now();
        let order = Order {
            order_id: new_order_id(),
            user_id: request.user_id.clone(),
            location_id,
            items: request.items,
            pricing,
            payment_method: request.payment_method,
            gateway: request.gateway,
            status: OrderStatus::Pending,
            payment_status: OrderPaymentStatus::Pending,
            inventory_state: InventoryState::Reserved,
            transaction_id: None,
            cancellation_reason: None,
            status_history: vec![StatusChange {
                status: OrderStatus::Pending,
                timestamp: now,
                note: Some("Order placed".to_string()),
            }],
            version: 0,
            created_at: now,
            updated_at: now,
        };

        let lines = order.stock_lines();
        self.reserve_or_compensate(&order.order_id, &lines).await?;

        if let Err(e) = self.store.insert_order(&order).await {
            self.release(&order.order_id, &lines).await;
            return Err(e);
        }
        tracing::info!(
            order_id = %order.order_id,
            user_id = %order.user_id,
            location_id = %order.location_id,
            total = %order.pricing.total_amount,
            "Order placed, stock reserved"
        );

        let mut metadata = match request.metadata {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        metadata.insert("order_id".into(), json!(order.order_id));

        let initiated = self
            .payments
            .initiate(PaymentRequest {
                user_id: order.user_id.clone(),
                order_id: order.order_id.clone(),
                amount: order.pricing.total_amount,
                payment_method: order.payment_method,
                gateway: order.gateway,
                cashback: request.cashback,
                metadata: Value::Object(metadata),
            })
            .await;

        let transaction = match initiated {
            Ok(transaction) => transaction,
            Err(e) => {
                self.release(&order.order_id, &lines).await;
                let failed_transaction = self.latest_transaction(&order.order_id).await;
                self.write(&order.order_id, |o| {
                    o.inventory_state = InventoryState::Released;
                    o.payment_status = OrderPaymentStatus::Failed;
                    if failed_transaction.is_some() {
                        o.transaction_id = failed_transaction;
                    }
                    Ok(())
                })
                .await?;
                tracing::warn!(order_id = %order.order_id, error = %e, "Payment initiation failed, stock released");
                return Err(e);
            }
        };

        let transaction_id = transaction.id;
        let mut order = self
            .write(&order.order_id, |o| {
                o.transaction_id = Some(transaction_id);
                Ok(())
            })
            .await?;

        if transaction.gateway == Gateway::Cod {
            order = self.accept_cash_on_delivery(&order).await?;
        }

        self.notifier.dispatch(CommerceEvent::OrderPlaced {
            order_id: order.order_id.clone(),
            user_id: order.user_id.clone(),
            location_id: order.location_id.clone(),
            total_amount: order.pricing.total_amount,
            timestamp: Utc::now(),
        });

        Ok(PlacedOrder { order, transaction })
    }

    /// Confirms the payment and, the first time it succeeds, fulfils the
    /// order's stock.
    pub async fn confirm_payment(
        &self,
        transaction_id: Uuid,
        gateway_transaction_id: &str,
        gateway_data: Value,
    ) -> CommerceResult<Outcome<Transaction>> {
        let outcome = self
            .payments
            .confirm(transaction_id, gateway_transaction_id, gateway_data)
            .await?;
        if let Outcome::Applied(transaction) = &outcome {
            self.settle_paid(transaction).await?;
        }
        Ok(outcome)
    }

    pub async fn fail_payment(&self, transaction_id: Uuid, reason: &str) -> CommerceResult<Outcome<Transaction>> {
        let outcome = self.payments.fail(transaction_id, reason).await?;
        if let Outcome::Applied(transaction) = &outcome {
            self.settle_failed(transaction).await?;
        }
        Ok(outcome)
    }

    pub async fn verify_cod(
        &self,
        transaction_id: Uuid,
        verification: CodVerificationStatus,
    ) -> CommerceResult<Outcome<Transaction>> {
        let outcome = self.payments.verify_cod(transaction_id, verification).await?;
        if let Outcome::Applied(transaction) = &outcome {
            match transaction.status {
                TransactionStatus::Success => self.settle_paid(transaction).await?,
                _ => self.settle_failed(transaction).await?,
            };
        }
        Ok(outcome)
    }

    /// Polls the gateway for a stuck payment and settles the order's stock
    /// the same way a webhook would.
    pub async fn reconcile_payment(&self, transaction_id: Uuid) -> CommerceResult<Transaction> {
        let before = self.payments.get(transaction_id).await?;
        let transaction = self.payments.reconcile(transaction_id).await?;
        if before.status != transaction.status {
            match transaction.status {
                TransactionStatus::Success => self.settle_paid(&transaction).await?,
                TransactionStatus::Failed => self.settle_failed(&transaction).await?,
                _ => {}
            }
        }
        Ok(transaction)
    }

    /// Re-reserves released stock, then opens a new payment attempt. The
    /// reservation is dropped again if the attempt cannot be opened.
    ///
    /// Only the order's current attempt can be retried, and never once the
    /// order is paid.
    pub async fn retry_payment(&self, transaction_id: Uuid) -> CommerceResult<Transaction> {
        let original = self.payments.get(transaction_id).await?;
        let order = self.get_order(&original.order_id).await?;
        if order.status == OrderStatus::Cancelled {
            return Err(CommerceError::Validation(format!(
                "Order {} is cancelled",
                order.order_id
            )));
        }
        if matches!(order.payment_status, OrderPaymentStatus::Paid | OrderPaymentStatus::Refunded) {
            return Err(CommerceError::CannotRetrySuccessful);
        }
        if order.transaction_id != Some(transaction_id) {
            return Err(CommerceError::AttemptSuperseded(transaction_id));
        }

        let lines = order.stock_lines();
        let re_reserved = order.inventory_state == InventoryState::Released;
        if re_reserved {
            self.reserve_or_compensate(&order.order_id, &lines).await?;
            self.write(&order.order_id, |o| {
                o.inventory_state = InventoryState::Reserved;
                Ok(())
            })
            .await?;
        }

        let transaction = match self.payments.retry(transaction_id).await {
            Ok(transaction) => transaction,
            Err(e) => {
                if re_reserved {
                    self.release(&order.order_id, &lines).await;
                }
                let latest = self.latest_transaction(&order.order_id).await;
                let failed_transaction = latest.filter(|id| *id != transaction_id);
                self.write(&order.order_id, |o| {
                    if re_reserved {
                        o.inventory_state = InventoryState::Released;
                    }
                    if failed_transaction.is_some() {
                        o.transaction_id = failed_transaction;
                        o.payment_status = OrderPaymentStatus::Failed;
                    }
                    Ok(())
                })
                .await?;
                return Err(e);
            }
        };

        let new_id = transaction.id;
        let order = self
            .write(&order.order_id, |o| {
                o.transaction_id = Some(new_id);
                o.payment_status = OrderPaymentStatus::Pending;
                Ok(())
            })
            .await?;
        if transaction.gateway == Gateway::Cod {
            self.accept_cash_on_delivery(&order).await?;
        }
        Ok(transaction)
    }

    /// Moves one step along pending -> confirmed -> packed -> dispatched -> delivered.
    pub async fn update_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        note: Option<String>,
    ) -> CommerceResult<Order> {
        if status == OrderStatus::Cancelled {
            return Err(CommerceError::Validation(
                "Use cancellation to cancel an order".to_string(),
            ));
        }
        let order = self
            .write(order_id, |o| {
                if o.status.next() != Some(status) {
                    return Err(CommerceError::InvalidOrderTransition { from: o.status, to: status });
                }
                o.set_status(status, note.clone());
                Ok(())
            })
            .await?;

        tracing::info!(order_id = %order_id, status = %status, "Order status updated");
        self.notify_status(&order);
        Ok(order)
    }

    /// Cancels a pending or confirmed order, returns its stock, and refunds
    /// or fails its payment.
    ///
    /// The payment is settled before the order is touched. If the refund
    /// fails the order keeps its status, stock and payment state, and the
    /// cancellation can be repeated.
    pub async fn cancel_order(&self, order_id: &str, reason: Option<String>) -> CommerceResult<Order> {
        let current = self.get_order(order_id).await?;
        if !current.status.is_cancellable() {
            return Err(CommerceError::OrderNotCancellable(current.status));
        }

        let (payment_status, refunded_amount) = self.settle_for_cancellation(&current).await?;

        let order = self
            .write(order_id, |o| {
                if !o.status.is_cancellable() {
                    return Err(CommerceError::OrderNotCancellable(o.status));
                }
                o.cancellation_reason = reason.clone();
                o.set_status(OrderStatus::Cancelled, reason.clone());
                Ok(())
            })
            .await
            .map_err(|e| {
                tracing::error!(order_id = %order_id, error = %e, "Payment settled but order could not be cancelled");
                e
            })?;
        tracing::info!(order_id = %order_id, reason = ?reason, "Order cancelled");

        let lines = order.stock_lines();
        let inventory_state = match order.inventory_state {
            InventoryState::Reserved => {
                self.release(order_id, &lines).await;
                InventoryState::Released
            }
            InventoryState::Fulfilled => {
                self.restock(order_id, &lines).await;
                InventoryState::Restocked
            }
            state => state,
        };

        let order = self
            .write(order_id, |o| {
                o.inventory_state = inventory_state;
                o.payment_status = payment_status;
                Ok(())
            })
            .await?;

        self.notifier.dispatch(CommerceEvent::OrderCancelled {
            order_id: order.order_id.clone(),
            user_id: order.user_id.clone(),
            reason: order.cancellation_reason.clone(),
            refunded_amount,
            timestamp: Utc::now(),
        });
        Ok(order)
    }

    /// Fails an open payment or refunds a settled one. Returns the order's
    /// payment status afterwards and the amount refunded by this call.
    async fn settle_for_cancellation(&self, order: &Order) -> CommerceResult<(OrderPaymentStatus, Decimal)> {
        let Some(transaction_id) = order.transaction_id else {
            return Ok((order.payment_status, Decimal::ZERO));
        };
        let mut transaction = self.payments.get(transaction_id).await?;

        if matches!(transaction.status, TransactionStatus::Pending | TransactionStatus::Processing) {
            match self.payments.fail(transaction_id, "Order cancelled").await {
                Ok(_) => return Ok((OrderPaymentStatus::Failed, Decimal::ZERO)),
                // Settled while we looked; refund it below.
                Err(CommerceError::InvalidTransition { .. }) => {
                    transaction = self.payments.get(transaction_id).await?;
                }
                Err(e) => return Err(e),
            }
        }

        let needs_refund = match transaction.status {
            TransactionStatus::Success | TransactionStatus::PartiallyRefunded => true,
            TransactionStatus::Refunded => !transaction.pending_refunds().is_empty(),
            _ => false,
        };
        if !needs_refund {
            let status = if transaction.status == TransactionStatus::Refunded {
                OrderPaymentStatus::Refunded
            } else {
                order.payment_status
            };
            return Ok((status, Decimal::ZERO));
        }

        let outstanding: Decimal = transaction.pending_refunds().iter().map(|(_, amount)| *amount).sum();
        // The first call may only finish an interrupted refund.
        let mut refunded = transaction.clone();
        for _ in 0..2 {
            if refunded.refundable() <= Decimal::ZERO && refunded.pending_refunds().is_empty() {
                break;
            }
            refunded = self.payments.refund(transaction_id, None).await.map_err(|e| {
                tracing::error!(order_id = %order.order_id, error = %e, "Refund on cancellation failed");
                e
            })?;
        }
        let refunded_amount = outstanding + refunded.refund_amount - transaction.refund_amount;
        Ok((OrderPaymentStatus::Refunded, refunded_amount))
    }

    /// Cash is collected at the door, so the order is confirmed and its
    /// stock leaves the shelf straight away.
    async fn accept_cash_on_delivery(&self, order: &Order) -> CommerceResult<Order> {
        let report = self.inventory.fulfill_all(&order.stock_lines()).await;
        if !report.all_succeeded() {
            tracing::error!(order_id = %order.order_id, "Fulfilment incomplete for cash-on-delivery order");
        }
        let order = self
            .write(&order.order_id, |o| {
                o.inventory_state = InventoryState::Fulfilled;
                if o.status == OrderStatus::Pending {
                    o.set_status(OrderStatus::Confirmed, Some("Cash on delivery".to_string()));
                }
                Ok(())
            })
            .await?;
        self.notify_status(&order);
        Ok(order)
    }

    async fn settle_paid(&self, transaction: &Transaction) -> CommerceResult<()> {
        let order = self.get_order(&transaction.order_id).await?;
        if order.inventory_state == InventoryState::Reserved {
            let report = self.inventory.fulfill_all(&order.stock_lines()).await;
            if !report.all_succeeded() {
                tracing::error!(
                    order_id = %order.order_id,
                    transaction_id = %transaction.id,
                    "Fulfilment incomplete after payment"
                );
            }
        }

        let order = self
            .write(&order.order_id, |o| {
                if o.inventory_state == InventoryState::Reserved {
                    o.inventory_state = InventoryState::Fulfilled;
                }
                o.payment_status = OrderPaymentStatus::Paid;
                if o.status == OrderStatus::Pending {
                    o.set_status(OrderStatus::Confirmed, Some("Payment confirmed".to_string()));
                }
                Ok(())
            })
            .await?;
        tracing::info!(order_id = %order.order_id, transaction_id = %transaction.id, "Order paid");
        self.notify_status(&order);
        Ok(())
    }

    async fn settle_failed(&self, transaction: &Transaction) -> CommerceResult<()> {
        let order = self.get_order(&transaction.order_id).await?;
        if order.transaction_id != Some(transaction.id) {
            return Ok(());
        }
        let lines = order.stock_lines();
        let inventory_state = match order.inventory_state {
            InventoryState::Reserved => {
                self.release(&order.order_id, &lines).await;
                InventoryState::Released
            }
            InventoryState::Fulfilled if order.status != OrderStatus::Delivered => {
                self.restock(&order.order_id, &lines).await;
                InventoryState::Restocked
            }
            state => state,
        };
        self.write(&order.order_id, |o| {
            o.inventory_state = inventory_state;
            o.payment_status = OrderPaymentStatus::Failed;
            Ok(())
        })
        .await?;
        tracing::info!(order_id = %order.order_id, transaction_id = %transaction.id, "Order payment failed, stock returned");
        Ok(())
    }

    /// Reserves every line or, if any fails, releases those that succeeded
    /// and returns the first failure.
    async fn reserve_or_compensate(&self, order_id: &str, lines: &[StockLine]) -> CommerceResult<()> {
        let report = self.inventory.reserve_all(lines).await;
        if report.all_succeeded() {
            return Ok(());
        }
        let reserved = report.succeeded();
        if !reserved.is_empty() {
            self.release(order_id, &reserved).await;
        }
        Err(report
            .into_first_error()
            .unwrap_or_else(|| CommerceError::Internal("Reservation failed".to_string())))
    }

    async fn release(&self, order_id: &str, lines: &[StockLine]) {
        let report = self.inventory.release_all(lines).await;
        if !report.all_succeeded() {
            tracing::error!(order_id = %order_id, "Failed to release part of the reservation");
        }
    }

    async fn restock(&self, order_id: &str, lines: &[StockLine]) {
        let report = self.inventory.restock_all(lines).await;
        if !report.all_succeeded() {
            tracing::error!(order_id = %order_id, "Failed to restock part of the order");
        }
    }

    /// Newest payment attempt recorded for the order.
    async fn latest_transaction(&self, order_id: &str) -> Option<Uuid> {
        match self.payments.for_order(order_id).await {
            Ok(transactions) => transactions.last().map(|t| t.id),
            Err(e) => {
                tracing::warn!(order_id = %order_id, error = %e, "Failed to look up order transactions");
                None
            }
        }
    }

    fn notify_status(&self, order: &Order) {
        self.notifier.dispatch(CommerceEvent::OrderStatusChanged {
            order_id: order.order_id.clone(),
            user_id: order.user_id.clone(),
            status: order.status,
            timestamp: Utc::now(),
        });
    }

    async fn write<F>(&self, order_id: &str, mut apply: F) -> CommerceResult<Order>
    where
        F: FnMut(&mut Order) -> CommerceResult<()>,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let current = self.get_order(order_id).await?;
            let mut next = current.next_version();
            apply(&mut next)?;
            if self.store.swap_order(current.version, &next).await? {
                return Ok(next);
            }
            tracing::debug!(order_id = %order_id, attempt, "Order version moved, retrying");
            tokio::task::yield_now().await;
        }
        Err(CommerceError::ConcurrentUpdate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn item(price: Decimal, quantity: i64) -> OrderItem {
        OrderItem {
            product_id: "p1".into(),
            variant_id: "v1".into(),
            name: "Milk 1L".into(),
            price,
            quantity,
        }
    }

    #[test]
    fn pricing_applies_discount_before_tax() {
        let settings = PricingSettings {
            tax_percent: dec!(5),
            delivery_fee: dec!(40),
            surge_percent: dec!(10),
        };
        let pricing = price(&[item(dec!(60), 2), item(dec!(30), 1)], dec!(50), &settings).unwrap();
        assert_eq!(pricing.subtotal, dec!(150));
        assert_eq!(pricing.surge_fee, dec!(10));
        assert_eq!(pricing.tax, dec!(5));
        assert_eq!(pricing.total_amount, dec!(155));
    }

    #[test]
    fn pricing_rounds_to_two_places() {
        let settings = PricingSettings {
            tax_percent: dec!(18),
            delivery_fee: dec!(0),
            surge_percent: dec!(0),
        };
        let pricing = price(&[item(dec!(9.99), 3)], dec!(0), &settings).unwrap();
        assert_eq!(pricing.subtotal, dec!(29.97));
        assert_eq!(pricing.tax, dec!(5.39));
        assert_eq!(pricing.total_amount, dec!(35.36));
    }

    #[test]
    fn discount_cannot_exceed_subtotal() {
        let err = price(&[item(dec!(10), 1)], dec!(11), &PricingSettings::default()).unwrap_err();
        assert!(matches!(err, CommerceError::Validation(_)));
    }

    #[test]
    fn totals_beyond_decimal_range_are_rejected() {
        let err = price(
            &[item(dec!(1000000000000), i64::MAX)],
            dec!(0),
            &PricingSettings::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CommerceError::Validation(_)));
    }

    #[test]
    fn order_ids_are_short_and_prefixed() {
        let id = new_order_id();
        assert!(id.starts_with("ORD-"));
        assert_eq!(id.len(), 12);
    }
}
