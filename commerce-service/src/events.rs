use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::CommerceResult;
use crate::models::{Gateway, OrderStatus, StockRecord, Transaction, WalletLedgerEntry};

/// Events emitted after a state transition has been committed.
///
/// Consumers (email, SMS, invoices, push) sit outside the core. Every event
/// carries the user it concerns so it can be used as a partition key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "eventType")]
pub enum CommerceEvent {
    #[serde(rename = "ORDER_PLACED")]
    OrderPlaced {
        order_id: String,
        user_id: String,
        location_id: String,
        total_amount: Decimal,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "ORDER_STATUS_CHANGED")]
    OrderStatusChanged {
        order_id: String,
        user_id: String,
        status: OrderStatus,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "ORDER_CANCELLED")]
    OrderCancelled {
        order_id: String,
        user_id: String,
        reason: Option<String>,
        refunded_amount: Decimal,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "PAYMENT_CONFIRMED")]
    PaymentConfirmed {
        transaction_id: Uuid,
        order_id: String,
        user_id: String,
        gateway: Gateway,
        amount: Decimal,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "PAYMENT_FAILED")]
    PaymentFailed {
        transaction_id: Uuid,
        order_id: String,
        user_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "REFUND_PROCESSED")]
    RefundProcessed {
        transaction_id: Uuid,
        order_id: String,
        user_id: String,
        amount: Decimal,
        total_refunded: Decimal,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "WALLET_CREDITED")]
    WalletCredited {
        user_id: String,
        amount: Decimal,
        balance_after: Decimal,
        reference_id: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "WALLET_DEBITED")]
    WalletDebited {
        user_id: String,
        amount: Decimal,
        balance_after: Decimal,
        reference_id: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "LOW_STOCK")]
    LowStock {
        variant_id: String,
        location_id: String,
        available: i64,
        timestamp: DateTime<Utc>,
    },
}

impl CommerceEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            CommerceEvent::OrderPlaced { .. } => "ORDER_PLACED",
            CommerceEvent::OrderStatusChanged { .. } => "ORDER_STATUS_CHANGED",
            CommerceEvent::OrderCancelled { .. } => "ORDER_CANCELLED",
            CommerceEvent::PaymentConfirmed { .. } => "PAYMENT_CONFIRMED",
            CommerceEvent::PaymentFailed { .. } => "PAYMENT_FAILED",
            CommerceEvent::RefundProcessed { .. } => "REFUND_PROCESSED",
            CommerceEvent::WalletCredited { .. } => "WALLET_CREDITED",
            CommerceEvent::WalletDebited { .. } => "WALLET_DEBITED",
            CommerceEvent::LowStock { .. } => "LOW_STOCK",
        }
    }

    /// Partition key. Stock events are keyed by location.
    pub fn key(&self) -> &str {
        match self {
            CommerceEvent::OrderPlaced { user_id, .. }
            | CommerceEvent::OrderStatusChanged { user_id, .. }
            | CommerceEvent::OrderCancelled { user_id, .. }
            | CommerceEvent::PaymentConfirmed { user_id, .. }
            | CommerceEvent::PaymentFailed { user_id, .. }
            | CommerceEvent::RefundProcessed { user_id, .. }
            | CommerceEvent::WalletCredited { user_id, .. }
            | CommerceEvent::WalletDebited { user_id, .. } => user_id,
            CommerceEvent::LowStock { location_id, .. } => location_id,
        }
    }

    pub fn payment_confirmed(transaction: &Transaction) -> Self {
        CommerceEvent::PaymentConfirmed {
            transaction_id: transaction.id,
            order_id: transaction.order_id.clone(),
            user_id: transaction.user_id.clone(),
            gateway: transaction.gateway,
            amount: transaction.amount,
            timestamp: Utc::now(),
        }
    }

    pub fn payment_failed(transaction: &Transaction) -> Self {
        CommerceEvent::PaymentFailed {
            transaction_id: transaction.id,
            order_id: transaction.order_id.clone(),
            user_id: transaction.user_id.clone(),
            reason: transaction.failure_reason.clone().unwrap_or_default(),
            timestamp: Utc::now(),
        }
    }

    pub fn wallet_entry(entry: &WalletLedgerEntry) -> Self {
        use crate::models::LedgerEntryType;
        match entry.entry_type {
            LedgerEntryType::Credit => CommerceEvent::WalletCredited {
                user_id: entry.user_id.clone(),
                amount: entry.amount,
                balance_after: entry.balance_after,
                reference_id: entry.reference_id.clone(),
                timestamp: entry.created_at,
            },
            LedgerEntryType::Debit => CommerceEvent::WalletDebited {
                user_id: entry.user_id.clone(),
                amount: entry.amount,
                balance_after: entry.balance_after,
                reference_id: entry.reference_id.clone(),
                timestamp: entry.created_at,
            },
        }
    }

    pub fn low_stock(stock: &StockRecord) -> Self {
        CommerceEvent::LowStock {
            variant_id: stock.variant_id.clone(),
            location_id: stock.location_id.clone(),
            available: stock.available(),
            timestamp: Utc::now(),
        }
    }
}

/// Sink for commerce events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &CommerceEvent) -> CommerceResult<()>;
}

/// Writes events to the log. Used when no broker is configured.
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, event: &CommerceEvent) -> CommerceResult<()> {
        let payload = serde_json::to_string(event)
            .map_err(|e| crate::errors::CommerceError::EventPublish(e.to_string()))?;
        tracing::info!(
            event_type = event.event_type(),
            key = %event.key(),
            payload = %payload,
            "Commerce event"
        );
        Ok(())
    }
}

/// Fire-and-forget dispatch. A failed publish is logged and dropped; it
/// never affects the transition that produced the event.
#[derive(Clone)]
pub struct Notifier {
    publisher: Arc<dyn EventPublisher>,
}

impl Notifier {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher }
    }

    pub fn log_only() -> Self {
        Self::new(Arc::new(LogPublisher))
    }

    pub fn dispatch(&self, event: CommerceEvent) {
        let publisher = Arc::clone(&self.publisher);
        tokio::spawn(async move {
            if let Err(e) = publisher.publish(&event).await {
                tracing::warn!(
                    error = %e,
                    event_type = event.event_type(),
                    key = %event.key(),
                    "Notification dispatch failed"
                );
            }
        });
    }
}
