use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

use crate::errors::{CommerceError, CommerceResult};

// === Inventory ===

/// Identity of a stock record: one variant held at one fulfillment location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub variant_id: String,
    pub location_id: String,
}

impl StockKey {
    pub fn new(variant_id: impl Into<String>, location_id: impl Into<String>) -> Self {
        Self {
            variant_id: variant_id.into(),
            location_id: location_id.into(),
        }
    }
}

impl fmt::Display for StockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.variant_id, self.location_id)
    }
}

/// Stock of one variant at one location.
///
/// Key design decisions:
/// - `available` is never stored, it is always `on_hand - reserved` of the
///   current row, so it cannot drift from the counts it is derived from
/// - every change goes through a pure transition (`reserved`, `released`,
///   `fulfilled`, `restocked`) that returns the next row or an error
/// - `version` guards every write (optimistic locking)
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct StockRecord {
    pub variant_id: String,
    pub location_id: String,
    pub on_hand: i64,
    pub reserved: i64,
    pub low_stock_threshold: i64,
    pub reorder_point: i64,
    pub reorder_quantity: i64,
    pub last_restocked: Option<DateTime<Utc>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StockRecord {
    pub fn key(&self) -> StockKey {
        StockKey::new(&self.variant_id, &self.location_id)
    }

    pub fn available(&self) -> i64 {
        self.on_hand - self.reserved
    }

    pub fn is_low_stock(&self) -> bool {
        self.available() <= self.low_stock_threshold
    }

    pub fn is_out_of_stock(&self) -> bool {
        self.available() == 0
    }

    pub fn needs_reorder(&self) -> bool {
        self.available() <= self.reorder_point
    }

    /// Next state after holding `qty` units.
    pub fn reserved(&self, qty: i64) -> CommerceResult<StockRecord> {
        if self.available() < qty {
            return Err(CommerceError::InsufficientStock {
                variant_id: self.variant_id.clone(),
                location_id: self.location_id.clone(),
                requested: qty,
                available: self.available(),
            });
        }
        Ok(self.successor(self.on_hand, self.reserved + qty))
    }

    /// Next state after dropping up to `qty` units of hold. Clamped at zero.
    pub fn released(&self, qty: i64) -> StockRecord {
        let release = qty.min(self.reserved);
        self.successor(self.on_hand, self.reserved - release)
    }

    /// Next state after `qty` reserved units physically leave the location.
    pub fn fulfilled(&self, qty: i64) -> CommerceResult<StockRecord> {
        if self.reserved < qty {
            return Err(CommerceError::NotReserved {
                variant_id: self.variant_id.clone(),
                location_id: self.location_id.clone(),
                requested: qty,
                reserved: self.reserved,
            });
        }
        Ok(self.successor(self.on_hand - qty, self.reserved - qty))
    }

    /// Next state after `qty` units arrive. Rejects counts that would not fit.
    pub fn restocked(&self, qty: i64, at: DateTime<Utc>) -> CommerceResult<StockRecord> {
        let on_hand = self.on_hand.checked_add(qty).ok_or_else(|| {
            CommerceError::Validation(format!(
                "Restocking {} units would overflow stock of {}",
                qty,
                self.key()
            ))
        })?;
        let mut next = self.successor(on_hand, self.reserved);
        next.last_restocked = Some(at);
        Ok(next)
    }

    /// Same counts, new thresholds.
    pub fn with_thresholds(&self, thresholds: StockThresholds) -> StockRecord {
        StockRecord {
            low_stock_threshold: thresholds.low_stock_threshold,
            reorder_point: thresholds.reorder_point,
            reorder_quantity: thresholds.reorder_quantity,
            ..self.successor(self.on_hand, self.reserved)
        }
    }

    fn successor(&self, on_hand: i64, reserved: i64) -> StockRecord {
        StockRecord {
            on_hand,
            reserved,
            version: self.version + 1,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }
}

/// Alerting and reorder levels of a stock record.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct StockThresholds {
    #[serde(default = "default_low_stock_threshold")]
    pub low_stock_threshold: i64,
    #[serde(default = "default_reorder_point")]
    pub reorder_point: i64,
    #[serde(default = "default_reorder_quantity")]
    pub reorder_quantity: i64,
}

fn default_low_stock_threshold() -> i64 {
    10
}

fn default_reorder_point() -> i64 {
    5
}

fn default_reorder_quantity() -> i64 {
    100
}

impl Default for StockThresholds {
    fn default() -> Self {
        Self {
            low_stock_threshold: default_low_stock_threshold(),
            reorder_point: default_reorder_point(),
            reorder_quantity: default_reorder_quantity(),
        }
    }
}

/// One line of a batch inventory call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockLine {
    pub variant_id: String,
    pub location_id: String,
    pub quantity: i64,
}

impl StockLine {
    pub fn key(&self) -> StockKey {
        StockKey::new(&self.variant_id, &self.location_id)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReorderSuggestion {
    pub stock: StockRecord,
    pub suggested_quantity: i64,
}

// === Wallet ===

/// A user's wallet. Exactly one per user.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct WalletAccount {
    pub id: Uuid,
    pub user_id: String,
    pub balance: Decimal,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WalletAccount {
    /// Balance after applying one ledger entry.
    pub fn balance_after(&self, entry_type: LedgerEntryType, amount: Decimal) -> CommerceResult<Decimal> {
        match entry_type {
            LedgerEntryType::Credit => self
                .balance
                .checked_add(amount)
                .ok_or_else(|| CommerceError::Validation("Credit would overflow the balance".to_string())),
            LedgerEntryType::Debit if self.balance < amount => Err(CommerceError::InsufficientFunds {
                required: amount,
                available: self.balance,
            }),
            LedgerEntryType::Debit => Ok(self.balance - amount),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerEntryType {
    Credit,
    Debit,
}

impl LedgerEntryType {
    /// Signed effect of an entry of this type on the balance.
    pub fn delta(&self, amount: Decimal) -> Decimal {
        match self {
            LedgerEntryType::Credit => amount,
            LedgerEntryType::Debit => -amount,
        }
    }
}

impl fmt::Display for LedgerEntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerEntryType::Credit => write!(f, "CREDIT"),
            LedgerEntryType::Debit => write!(f, "DEBIT"),
        }
    }
}

/// Immutable record of one balance change.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct WalletLedgerEntry {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub user_id: String,
    #[serde(rename = "type")]
    pub entry_type: LedgerEntryType,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub reference_id: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// A balance change requested of the wallet store.
#[derive(Debug, Clone)]
pub struct LedgerPosting {
    pub user_id: String,
    pub entry_type: LedgerEntryType,
    pub amount: Decimal,
    pub reference_id: String,
    pub description: String,
}

// === Payments ===

/// Payment gateway a transaction is settled through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Gateway {
    Razorpay,
    Stripe,
    Wallet,
    Cod,
}

impl fmt::Display for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gateway::Razorpay => write!(f, "RAZORPAY"),
            Gateway::Stripe => write!(f, "STRIPE"),
            Gateway::Wallet => write!(f, "WALLET"),
            Gateway::Cod => write!(f, "COD"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Upi,
    Card,
    NetBanking,
    Wallet,
    Cod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Refunded,
    PartiallyRefunded,
}

impl TransactionStatus {
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Failed)
                | (Processing, Success)
                | (Processing, Failed)
                | (Success, Refunded)
                | (Success, PartiallyRefunded)
                | (PartiallyRefunded, PartiallyRefunded)
                | (PartiallyRefunded, Refunded)
        )
    }

    /// SUCCESS or any refund state reached from it.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Success
                | TransactionStatus::PartiallyRefunded
                | TransactionStatus::Refunded
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Processing => "PROCESSING",
            TransactionStatus::Success => "SUCCESS",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Refunded => "REFUNDED",
            TransactionStatus::PartiallyRefunded => "PARTIALLY_REFUNDED",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CodVerificationStatus {
    NotApplicable,
    Pending,
    Verified,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: String,
    pub timestamp: DateTime<Utc>,
    pub details: Value,
}

pub mod audit {
    pub const PAYMENT_INITIATED: &str = "PAYMENT_INITIATED";
    pub const PAYMENT_PROCESSING: &str = "PAYMENT_PROCESSING";
    pub const GATEWAY_TIMEOUT: &str = "GATEWAY_TIMEOUT";
    pub const PAYMENT_CONFIRMED: &str = "PAYMENT_CONFIRMED";
    pub const PAYMENT_FAILED: &str = "PAYMENT_FAILED";
    pub const PAYMENT_RETRY: &str = "PAYMENT_RETRY";
    pub const CASHBACK_APPLIED: &str = "CASHBACK_APPLIED";
    pub const COD_VERIFICATION: &str = "COD_VERIFICATION";
    pub const REFUND_REQUESTED: &str = "REFUND_REQUESTED";
    pub const REFUND_PROCESSED: &str = "REFUND_PROCESSED";
    pub const REFUND_FAILED: &str = "REFUND_FAILED";
}

/// One payment attempt. Retries produce new transactions sharing `order_id`.
///
/// Why an audit log on the row?
/// - Every transition appends exactly one entry, failures included
/// - Refund and cashback bookkeeping is read back from it (`audit_count`,
///   `pending_refunds`) instead of being tracked in extra columns
/// - `retry_count` counts retries along the whole chain of attempts, not per row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub order_id: String,
    pub user_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub gateway: Gateway,
    pub status: TransactionStatus,
    pub gateway_order_id: Option<String>,
    pub gateway_transaction_id: Option<String>,
    pub retry_count: i32,
    pub retry_of: Option<Uuid>,
    pub refund_amount: Decimal,
    pub refunded_at: Option<DateTime<Utc>>,
    pub cashback_amount: Decimal,
    pub cashback_applied: bool,
    pub cod_verification_status: CodVerificationStatus,
    pub failure_reason: Option<String>,
    pub metadata: Value,
    pub audit_log: Vec<AuditEntry>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn record(&mut self, action: &str, details: Value) {
        let now = Utc::now();
        self.audit_log.push(AuditEntry {
            action: action.to_string(),
            timestamp: now,
            details,
        });
        self.updated_at = now;
    }

    /// Moves to `next`, appending exactly one audit entry.
    pub fn transition(&mut self, next: TransactionStatus, action: &str, details: Value) -> CommerceResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(CommerceError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.record(action, details);
        Ok(())
    }

    pub fn refundable(&self) -> Decimal {
        self.amount - self.refund_amount
    }

    pub fn audit_count(&self, action: &str) -> usize {
        self.audit_log.iter().filter(|e| e.action == action).count()
    }

    /// Refunds recorded against the transaction that were neither completed
    /// nor rolled back, as `(sequence, amount)`.
    pub fn pending_refunds(&self) -> Vec<(usize, Decimal)> {
        let sequence_of = |entry: &AuditEntry| {
            entry.details["sequence"]
                .as_u64()
                .map(|n| n as usize)
        };
        let closed: Vec<usize> = self
            .audit_log
            .iter()
            .filter(|e| e.action == audit::REFUND_PROCESSED || e.action == audit::REFUND_FAILED)
            .filter_map(sequence_of)
            .collect();
        self.audit_log
            .iter()
            .filter(|e| e.action == audit::REFUND_REQUESTED)
            .filter_map(|e| {
                let sequence = sequence_of(e)?;
                let amount = e.details["amount"].as_str()?.parse::<Decimal>().ok()?;
                Some((sequence, amount))
            })
            .filter(|(sequence, _)| !closed.contains(sequence))
            .collect()
    }

    /// Copy with the version bumped, ready for a conditioned write.
    pub fn next_version(&self) -> Transaction {
        Transaction {
            version: self.version + 1,
            ..self.clone()
        }
    }
}

/// Result of an idempotent operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Applied(T),
    AlreadyProcessed(T),
}

impl<T> Outcome<T> {
    pub fn into_inner(self) -> T {
        match self {
            Outcome::Applied(v) | Outcome::AlreadyProcessed(v) => v,
        }
    }

    pub fn inner(&self) -> &T {
        match self {
            Outcome::Applied(v) | Outcome::AlreadyProcessed(v) => v,
        }
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, Outcome::Applied(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub has_more: bool,
}

pub const DEFAULT_PAGE_LIMIT: i64 = 50;
pub const MAX_PAGE_LIMIT: i64 = 200;

/// Clamps caller-supplied paging to `(limit, offset)`.
pub fn page_window(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    (
        limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
        offset.unwrap_or(0).max(0),
    )
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, offset: i64) -> Self {
        let has_more = offset + (items.len() as i64) < total;
        Self {
            items,
            total,
            has_more,
        }
    }
}

// === Orders ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar")]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Packed,
    Dispatched,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// The single forward step of the delivery lifecycle.
    pub fn next(&self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Pending => Some(OrderStatus::Confirmed),
            OrderStatus::Confirmed => Some(OrderStatus::Packed),
            OrderStatus::Packed => Some(OrderStatus::Dispatched),
            OrderStatus::Dispatched => Some(OrderStatus::Delivered),
            OrderStatus::Delivered | OrderStatus::Cancelled => None,
        }
    }

    pub fn is_cancellable(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Confirmed)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Packed => "packed",
            OrderStatus::Dispatched => "dispatched",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Where the order's stock currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InventoryState {
    Reserved,
    Fulfilled,
    Released,
    Restocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar")]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderPaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

/// Item as priced at order time. Not a live catalog reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: String,
    pub variant_id: String,
    pub name: String,
    pub price: Decimal,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub delivery_fee: Decimal,
    pub surge_fee: Decimal,
    pub tax: Decimal,
    pub total_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: OrderStatus,
    pub timestamp: DateTime<Utc>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub user_id: String,
    pub location_id: String,
    pub items: Vec<OrderItem>,
    pub pricing: Pricing,
    pub payment_method: PaymentMethod,
    pub gateway: Gateway,
    pub status: OrderStatus,
    pub payment_status: OrderPaymentStatus,
    pub inventory_state: InventoryState,
    pub transaction_id: Option<Uuid>,
    pub cancellation_reason: Option<String>,
    pub status_history: Vec<StatusChange>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn stock_lines(&self) -> Vec<StockLine> {
        self.items
            .iter()
            .map(|item| StockLine {
                variant_id: item.variant_id.clone(),
                location_id: self.location_id.clone(),
                quantity: item.quantity,
            })
            .collect()
    }

    pub fn set_status(&mut self, status: OrderStatus, note: Option<String>) {
        let now = Utc::now();
        self.status = status;
        self.status_history.push(StatusChange {
            status,
            timestamp: now,
            note,
        });
        self.updated_at = now;
    }

    pub fn next_version(&self) -> Order {
        Order {
            version: self.version + 1,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }
}

// === API Request/Response Models ===

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AssignStockRequest {
    pub variant_id: String,
    pub location_id: String,
    pub on_hand: i64,
    #[serde(flatten)]
    pub thresholds: StockThresholds,
}

#[derive(Debug, Deserialize)]
pub struct QuantityRequest {
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct BatchStockRequest {
    pub items: Vec<StockLine>,
}

#[derive(Debug, Deserialize)]
pub struct LocationQuery {
    pub location_id: Option<String>,
}

/// Narrows a location's stock listing.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct StockFilter {
    #[serde(default)]
    pub low_stock_only: bool,
    #[serde(default)]
    pub out_of_stock_only: bool,
}

#[derive(Debug, Deserialize)]
pub struct StockListQuery {
    pub location_id: String,
    #[serde(flatten)]
    pub filter: StockFilter,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub quantity: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Availability {
    pub available: bool,
    /// Units that could be reserved now.
    pub quantity: i64,
    pub is_low_stock: bool,
    pub is_out_of_stock: bool,
    pub reason: Option<String>,
}

/// Per-item outcome of a batch inventory call.
#[derive(Debug, Serialize)]
pub struct LineResult {
    pub variant_id: String,
    pub location_id: String,
    pub quantity: i64,
    pub success: bool,
    pub error: Option<String>,
    pub stock: Option<StockRecord>,
}

#[derive(Debug, Serialize)]
pub struct StockResponse {
    #[serde(flatten)]
    pub stock: StockRecord,
    pub available: i64,
    pub is_low_stock: bool,
    pub is_out_of_stock: bool,
    pub needs_reorder: bool,
}

impl From<StockRecord> for StockResponse {
    fn from(stock: StockRecord) -> Self {
        Self {
            available: stock.available(),
            is_low_stock: stock.is_low_stock(),
            is_out_of_stock: stock.is_out_of_stock(),
            needs_reorder: stock.needs_reorder(),
            stock,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateWalletRequest {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct TopUpRequest {
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    pub reference_id: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub status: Option<TransactionStatus>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub gateway_transaction_id: String,
    #[serde(default)]
    pub gateway_data: Value,
}

#[derive(Debug, Deserialize)]
pub struct FailRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub amount: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyCodRequest {
    pub verification_status: CodVerificationStatus,
}

#[derive(Debug, Deserialize)]
pub struct OrderItemRequest {
    pub product_id: String,
    pub variant_id: String,
    pub name: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct PlaceOrderRequest {
    pub user_id: String,
    pub items: Vec<OrderItemRequest>,
    pub coordinates: Coordinates,
    pub payment_method: PaymentMethod,
    pub gateway: Gateway,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub discount: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub cashback: Option<Decimal>,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelOrderRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PlacedOrderResponse {
    pub order: Order,
    pub transaction: Transaction,
}
