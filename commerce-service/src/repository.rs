use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction as DbTransaction};
use uuid::Uuid;

use crate::errors::{CommerceError, CommerceResult};
use crate::models::{
    AuditEntry, CodVerificationStatus, Gateway, InventoryState, LedgerPosting, Order, OrderItem,
    OrderPaymentStatus, OrderStatus, Outcome, PaymentMethod, Pricing, StatusChange, StockKey,
    StockRecord, Transaction, TransactionStatus, WalletAccount, WalletLedgerEntry,
};
use crate::store::{InventoryStore, OrderStore, TransactionStore, WalletStore};

/// PostgreSQL-backed store.
///
/// Design principle: all SQL lives here
/// - services hold the business rules and never see a query
/// - this type never decides whether a transition is allowed
///
/// How writes stay safe:
/// 1. Stock, transactions and orders use optimistic locking. Every UPDATE
///    is conditioned on the version that was read.
/// 2. 0 rows affected means someone else won the race. The caller re-reads
///    and re-checks.
/// 3. Wallet postings lock the wallet row instead (`SELECT ... FOR UPDATE`),
///    so the balance check, the balance change and the ledger append commit
///    together.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn lock_wallet_in_tx(
        &self,
        tx: &mut DbTransaction<'_, Postgres>,
        user_id: &str,
    ) -> CommerceResult<WalletAccount> {
        let wallet = sqlx::query_as::<_, WalletAccount>(
            r#"
            SELECT id, user_id, balance, currency, created_at, updated_at
            FROM wallets
            WHERE user_id = $1
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| CommerceError::WalletNotFound(user_id.to_string()))?;

        Ok(wallet)
    }
}

const STOCK_COLUMNS: &str = "variant_id, location_id, on_hand, reserved, low_stock_threshold, \
     reorder_point, reorder_quantity, last_restocked, version, created_at, updated_at";

const LEDGER_COLUMNS: &str = "id, wallet_id, user_id, entry_type, amount, balance_after, \
     reference_id, description, created_at";

const TRANSACTION_COLUMNS: &str = "id, order_id, user_id, amount, currency, payment_method, gateway, \
     status, gateway_order_id, gateway_transaction_id, retry_count, retry_of, refund_amount, \
     refunded_at, cashback_amount, cashback_applied, cod_verification_status, failure_reason, \
     metadata, audit_log, version, created_at, updated_at";

const ORDER_COLUMNS: &str = "order_id, user_id, location_id, items, pricing, payment_method, gateway, \
     status, payment_status, inventory_state, transaction_id, cancellation_reason, status_history, \
     version, created_at, updated_at";

#[async_trait]
impl InventoryStore for PgStore {
    async fn find_stock(&self, key: &StockKey) -> CommerceResult<Option<StockRecord>> {
        let record = sqlx::query_as::<_, StockRecord>(&format!(
            "SELECT {STOCK_COLUMNS} FROM stock_records WHERE variant_id = $1 AND location_id = $2"
        ))
        .bind(&key.variant_id)
        .bind(&key.location_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn insert_stock(&self, record: &StockRecord) -> CommerceResult<StockRecord> {
        sqlx::query(
            r#"
            INSERT INTO stock_records
                (variant_id, location_id, on_hand, reserved, low_stock_threshold,
                 reorder_point, reorder_quantity, last_restocked, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (variant_id, location_id) DO NOTHING
            "#,
        )
        .bind(&record.variant_id)
        .bind(&record.location_id)
        .bind(record.on_hand)
        .bind(record.reserved)
        .bind(record.low_stock_threshold)
        .bind(record.reorder_point)
        .bind(record.reorder_quantity)
        .bind(record.last_restocked)
        .bind(record.version)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        self.find_stock(&record.key())
            .await?
            .ok_or_else(|| CommerceError::Internal(format!("stock {} vanished after insert", record.key())))
    }

    async fn swap_stock(&self, expected_version: i64, next: &StockRecord) -> CommerceResult<bool> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE stock_records
            SET on_hand = $1, reserved = $2, last_restocked = $3,
                low_stock_threshold = $4, reorder_point = $5, reorder_quantity = $6,
                version = $7, updated_at = $8
            WHERE variant_id = $9 AND location_id = $10 AND version = $11
            "#,
        )
        .bind(next.on_hand)
        .bind(next.reserved)
        .bind(next.last_restocked)
        .bind(next.low_stock_threshold)
        .bind(next.reorder_point)
        .bind(next.reorder_quantity)
        .bind(next.version)
        .bind(next.updated_at)
        .bind(&next.variant_id)
        .bind(&next.location_id)
        .bind(expected_version)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected == 1)
    }

    async fn list_stock(&self, location_id: Option<&str>) -> CommerceResult<Vec<StockRecord>> {
        let records = sqlx::query_as::<_, StockRecord>(&format!(
            "SELECT {STOCK_COLUMNS} FROM stock_records \
             WHERE ($1::varchar IS NULL OR location_id = $1) \
             ORDER BY location_id, variant_id"
        ))
        .bind(location_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}

#[async_trait]
impl WalletStore for PgStore {
    async fn create_wallet(&self, user_id: &str, currency: &str) -> CommerceResult<WalletAccount> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO wallets (id, user_id, balance, currency, created_at, updated_at)
            VALUES ($1, $2, 0, $3, $4, $4)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(currency)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.find_wallet(user_id)
            .await?
            .ok_or_else(|| CommerceError::WalletNotFound(user_id.to_string()))
    }

    async fn find_wallet(&self, user_id: &str) -> CommerceResult<Option<WalletAccount>> {
        let wallet = sqlx::query_as::<_, WalletAccount>(
            r#"
            SELECT id, user_id, balance, currency, created_at, updated_at
            FROM wallets
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(wallet)
    }

    async fn post(&self, posting: &LedgerPosting) -> CommerceResult<Outcome<WalletLedgerEntry>> {
        let mut tx = self.pool.begin().await?;

        // Concurrent postings on this wallet queue behind this lock
        let wallet = self.lock_wallet_in_tx(&mut tx, &posting.user_id).await?;

        let existing = sqlx::query_as::<_, WalletLedgerEntry>(&format!(
            "SELECT {LEDGER_COLUMNS} FROM wallet_ledger_entries WHERE wallet_id = $1 AND reference_id = $2"
        ))
        .bind(wallet.id)
        .bind(&posting.reference_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(entry) = existing {
            tx.rollback().await?;
            return Ok(Outcome::AlreadyProcessed(entry));
        }

        let balance = wallet.balance_after(posting.entry_type, posting.amount)?;
        let now = Utc::now();

        sqlx::query(
            r#"
            UPDATE wallets
            SET balance = $1, updated_at = $2
            WHERE id = $3
            "#,
        )
        .bind(balance)
        .bind(now)
        .bind(wallet.id)
        .execute(&mut *tx)
        .await?;

        let entry = sqlx::query_as::<_, WalletLedgerEntry>(&format!(
            "INSERT INTO wallet_ledger_entries \
                 (id, wallet_id, user_id, entry_type, amount, balance_after, reference_id, description, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {LEDGER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(wallet.id)
        .bind(&wallet.user_id)
        .bind(posting.entry_type)
        .bind(posting.amount)
        .bind(balance)
        .bind(&posting.reference_id)
        .bind(&posting.description)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Outcome::Applied(entry))
    }

    async fn ledger(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> CommerceResult<(Vec<WalletLedgerEntry>, i64)> {
        let entries = sqlx::query_as::<_, WalletLedgerEntry>(&format!(
            "SELECT {LEDGER_COLUMNS} FROM wallet_ledger_entries \
             WHERE user_id = $1 \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2 OFFSET $3"
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM wallet_ledger_entries WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok((entries, total))
    }
}

/// Row shape of `payment_transactions`.
#[derive(FromRow)]
struct TransactionRow {
    id: Uuid,
    order_id: String,
    user_id: String,
    amount: Decimal,
    currency: String,
    payment_method: PaymentMethod,
    gateway: Gateway,
    status: TransactionStatus,
    gateway_order_id: Option<String>,
    gateway_transaction_id: Option<String>,
    retry_count: i32,
    retry_of: Option<Uuid>,
    refund_amount: Decimal,
    refunded_at: Option<DateTime<Utc>>,
    cashback_amount: Decimal,
    cashback_applied: bool,
    cod_verification_status: CodVerificationStatus,
    failure_reason: Option<String>,
    metadata: Json<Value>,
    audit_log: Json<Vec<AuditEntry>>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<TransactionRow> for Transaction {
    fn from(row: TransactionRow) -> Self {
        Self {
            id: row.id,
            order_id: row.order_id,
            user_id: row.user_id,
            amount: row.amount,
            currency: row.currency,
            payment_method: row.payment_method,
            gateway: row.gateway,
            status: row.status,
            gateway_order_id: row.gateway_order_id,
            gateway_transaction_id: row.gateway_transaction_id,
            retry_count: row.retry_count,
            retry_of: row.retry_of,
            refund_amount: row.refund_amount,
            refunded_at: row.refunded_at,
            cashback_amount: row.cashback_amount,
            cashback_applied: row.cashback_applied,
            cod_verification_status: row.cod_verification_status,
            failure_reason: row.failure_reason,
            metadata: row.metadata.0,
            audit_log: row.audit_log.0,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl TransactionStore for PgStore {
    async fn insert_transaction(&self, t: &Transaction) -> CommerceResult<()> {
        sqlx::query(&format!(
            "INSERT INTO payment_transactions ({TRANSACTION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
                     $17, $18, $19, $20, $21, $22, $23)"
        ))
        .bind(t.id)
        .bind(&t.order_id)
        .bind(&t.user_id)
        .bind(t.amount)
        .bind(&t.currency)
        .bind(t.payment_method)
        .bind(t.gateway)
        .bind(t.status)
        .bind(&t.gateway_order_id)
        .bind(&t.gateway_transaction_id)
        .bind(t.retry_count)
        .bind(t.retry_of)
        .bind(t.refund_amount)
        .bind(t.refunded_at)
        .bind(t.cashback_amount)
        .bind(t.cashback_applied)
        .bind(t.cod_verification_status)
        .bind(&t.failure_reason)
        .bind(Json(&t.metadata))
        .bind(Json(&t.audit_log))
        .bind(t.version)
        .bind(t.created_at)
        .bind(t.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_transaction(&self, id: Uuid) -> CommerceResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM payment_transactions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Transaction::from))
    }

    async fn find_by_gateway_reference(
        &self,
        gateway_order_id: Option<&str>,
        gateway_transaction_id: Option<&str>,
    ) -> CommerceResult<Option<Transaction>> {
        if let Some(order_ref) = gateway_order_id {
            let row = sqlx::query_as::<_, TransactionRow>(&format!(
                "SELECT {TRANSACTION_COLUMNS} FROM payment_transactions \
                 WHERE gateway_order_id = $1 ORDER BY created_at DESC LIMIT 1"
            ))
            .bind(order_ref)
            .fetch_optional(&self.pool)
            .await?;
            if row.is_some() {
                return Ok(row.map(Transaction::from));
            }
        }

        if let Some(payment_ref) = gateway_transaction_id {
            let row = sqlx::query_as::<_, TransactionRow>(&format!(
                "SELECT {TRANSACTION_COLUMNS} FROM payment_transactions \
                 WHERE gateway_transaction_id = $1 ORDER BY created_at DESC LIMIT 1"
            ))
            .bind(payment_ref)
            .fetch_optional(&self.pool)
            .await?;
            return Ok(row.map(Transaction::from));
        }

        Ok(None)
    }

    async fn swap_transaction(&self, expected_version: i64, t: &Transaction) -> CommerceResult<bool> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE payment_transactions
            SET status = $1, gateway_order_id = $2, gateway_transaction_id = $3, retry_count = $4,
                refund_amount = $5, refunded_at = $6, cashback_applied = $7,
                cod_verification_status = $8, failure_reason = $9, audit_log = $10,
                version = $11, updated_at = $12
            WHERE id = $13 AND version = $14
            "#,
        )
        .bind(t.status)
        .bind(&t.gateway_order_id)
        .bind(&t.gateway_transaction_id)
        .bind(t.retry_count)
        .bind(t.refund_amount)
        .bind(t.refunded_at)
        .bind(t.cashback_applied)
        .bind(t.cod_verification_status)
        .bind(&t.failure_reason)
        .bind(Json(&t.audit_log))
        .bind(t.version)
        .bind(t.updated_at)
        .bind(t.id)
        .bind(expected_version)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected == 1)
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        status: Option<TransactionStatus>,
        limit: i64,
        offset: i64,
    ) -> CommerceResult<(Vec<Transaction>, i64)> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM payment_transactions \
             WHERE user_id = $1 AND ($2::varchar IS NULL OR status = $2) \
             ORDER BY created_at DESC \
             LIMIT $3 OFFSET $4"
        ))
        .bind(user_id)
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM payment_transactions \
             WHERE user_id = $1 AND ($2::varchar IS NULL OR status = $2)",
        )
        .bind(user_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        Ok((rows.into_iter().map(Transaction::from).collect(), total))
    }

    async fn list_for_order(&self, order_id: &str) -> CommerceResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM payment_transactions \
             WHERE order_id = $1 ORDER BY created_at ASC"
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Transaction::from).collect())
    }
}

/// Row shape of `orders`.
#[derive(FromRow)]
struct OrderRow {
    order_id: String,
    user_id: String,
    location_id: String,
    items: Json<Vec<OrderItem>>,
    pricing: Json<Pricing>,
    payment_method: PaymentMethod,
    gateway: Gateway,
    status: OrderStatus,
    payment_status: OrderPaymentStatus,
    inventory_state: InventoryState,
    transaction_id: Option<Uuid>,
    cancellation_reason: Option<String>,
    status_history: Json<Vec<StatusChange>>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<OrderRow> for Order {
    fn from(row: OrderRow) -> Self {
        Self {
            order_id: row.order_id,
            user_id: row.user_id,
            location_id: row.location_id,
            items: row.items.0,
            pricing: row.pricing.0,
            payment_method: row.payment_method,
            gateway: row.gateway,
            status: row.status,
            payment_status: row.payment_status,
            inventory_state: row.inventory_state,
            transaction_id: row.transaction_id,
            cancellation_reason: row.cancellation_reason,
            status_history: row.status_history.0,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn insert_order(&self, o: &Order) -> CommerceResult<()> {
        sqlx::query(&format!(
            "INSERT INTO orders ({ORDER_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)"
        ))
        .bind(&o.order_id)
        .bind(&o.user_id)
        .bind(&o.location_id)
        .bind(Json(&o.items))
        .bind(Json(&o.pricing))
        .bind(o.payment_method)
        .bind(o.gateway)
        .bind(o.status)
        .bind(o.payment_status)
        .bind(o.inventory_state)
        .bind(o.transaction_id)
        .bind(&o.cancellation_reason)
        .bind(Json(&o.status_history))
        .bind(o.version)
        .bind(o.created_at)
        .bind(o.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_order(&self, order_id: &str) -> CommerceResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = $1"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Order::from))
    }

    async fn swap_order(&self, expected_version: i64, o: &Order) -> CommerceResult<bool> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE orders
            SET status = $1, payment_status = $2, inventory_state = $3, transaction_id = $4,
                cancellation_reason = $5, status_history = $6, version = $7, updated_at = $8
            WHERE order_id = $9 AND version = $10
            "#,
        )
        .bind(o.status)
        .bind(o.payment_status)
        .bind(o.inventory_state)
        .bind(o.transaction_id)
        .bind(&o.cancellation_reason)
        .bind(Json(&o.status_history))
        .bind(o.version)
        .bind(o.updated_at)
        .bind(&o.order_id)
        .bind(expected_version)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected == 1)
    }

    async fn list_orders(&self, user_id: &str, limit: i64, offset: i64) -> CommerceResult<(Vec<Order>, i64)> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM orders WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        Ok((rows.into_iter().map(Order::from).collect(), total))
    }
}
