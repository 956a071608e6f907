use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::CommerceResult;
use crate::models::{
    LedgerPosting, Order, Outcome, StockKey, StockRecord, Transaction, TransactionStatus,
    WalletAccount, WalletLedgerEntry,
};

/// Persistence for stock records.
///
/// Writes are conditioned on `version`: `swap_stock` stores `next` only if the
/// stored row still has `expected_version`, and reports whether it did.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn find_stock(&self, key: &StockKey) -> CommerceResult<Option<StockRecord>>;

    /// Inserts `record` unless the key exists. Returns whichever row is stored.
    async fn insert_stock(&self, record: &StockRecord) -> CommerceResult<StockRecord>;

    async fn swap_stock(&self, expected_version: i64, next: &StockRecord) -> CommerceResult<bool>;

    async fn list_stock(&self, location_id: Option<&str>) -> CommerceResult<Vec<StockRecord>>;
}

/// Persistence for wallets and their ledgers.
///
/// `post` must check the balance, change it and append the ledger entry as
/// one atomic step. A posting whose `reference_id` is already on the wallet
/// is not applied again; the original entry comes back as `AlreadyProcessed`.
#[async_trait]
pub trait WalletStore: Send + Sync {
    async fn create_wallet(&self, user_id: &str, currency: &str) -> CommerceResult<WalletAccount>;

    async fn find_wallet(&self, user_id: &str) -> CommerceResult<Option<WalletAccount>>;

    async fn post(&self, posting: &LedgerPosting) -> CommerceResult<Outcome<WalletLedgerEntry>>;

    /// Newest first, with the total entry count.
    async fn ledger(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> CommerceResult<(Vec<WalletLedgerEntry>, i64)>;
}

/// Persistence for payment transactions. Writes are conditioned on `version`.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn insert_transaction(&self, transaction: &Transaction) -> CommerceResult<()>;

    async fn find_transaction(&self, id: Uuid) -> CommerceResult<Option<Transaction>>;

    /// Lookup used by webhooks: gateway order id first, then gateway payment id.
    async fn find_by_gateway_reference(
        &self,
        gateway_order_id: Option<&str>,
        gateway_transaction_id: Option<&str>,
    ) -> CommerceResult<Option<Transaction>>;

    async fn swap_transaction(&self, expected_version: i64, next: &Transaction) -> CommerceResult<bool>;

    /// Newest first, with the total matching count.
    async fn list_for_user(
        &self,
        user_id: &str,
        status: Option<TransactionStatus>,
        limit: i64,
        offset: i64,
    ) -> CommerceResult<(Vec<Transaction>, i64)>;

    /// Oldest first.
    async fn list_for_order(&self, order_id: &str) -> CommerceResult<Vec<Transaction>>;
}

/// Persistence for orders. Writes are conditioned on `version`.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert_order(&self, order: &Order) -> CommerceResult<()>;

    async fn find_order(&self, order_id: &str) -> CommerceResult<Option<Order>>;

    async fn swap_order(&self, expected_version: i64, next: &Order) -> CommerceResult<bool>;

    async fn list_orders(&self, user_id: &str, limit: i64, offset: i64) -> CommerceResult<(Vec<Order>, i64)>;
}

/// Everything the service persists.
pub trait CommerceStore: InventoryStore + WalletStore + TransactionStore + OrderStore {}

impl<T> CommerceStore for T where T: InventoryStore + WalletStore + TransactionStore + OrderStore {}

/// Attempts made by a conditioned-write loop before giving up with
/// `ConcurrentUpdate`.
pub const MAX_WRITE_ATTEMPTS: usize = 16;
