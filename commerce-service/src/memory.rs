use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::errors::{CommerceError, CommerceResult};
use crate::models::{
    LedgerPosting, Order, Outcome, StockKey, StockRecord, Transaction, TransactionStatus,
    WalletAccount, WalletLedgerEntry,
};
use crate::store::{InventoryStore, OrderStore, TransactionStore, WalletStore};

/// In-process store with the same conditioned-write semantics as `PgStore`.
///
/// Each table sits behind its own mutex; every trait method holds at most
/// one lock and never across an await on anything else.
#[derive(Default)]
pub struct MemoryStore {
    stock: Mutex<HashMap<StockKey, StockRecord>>,
    wallets: Mutex<WalletTables>,
    transactions: Mutex<HashMap<Uuid, Transaction>>,
    orders: Mutex<HashMap<String, Order>>,
}

#[derive(Default)]
struct WalletTables {
    accounts: HashMap<String, WalletAccount>,
    entries: Vec<WalletLedgerEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn page<T: Clone>(items: &[T], limit: i64, offset: i64) -> Vec<T> {
    items
        .iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .cloned()
        .collect()
}

#[async_trait]
impl InventoryStore for MemoryStore {
    async fn find_stock(&self, key: &StockKey) -> CommerceResult<Option<StockRecord>> {
        Ok(self.stock.lock().await.get(key).cloned())
    }

    async fn insert_stock(&self, record: &StockRecord) -> CommerceResult<StockRecord> {
        let mut stock = self.stock.lock().await;
        Ok(stock
            .entry(record.key())
            .or_insert_with(|| record.clone())
            .clone())
    }

    async fn swap_stock(&self, expected_version: i64, next: &StockRecord) -> CommerceResult<bool> {
        let mut stock = self.stock.lock().await;
        match stock.get_mut(&next.key()) {
            Some(current) if current.version == expected_version => {
                *current = next.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(CommerceError::StockNotFound {
                variant_id: next.variant_id.clone(),
                location_id: next.location_id.clone(),
            }),
        }
    }

    async fn list_stock(&self, location_id: Option<&str>) -> CommerceResult<Vec<StockRecord>> {
        let stock = self.stock.lock().await;
        let mut records: Vec<StockRecord> = stock
            .values()
            .filter(|s| location_id.map_or(true, |l| s.location_id == l))
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            (&a.location_id, &a.variant_id).cmp(&(&b.location_id, &b.variant_id))
        });
        Ok(records)
    }
}

#[async_trait]
impl WalletStore for MemoryStore {
    async fn create_wallet(&self, user_id: &str, currency: &str) -> CommerceResult<WalletAccount> {
        let mut tables = self.wallets.lock().await;
        let now = Utc::now();
        Ok(tables
            .accounts
            .entry(user_id.to_string())
            .or_insert_with(|| WalletAccount {
                id: Uuid::new_v4(),
                user_id: user_id.to_string(),
                balance: rust_decimal::Decimal::ZERO,
                currency: currency.to_string(),
                created_at: now,
                updated_at: now,
            })
            .clone())
    }

    async fn find_wallet(&self, user_id: &str) -> CommerceResult<Option<WalletAccount>> {
        Ok(self.wallets.lock().await.accounts.get(user_id).cloned())
    }

    async fn post(&self, posting: &LedgerPosting) -> CommerceResult<Outcome<WalletLedgerEntry>> {
        let mut tables = self.wallets.lock().await;
        let WalletTables { accounts, entries } = &mut *tables;

        let wallet = accounts
            .get_mut(&posting.user_id)
            .ok_or_else(|| CommerceError::WalletNotFound(posting.user_id.clone()))?;

        if let Some(existing) = entries
            .iter()
            .find(|e| e.wallet_id == wallet.id && e.reference_id == posting.reference_id)
        {
            return Ok(Outcome::AlreadyProcessed(existing.clone()));
        }

        let balance = wallet.balance_after(posting.entry_type, posting.amount)?;
        let now = Utc::now();
        wallet.balance = balance;
        wallet.updated_at = now;

        let entry = WalletLedgerEntry {
            id: Uuid::new_v4(),
            wallet_id: wallet.id,
            user_id: wallet.user_id.clone(),
            entry_type: posting.entry_type,
            amount: posting.amount,
            balance_after: balance,
            reference_id: posting.reference_id.clone(),
            description: posting.description.clone(),
            created_at: now,
        };
        entries.push(entry.clone());
        Ok(Outcome::Applied(entry))
    }

    async fn ledger(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> CommerceResult<(Vec<WalletLedgerEntry>, i64)> {
        let tables = self.wallets.lock().await;
        // Entries are appended in order, so reversing gives newest first.
        let mine: Vec<WalletLedgerEntry> = tables
            .entries
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        Ok((page(&mine, limit, offset), mine.len() as i64))
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn insert_transaction(&self, transaction: &Transaction) -> CommerceResult<()> {
        let mut transactions = self.transactions.lock().await;
        if transactions.contains_key(&transaction.id) {
            return Err(CommerceError::Internal(format!(
                "duplicate transaction id {}",
                transaction.id
            )));
        }
        transactions.insert(transaction.id, transaction.clone());
        Ok(())
    }

    async fn find_transaction(&self, id: Uuid) -> CommerceResult<Option<Transaction>> {
        Ok(self.transactions.lock().await.get(&id).cloned())
    }

    async fn find_by_gateway_reference(
        &self,
        gateway_order_id: Option<&str>,
        gateway_transaction_id: Option<&str>,
    ) -> CommerceResult<Option<Transaction>> {
        let transactions = self.transactions.lock().await;
        let by_order = gateway_order_id.and_then(|id| {
            transactions
                .values()
                .find(|t| t.gateway_order_id.as_deref() == Some(id))
        });
        let found = by_order.or_else(|| {
            gateway_transaction_id.and_then(|id| {
                transactions
                    .values()
                    .find(|t| t.gateway_transaction_id.as_deref() == Some(id))
            })
        });
        Ok(found.cloned())
    }

    async fn swap_transaction(&self, expected_version: i64, next: &Transaction) -> CommerceResult<bool> {
        let mut transactions = self.transactions.lock().await;
        match transactions.get_mut(&next.id) {
            Some(current) if current.version == expected_version => {
                *current = next.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(CommerceError::TransactionNotFound(next.id.to_string())),
        }
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        status: Option<TransactionStatus>,
        limit: i64,
        offset: i64,
    ) -> CommerceResult<(Vec<Transaction>, i64)> {
        let transactions = self.transactions.lock().await;
        let mut mine: Vec<Transaction> = transactions
            .values()
            .filter(|t| t.user_id == user_id && status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        mine.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok((page(&mine, limit, offset), mine.len() as i64))
    }

    async fn list_for_order(&self, order_id: &str) -> CommerceResult<Vec<Transaction>> {
        let transactions = self.transactions.lock().await;
        let mut for_order: Vec<Transaction> = transactions
            .values()
            .filter(|t| t.order_id == order_id)
            .cloned()
            .collect();
        for_order.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(for_order)
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert_order(&self, order: &Order) -> CommerceResult<()> {
        let mut orders = self.orders.lock().await;
        if orders.contains_key(&order.order_id) {
            return Err(CommerceError::Internal(format!(
                "duplicate order id {}",
                order.order_id
            )));
        }
        orders.insert(order.order_id.clone(), order.clone());
        Ok(())
    }

    async fn find_order(&self, order_id: &str) -> CommerceResult<Option<Order>> {
        Ok(self.orders.lock().await.get(order_id).cloned())
    }

    async fn swap_order(&self, expected_version: i64, next: &Order) -> CommerceResult<bool> {
        let mut orders = self.orders.lock().await;
        match orders.get_mut(&next.order_id) {
            Some(current) if current.version == expected_version => {
                *current = next.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(CommerceError::OrderNotFound(next.order_id.clone())),
        }
    }

    async fn list_orders(&self, user_id: &str, limit: i64, offset: i64) -> CommerceResult<(Vec<Order>, i64)> {
        let orders = self.orders.lock().await;
        let mut mine: Vec<Order> = orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        mine.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok((page(&mine, limit, offset), mine.len() as i64))
    }
}
