use rust_decimal::Decimal;
use std::sync::Arc;

use crate::config::WalletSettings;
use crate::errors::{CommerceError, CommerceResult};
use crate::events::{CommerceEvent, Notifier};
use crate::models::{
    page_window, LedgerEntryType, LedgerPosting, Outcome, Page, WalletAccount, WalletLedgerEntry,
};
use crate::store::WalletStore;

/// Per-user wallet with an append-only ledger.
///
/// The store applies each posting atomically (balance check, balance
/// change, ledger append), and a repeated `reference_id` is never applied
/// twice.
#[derive(Clone)]
pub struct WalletLedger {
    store: Arc<dyn WalletStore>,
    notifier: Notifier,
    currency: String,
    settings: WalletSettings,
}

impl WalletLedger {
    pub fn new(
        store: Arc<dyn WalletStore>,
        notifier: Notifier,
        currency: impl Into<String>,
        settings: WalletSettings,
    ) -> Self {
        Self {
            store,
            notifier,
            currency: currency.into(),
            settings,
        }
    }

    /// Returns the existing wallet if the user already has one.
    pub async fn create_wallet(&self, user_id: &str) -> CommerceResult<WalletAccount> {
        if user_id.trim().is_empty() {
            return Err(CommerceError::Validation("user_id is required".to_string()));
        }
        let wallet = self.store.create_wallet(user_id, &self.currency).await?;
        tracing::info!(user_id = %user_id, wallet_id = %wallet.id, "Wallet ready");
        Ok(wallet)
    }

    pub async fn get_wallet(&self, user_id: &str) -> CommerceResult<WalletAccount> {
        self.store
            .find_wallet(user_id)
            .await?
            .ok_or_else(|| CommerceError::WalletNotFound(user_id.to_string()))
    }

    pub async fn balance(&self, user_id: &str) -> CommerceResult<Decimal> {
        Ok(self.get_wallet(user_id).await?.balance)
    }

    pub async fn credit(
        &self,
        user_id: &str,
        amount: Decimal,
        description: &str,
        reference_id: &str,
    ) -> CommerceResult<Outcome<WalletLedgerEntry>> {
        self.post(user_id, LedgerEntryType::Credit, amount, description, reference_id)
            .await
    }

    pub async fn debit(
        &self,
        user_id: &str,
        amount: Decimal,
        description: &str,
        reference_id: &str,
    ) -> CommerceResult<Outcome<WalletLedgerEntry>> {
        self.post(user_id, LedgerEntryType::Debit, amount, description, reference_id)
            .await
    }

    /// Customer-initiated top-up, bounded by the configured limits.
    pub async fn top_up(
        &self,
        user_id: &str,
        amount: Decimal,
        description: Option<&str>,
        reference_id: &str,
    ) -> CommerceResult<Outcome<WalletLedgerEntry>> {
        if amount < self.settings.min_top_up || amount > self.settings.max_top_up {
            return Err(CommerceError::Validation(format!(
                "Amount must be between {} and {}",
                self.settings.min_top_up, self.settings.max_top_up
            )));
        }
        self.credit(user_id, amount, description.unwrap_or("Wallet top-up"), reference_id)
            .await
    }

    /// Ledger entries newest first.
    pub async fn history(
        &self,
        user_id: &str,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> CommerceResult<Page<WalletLedgerEntry>> {
        let (limit, offset) = page_window(limit, offset);
        let (entries, total) = self.store.ledger(user_id, limit, offset).await?;
        Ok(Page::new(entries, total, offset))
    }

    async fn post(
        &self,
        user_id: &str,
        entry_type: LedgerEntryType,
        amount: Decimal,
        description: &str,
        reference_id: &str,
    ) -> CommerceResult<Outcome<WalletLedgerEntry>> {
        if amount <= Decimal::ZERO {
            return Err(CommerceError::Validation(
                "Amount must be positive".to_string(),
            ));
        }
        if reference_id.trim().is_empty() {
            return Err(CommerceError::Validation(
                "reference_id is required".to_string(),
            ));
        }

        let posting = LedgerPosting {
            user_id: user_id.to_string(),
            entry_type,
            amount,
            reference_id: reference_id.to_string(),
            description: description.to_string(),
        };

        let outcome = self.store.post(&posting).await?;
        match &outcome {
            Outcome::Applied(entry) => {
                tracing::info!(
                    user_id = %user_id,
                    entry_type = %entry_type,
                    amount = %amount,
                    balance_after = %entry.balance_after,
                    reference_id = %reference_id,
                    "Wallet entry posted"
                );
                self.notifier.dispatch(CommerceEvent::wallet_entry(entry));
            }
            Outcome::AlreadyProcessed(_) => {
                tracing::info!(
                    user_id = %user_id,
                    reference_id = %reference_id,
                    "Wallet posting already applied, skipping"
                );
            }
        }
        Ok(outcome)
    }
}
