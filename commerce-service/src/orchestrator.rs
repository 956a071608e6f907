use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::PaymentSettings;
use crate::errors::{CommerceError, CommerceResult};
use crate::events::{CommerceEvent, Notifier};
use crate::gateway::{bounded, GatewayAdapter, Gateways, IntentRequest, PaymentStatus, RefundCall};
use crate::models::{
    audit, page_window, CodVerificationStatus, Gateway, Outcome, Page, PaymentMethod, Transaction,
    TransactionStatus,
};
use crate::store::{TransactionStore, MAX_WRITE_ATTEMPTS};
use crate::wallet::WalletLedger;

/// Everything needed to open a payment attempt.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub user_id: String,
    pub order_id: String,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub gateway: Gateway,
    /// Credited to the wallet once the payment succeeds.
    pub cashback: Decimal,
    pub metadata: Value,
}

pub fn debit_reference(transaction_id: Uuid) -> String {
    format!("txn:{}:debit", transaction_id)
}

pub fn cashback_reference(transaction_id: Uuid) -> String {
    format!("txn:{}:cashback", transaction_id)
}

pub fn refund_reference(transaction_id: Uuid, sequence: usize) -> String {
    format!("txn:{}:refund:{}", transaction_id, sequence)
}

fn debit_reversal_reference(transaction_id: Uuid) -> String {
    format!("txn:{}:debit-reversal", transaction_id)
}

/// Drives payment transactions through
/// `PENDING -> PROCESSING -> SUCCESS | FAILED`, then `SUCCESS -> (PARTIALLY_)REFUNDED`.
///
/// Every write is conditioned on the version read, so concurrent callers
/// (client confirmation racing a webhook) serialize on the transaction row.
/// Wallet side effects use derived reference ids and are never applied twice.
#[derive(Clone)]
pub struct TransactionOrchestrator {
    store: Arc<dyn TransactionStore>,
    wallet: WalletLedger,
    gateways: Gateways,
    notifier: Notifier,
    settings: PaymentSettings,
}

impl TransactionOrchestrator {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        wallet: WalletLedger,
        gateways: Gateways,
        notifier: Notifier,
        settings: PaymentSettings,
    ) -> Self {
        Self {
            store,
            wallet,
            gateways,
            notifier,
            settings,
        }
    }

    pub fn gateways(&self) -> &Gateways {
        &self.gateways
    }

    pub async fn get(&self, id: Uuid) -> CommerceResult<Transaction> {
        self.store
            .find_transaction(id)
            .await?
            .ok_or_else(|| CommerceError::TransactionNotFound(id.to_string()))
    }

    pub async fn history(
        &self,
        user_id: &str,
        status: Option<TransactionStatus>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> CommerceResult<Page<Transaction>> {
        let (limit, offset) = page_window(limit, offset);
        let (items, total) = self.store.list_for_user(user_id, status, limit, offset).await?;
        Ok(Page::new(items, total, offset))
    }

    pub async fn for_order(&self, order_id: &str) -> CommerceResult<Vec<Transaction>> {
        self.store.list_for_order(order_id).await
    }

    pub async fn find_by_gateway_reference(
        &self,
        gateway_order_id: Option<&str>,
        gateway_transaction_id: Option<&str>,
    ) -> CommerceResult<Option<Transaction>> {
        if gateway_order_id.is_none() && gateway_transaction_id.is_none() {
            return Ok(None);
        }
        self.store
            .find_by_gateway_reference(gateway_order_id, gateway_transaction_id)
            .await
    }

    /// Opens a transaction and asks the gateway for an intent.
    ///
    /// A wallet without enough balance fails the transaction on the spot and
    /// returns `InsufficientWalletBalance`. A gateway timeout leaves it
    /// PROCESSING for a webhook or `reconcile` to settle.
    pub async fn initiate(&self, request: PaymentRequest) -> CommerceResult<Transaction> {
        self.open(request, None).await
    }

    /// `retry_of` names the failed attempt this one replaces and the chain
    /// depth the new attempt starts at.
    async fn open(&self, request: PaymentRequest, retry_of: Option<(Uuid, i32)>) -> CommerceResult<Transaction> {
        let (retry_of, retry_count) = match retry_of {
            Some((previous, depth)) => (Some(previous), depth),
            None => (None, 0),
        };
        validate(&request)?;
        let adapter = self.gateways.adapter(request.gateway)?;

        let now = Utc::now();
        let mut txn = Transaction {
            id: Uuid::new_v4(),
            order_id: request.order_id,
            user_id: request.user_id,
            amount: request.amount,
            currency: self.settings.currency.clone(),
            payment_method: request.payment_method,
            gateway: request.gateway,
            status: TransactionStatus::Pending,
            gateway_order_id: None,
            gateway_transaction_id: None,
            retry_count,
            retry_of,
            refund_amount: Decimal::ZERO,
            refunded_at: None,
            cashback_amount: request.cashback,
            cashback_applied: false,
            cod_verification_status: if request.gateway == Gateway::Cod {
                CodVerificationStatus::Pending
            } else {
                CodVerificationStatus::NotApplicable
            },
            failure_reason: None,
            metadata: request.metadata,
            audit_log: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        };
        txn.record(
            audit::PAYMENT_INITIATED,
            json!({
                "amount": txn.amount.to_string(),
                "gateway": txn.gateway,
                "paymentMethod": txn.payment_method,
                "retryOf": retry_of,
            }),
        );
        self.store.insert_transaction(&txn).await?;

        tracing::info!(
            transaction_id = %txn.id,
            order_id = %txn.order_id,
            user_id = %txn.user_id,
            gateway = %txn.gateway,
            amount = %txn.amount,
            "Payment initiated"
        );

        let intent_request = IntentRequest {
            transaction_id: txn.id,
            order_id: &txn.order_id,
            user_id: &txn.user_id,
            amount: txn.amount,
            currency: &txn.currency,
            metadata: &txn.metadata,
        };
        let intent = bounded(
            txn.gateway,
            "create_intent",
            self.settings.gateway_timeout,
            adapter.create_intent(&intent_request),
        )
        .await;

        match intent {
            Ok(intent) => {
                let (txn, _) = self
                    .write(txn.id, |t| {
                        t.gateway_order_id = intent.gateway_order_id.clone();
                        t.transition(
                            TransactionStatus::Processing,
                            audit::PAYMENT_PROCESSING,
                            json!({ "gatewayOrderId": intent.gateway_order_id, "gateway": intent.details }),
                        )?;
                        Ok(Outcome::Applied(()))
                    })
                    .await?;
                tracing::info!(transaction_id = %txn.id, gateway_order_id = ?txn.gateway_order_id, "Payment processing");
                Ok(txn)
            }
            Err(CommerceError::GatewayTimeout { operation, .. }) => {
                let timeout_ms = self.settings.gateway_timeout.as_millis() as u64;
                let (txn, _) = self
                    .write(txn.id, |t| {
                        t.transition(
                            TransactionStatus::Processing,
                            audit::GATEWAY_TIMEOUT,
                            json!({ "operation": operation, "timeoutMs": timeout_ms }),
                        )?;
                        Ok(Outcome::Applied(()))
                    })
                    .await?;
                tracing::warn!(transaction_id = %txn.id, "Intent creation timed out, awaiting reconciliation");
                Ok(txn)
            }
            Err(CommerceError::InsufficientFunds { required, available }) if txn.gateway == Gateway::Wallet => {
                let details = json!({ "required": required.to_string(), "available": available.to_string() });
                self.fail_with(txn.id, "InsufficientWalletBalance", details).await?;
                Err(CommerceError::InsufficientWalletBalance {
                    transaction_id: txn.id,
                    required,
                    available,
                })
            }
            Err(e) => {
                let reason = e.to_string();
                self.fail_with(txn.id, &reason, json!({ "error": reason })).await?;
                Err(e)
            }
        }
    }

    /// Settles a PROCESSING transaction.
    ///
    /// Confirming again with the same gateway transaction id returns
    /// `AlreadyProcessed` without touching the wallet. For wallet payments
    /// the debit is posted before the transition is committed.
    pub async fn confirm(
        &self,
        id: Uuid,
        gateway_transaction_id: &str,
        gateway_data: Value,
    ) -> CommerceResult<Outcome<Transaction>> {
        if gateway_transaction_id.trim().is_empty() {
            return Err(CommerceError::Validation(
                "gateway_transaction_id is required".to_string(),
            ));
        }

        let mut debit_applied = false;
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let current = self.get(id).await?;

            if current.status.is_settled() {
                if current.gateway_transaction_id.as_deref() == Some(gateway_transaction_id) {
                    tracing::info!(transaction_id = %id, "Transaction already confirmed, skipping");
                    return Ok(Outcome::AlreadyProcessed(current));
                }
                return Err(CommerceError::InvalidTransition {
                    from: current.status,
                    to: TransactionStatus::Success,
                });
            }
            if current.status != TransactionStatus::Processing {
                if debit_applied {
                    self.reverse_debit(&current).await;
                }
                return Err(CommerceError::InvalidTransition {
                    from: current.status,
                    to: TransactionStatus::Success,
                });
            }

            if current.gateway == Gateway::Wallet {
                let debit = self
                    .wallet
                    .debit(
                        &current.user_id,
                        current.amount,
                        &format!("Payment for order {}", current.order_id),
                        &debit_reference(id),
                    )
                    .await;
                match debit {
                    Ok(outcome) => debit_applied |= outcome.was_applied(),
                    Err(CommerceError::InsufficientFunds { required, available }) => {
                        self.fail_with(
                            id,
                            "InsufficientFunds",
                            json!({ "required": required.to_string(), "available": available.to_string() }),
                        )
                        .await?;
                        return Err(CommerceError::InsufficientFunds { required, available });
                    }
                    Err(e) => return Err(e),
                }
            }

            let mut next = current.next_version();
            next.gateway_transaction_id = Some(gateway_transaction_id.to_string());
            next.transition(
                TransactionStatus::Success,
                audit::PAYMENT_CONFIRMED,
                json!({ "gatewayTransactionId": gateway_transaction_id, "gatewayData": gateway_data }),
            )?;

            if self.store.swap_transaction(current.version, &next).await? {
                tracing::info!(
                    transaction_id = %id,
                    order_id = %next.order_id,
                    gateway = %next.gateway,
                    amount = %next.amount,
                    "Payment confirmed"
                );
                let confirmed = self.apply_cashback(next).await;
                self.notifier.dispatch(CommerceEvent::payment_confirmed(&confirmed));
                return Ok(Outcome::Applied(confirmed));
            }

            tracing::debug!(transaction_id = %id, attempt, "Transaction version moved, retrying confirm");
            tokio::task::yield_now().await;
        }

        Err(CommerceError::ConcurrentUpdate)
    }

    /// PROCESSING (or PENDING) to FAILED. Failing a FAILED transaction is a no-op.
    pub async fn fail(&self, id: Uuid, reason: &str) -> CommerceResult<Outcome<Transaction>> {
        self.fail_with(id, reason, json!({ "reason": reason })).await
    }

    async fn fail_with(&self, id: Uuid, reason: &str, details: Value) -> CommerceResult<Outcome<Transaction>> {
        let (txn, outcome) = self
            .write(id, |t| {
                if t.status == TransactionStatus::Failed {
                    return Ok(Outcome::AlreadyProcessed(()));
                }
                t.transition(TransactionStatus::Failed, audit::PAYMENT_FAILED, details.clone())?;
                t.failure_reason = Some(reason.to_string());
                Ok(Outcome::Applied(()))
            })
            .await?;

        if outcome.was_applied() {
            tracing::info!(transaction_id = %id, order_id = %txn.order_id, reason = %reason, "Payment failed");
            self.notifier.dispatch(CommerceEvent::payment_failed(&txn));
            Ok(Outcome::Applied(txn))
        } else {
            Ok(Outcome::AlreadyProcessed(txn))
        }
    }

    /// Opens a fresh transaction for a FAILED one.
    ///
    /// Only the latest attempt of an order can be retried, and only while no
    /// other attempt is open or paid. The new attempt inherits the chain
    /// depth, so `max_retries` bounds retries per order rather than per row.
    pub async fn retry(&self, id: Uuid) -> CommerceResult<Transaction> {
        let max = self.settings.max_retries;
        let current = self.get(id).await?;
        let siblings = self.for_order(&current.order_id).await?;
        for sibling in siblings.iter().filter(|s| s.id != id) {
            if sibling.status.is_settled() {
                return Err(CommerceError::CannotRetrySuccessful);
            }
            if sibling.retry_of == Some(id)
                || matches!(sibling.status, TransactionStatus::Pending | TransactionStatus::Processing)
            {
                return Err(CommerceError::AttemptSuperseded(id));
            }
        }

        let (original, outcome) = self
            .write(id, |t| {
                match t.status {
                    TransactionStatus::Failed => {}
                    status if status.is_settled() => return Err(CommerceError::CannotRetrySuccessful),
                    status => {
                        return Err(CommerceError::InvalidTransition {
                            from: status,
                            to: TransactionStatus::Pending,
                        })
                    }
                }
                // A concurrent retry of the same attempt loses here.
                if t.audit_count(audit::PAYMENT_RETRY) > 0 {
                    return Err(CommerceError::AttemptSuperseded(t.id));
                }
                if t.retry_count >= max as i32 {
                    return Err(CommerceError::RetryLimitExceeded { max });
                }
                let attempt = t.retry_count + 1;
                t.record(audit::PAYMENT_RETRY, json!({ "attempt": attempt }));
                Ok(Outcome::Applied(attempt))
            })
            .await?;
        let attempt = outcome.into_inner();

        tracing::info!(
            transaction_id = %id,
            order_id = %original.order_id,
            attempt,
            "Retrying payment"
        );

        self.open(
            PaymentRequest {
                user_id: original.user_id.clone(),
                order_id: original.order_id.clone(),
                amount: original.amount,
                payment_method: original.payment_method,
                gateway: original.gateway,
                cashback: original.cashback_amount,
                metadata: original.metadata.clone(),
            },
            Some((original.id, attempt)),
        )
        .await
    }

    /// Refunds `amount`, or everything not yet refunded, into the wallet.
    ///
    /// The refund is recorded on the transaction first so concurrent refunds
    /// cannot overshoot. If the gateway refund then fails, that record is
    /// reversed and the error returned.
    ///
    /// A refund that reached the gateway but never landed in the wallet stays
    /// open on the transaction. The next call completes it under the same
    /// idempotency key and reference, and returns without opening another.
    pub async fn refund(&self, id: Uuid, amount: Option<Decimal>) -> CommerceResult<Transaction> {
        if let Some(amount) = amount {
            if amount <= Decimal::ZERO {
                return Err(CommerceError::Validation(
                    "Refund amount must be positive".to_string(),
                ));
            }
        }

        let current = self.get(id).await?;
        let adapter = self.gateways.adapter(current.gateway)?;

        let open = current.pending_refunds();
        if !open.is_empty() {
            let mut txn = current;
            for (sequence, pending) in open {
                tracing::warn!(transaction_id = %id, sequence, amount = %pending, "Resuming interrupted refund");
                txn = self.settle_refund(id, &adapter, pending, sequence).await?;
            }
            return Ok(txn);
        }

        let (_, outcome) = self
            .write(id, |t| {
                if !matches!(
                    t.status,
                    TransactionStatus::Success | TransactionStatus::PartiallyRefunded | TransactionStatus::Refunded
                ) {
                    return Err(CommerceError::InvalidTransition {
                        from: t.status,
                        to: TransactionStatus::Refunded,
                    });
                }
                let available = t.refundable();
                let requested = amount.unwrap_or(available);
                if requested <= Decimal::ZERO || requested > available {
                    return Err(CommerceError::RefundExceedsAvailable { requested, available });
                }

                let sequence = t.audit_count(audit::REFUND_REQUESTED) + 1;
                t.refund_amount += requested;
                let next = if t.refund_amount >= t.amount {
                    TransactionStatus::Refunded
                } else {
                    TransactionStatus::PartiallyRefunded
                };
                t.transition(
                    next,
                    audit::REFUND_REQUESTED,
                    json!({ "amount": requested.to_string(), "sequence": sequence }),
                )?;
                Ok(Outcome::Applied((requested, sequence)))
            })
            .await?;
        let (requested, sequence) = outcome.into_inner();
        self.settle_refund(id, &adapter, requested, sequence).await
    }

    /// Sends refund `sequence` to the gateway and credits the wallet. Both
    /// calls are keyed by the refund reference, so repeating this for the
    /// same sequence moves money once.
    async fn settle_refund(
        &self,
        id: Uuid,
        adapter: &GatewayAdapter,
        requested: Decimal,
        sequence: usize,
    ) -> CommerceResult<Transaction> {
        let txn = self.get(id).await?;
        let reference = refund_reference(id, sequence);

        let call = RefundCall {
            gateway_order_id: txn.gateway_order_id.as_deref(),
            gateway_transaction_id: txn.gateway_transaction_id.as_deref(),
            amount: requested,
            currency: &txn.currency,
            idempotency_key: &reference,
        };
        let result = bounded(txn.gateway, "refund", self.settings.gateway_timeout, adapter.refund(&call)).await;

        let refund = match result {
            Ok(refund) => refund,
            Err(e) => {
                tracing::error!(transaction_id = %id, amount = %requested, error = %e, "Gateway refund failed");
                self.revert_refund(id, requested, sequence, &e).await;
                return Err(e);
            }
        };

        // Past this point the gateway has paid out. A failed credit leaves
        // the refund open for the next call to finish.
        self.wallet.create_wallet(&txn.user_id).await?;
        let entry = self
            .wallet
            .credit(
                &txn.user_id,
                requested,
                &format!("Refund for order {}", txn.order_id),
                &reference,
            )
            .await?
            .into_inner();

        let (txn, outcome) = self
            .write(id, |t| {
                if refund_closed(t, sequence) {
                    return Ok(Outcome::AlreadyProcessed(()));
                }
                t.refunded_at = Some(Utc::now());
                t.record(
                    audit::REFUND_PROCESSED,
                    json!({
                        "amount": requested.to_string(),
                        "sequence": sequence,
                        "refundId": refund.refund_id,
                        "ledgerEntryId": entry.id,
                        "gateway": refund.details,
                    }),
                );
                Ok(Outcome::Applied(()))
            })
            .await?;
        if !outcome.was_applied() {
            return Ok(txn);
        }

        tracing::info!(
            transaction_id = %id,
            order_id = %txn.order_id,
            amount = %requested,
            total_refunded = %txn.refund_amount,
            status = %txn.status,
            "Refund processed"
        );
        self.notifier.dispatch(CommerceEvent::RefundProcessed {
            transaction_id: txn.id,
            order_id: txn.order_id.clone(),
            user_id: txn.user_id.clone(),
            amount: requested,
            total_refunded: txn.refund_amount,
            timestamp: Utc::now(),
        });
        Ok(txn)
    }

    /// Courier outcome for a cash-on-delivery payment.
    pub async fn verify_cod(
        &self,
        id: Uuid,
        verification: CodVerificationStatus,
    ) -> CommerceResult<Outcome<Transaction>> {
        let (txn, outcome) = self
            .write(id, |t| {
                if t.gateway != Gateway::Cod {
                    return Err(CommerceError::NotCashOnDelivery(t.id));
                }
                match verification {
                    CodVerificationStatus::Verified => {
                        if t.status.is_settled() {
                            return Ok(Outcome::AlreadyProcessed(()));
                        }
                        t.cod_verification_status = CodVerificationStatus::Verified;
                        t.transition(
                            TransactionStatus::Success,
                            audit::COD_VERIFICATION,
                            json!({ "verificationStatus": verification }),
                        )?;
                    }
                    CodVerificationStatus::Rejected => {
                        if t.status == TransactionStatus::Failed
                            && t.cod_verification_status == CodVerificationStatus::Rejected
                        {
                            return Ok(Outcome::AlreadyProcessed(()));
                        }
                        t.cod_verification_status = CodVerificationStatus::Rejected;
                        t.transition(
                            TransactionStatus::Failed,
                            audit::COD_VERIFICATION,
                            json!({ "verificationStatus": verification }),
                        )?;
                        t.failure_reason = Some("Cash on delivery rejected".to_string());
                    }
                    other => {
                        return Err(CommerceError::Validation(format!(
                            "Unsupported verification status {:?}",
                            other
                        )))
                    }
                }
                Ok(Outcome::Applied(()))
            })
            .await?;

        if !outcome.was_applied() {
            return Ok(Outcome::AlreadyProcessed(txn));
        }

        tracing::info!(transaction_id = %id, status = %txn.status, "COD verification recorded");
        if txn.status == TransactionStatus::Success {
            let txn = self.apply_cashback(txn).await;
            self.notifier.dispatch(CommerceEvent::payment_confirmed(&txn));
            Ok(Outcome::Applied(txn))
        } else {
            self.notifier.dispatch(CommerceEvent::payment_failed(&txn));
            Ok(Outcome::Applied(txn))
        }
    }

    /// Polls the card processor for a PROCESSING transaction and applies
    /// what it reports. Anything else is returned unchanged.
    pub async fn reconcile(&self, id: Uuid) -> CommerceResult<Transaction> {
        let txn = self.get(id).await?;
        if txn.status != TransactionStatus::Processing {
            return Ok(txn);
        }
        let Some(gateway_order_id) = txn.gateway_order_id.clone() else {
            return Ok(txn);
        };
        let adapter = self.gateways.adapter(txn.gateway)?;
        if !adapter.is_external() {
            return Ok(txn);
        }

        let status = bounded(
            txn.gateway,
            "fetch_status",
            self.settings.gateway_timeout,
            adapter.fetch_status(&gateway_order_id),
        )
        .await?;

        tracing::info!(transaction_id = %id, gateway_status = ?status, "Reconciled with gateway");
        match status {
            PaymentStatus::Paid { gateway_transaction_id } => Ok(self
                .confirm(id, &gateway_transaction_id, json!({ "source": "reconcile" }))
                .await?
                .into_inner()),
            PaymentStatus::Failed { reason } => Ok(self.fail(id, &reason).await?.into_inner()),
            PaymentStatus::Pending => Ok(txn),
        }
    }

    /// Credits the cashback once. A failure here leaves the payment settled
    /// and `cashback_applied` false.
    async fn apply_cashback(&self, txn: Transaction) -> Transaction {
        if txn.cashback_amount <= Decimal::ZERO || txn.cashback_applied {
            return txn;
        }

        let credited = match self.wallet.create_wallet(&txn.user_id).await {
            Ok(_) => {
                self.wallet
                    .credit(
                        &txn.user_id,
                        txn.cashback_amount,
                        &format!("Cashback for order {}", txn.order_id),
                        &cashback_reference(txn.id),
                    )
                    .await
            }
            Err(e) => Err(e),
        };
        let entry = match credited {
            Ok(outcome) => outcome.into_inner(),
            Err(e) => {
                tracing::warn!(transaction_id = %txn.id, error = %e, "Cashback credit failed");
                return txn;
            }
        };

        let amount = txn.cashback_amount;
        let written = self
            .write(txn.id, |t| {
                if t.cashback_applied {
                    return Ok(Outcome::AlreadyProcessed(()));
                }
                t.cashback_applied = true;
                t.record(
                    audit::CASHBACK_APPLIED,
                    json!({ "amount": amount.to_string(), "ledgerEntryId": entry.id }),
                );
                Ok(Outcome::Applied(()))
            })
            .await;
        match written {
            Ok((txn, _)) => txn,
            Err(e) => {
                tracing::warn!(transaction_id = %txn.id, error = %e, "Failed to flag cashback");
                txn
            }
        }
    }

    async fn reverse_debit(&self, txn: &Transaction) {
        let result = self
            .wallet
            .credit(
                &txn.user_id,
                txn.amount,
                &format!("Reversal of payment for order {}", txn.order_id),
                &debit_reversal_reference(txn.id),
            )
            .await;
        if let Err(e) = result {
            tracing::error!(transaction_id = %txn.id, error = %e, "Failed to reverse wallet debit");
        }
    }

    async fn revert_refund(&self, id: Uuid, amount: Decimal, sequence: usize, cause: &CommerceError) {
        let error = cause.to_string();
        let result = self
            .write(id, |t| {
                if refund_closed(t, sequence) {
                    return Ok(Outcome::AlreadyProcessed(()));
                }
                t.refund_amount -= amount;
                t.status = if t.refund_amount <= Decimal::ZERO {
                    TransactionStatus::Success
                } else if t.refund_amount >= t.amount {
                    TransactionStatus::Refunded
                } else {
                    TransactionStatus::PartiallyRefunded
                };
                t.record(
                    audit::REFUND_FAILED,
                    json!({ "amount": amount.to_string(), "sequence": sequence, "error": error }),
                );
                Ok(Outcome::Applied(()))
            })
            .await;
        if let Err(e) = result {
            tracing::error!(transaction_id = %id, error = %e, "Failed to revert refund record");
        }
    }

    /// Conditioned read-modify-write of one transaction. `apply` edits a
    /// copy with the version already bumped; returning `AlreadyProcessed`
    /// skips the write and yields the stored row.
    async fn write<T, F>(&self, id: Uuid, mut apply: F) -> CommerceResult<(Transaction, Outcome<T>)>
    where
        F: FnMut(&mut Transaction) -> CommerceResult<Outcome<T>>,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let current = self.get(id).await?;
            let mut next = current.next_version();
            next.updated_at = Utc::now();
            match apply(&mut next)? {
                Outcome::AlreadyProcessed(value) => return Ok((current, Outcome::AlreadyProcessed(value))),
                Outcome::Applied(value) => {
                    if self.store.swap_transaction(current.version, &next).await? {
                        return Ok((next, Outcome::Applied(value)));
                    }
                }
            }
            tracing::debug!(transaction_id = %id, attempt, "Transaction version moved, retrying");
            tokio::task::yield_now().await;
        }
        Err(CommerceError::ConcurrentUpdate)
    }
}

fn refund_closed(txn: &Transaction, sequence: usize) -> bool {
    !txn.pending_refunds().iter().any(|(open, _)| *open == sequence)
}

fn validate(request: &PaymentRequest) -> CommerceResult<()> {
    if request.user_id.trim().is_empty() || request.order_id.trim().is_empty() {
        return Err(CommerceError::Validation(
            "user_id and order_id are required".to_string(),
        ));
    }
    if request.amount <= Decimal::ZERO {
        return Err(CommerceError::Validation(
            "Amount must be positive".to_string(),
        ));
    }
    if request.cashback < Decimal::ZERO {
        return Err(CommerceError::Validation(
            "Cashback cannot be negative".to_string(),
        ));
    }
    Ok(())
}
