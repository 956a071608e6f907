mod common;

use commerce_service::config::PaymentSettings;
use commerce_service::errors::CommerceError;
use commerce_service::gateway::PaymentStatus;
use commerce_service::models::{audit, CodVerificationStatus, Gateway, Outcome, TransactionStatus};
use commerce_service::orchestrator::{debit_reference, refund_reference};
use commerce_service::store::TransactionStore;
use futures::future::join_all;
use rust_decimal_macros::dec;
use serde_json::json;
use std::time::Duration;
use tokio_test::assert_ok;

use common::{harness, harness_with};

#[tokio::test]
async fn card_payment_opens_gateway_order() {
    let h = harness();
    let txn = h
        .payments
        .initiate(h.payment("user-1", dec!(499.99), Gateway::Razorpay))
        .await
        .unwrap();

    assert_eq!(txn.status, TransactionStatus::Processing);
    assert_eq!(txn.gateway_order_id.as_deref(), Some("order_mock_1"));
    assert_eq!(txn.currency, "INR");
    assert_eq!(txn.audit_count(audit::PAYMENT_INITIATED), 1);
    assert_eq!(txn.audit_count(audit::PAYMENT_PROCESSING), 1);
    assert_eq!(txn.cod_verification_status, CodVerificationStatus::NotApplicable);
}

#[tokio::test]
async fn wallet_payment_without_balance_fails_synchronously() {
    let h = harness();
    h.funded_wallet("user-c", dec!(30)).await;

    let err = h
        .payments
        .initiate(h.payment("user-c", dec!(50), Gateway::Wallet))
        .await
        .unwrap_err();
    let (transaction_id, required, available) = match err {
        CommerceError::InsufficientWalletBalance { transaction_id, required, available } => {
            (transaction_id, required, available)
        }
        other => panic!("expected InsufficientWalletBalance, got {:?}", other),
    };
    assert_eq!(required, dec!(50));
    assert_eq!(available, dec!(30));

    let txn = h.payments.get(transaction_id).await.unwrap();
    assert_eq!(txn.status, TransactionStatus::Failed);
    assert_eq!(txn.failure_reason.as_deref(), Some("InsufficientWalletBalance"));
    assert_eq!(txn.audit_count(audit::PAYMENT_PROCESSING), 0);
    assert_eq!(h.wallet.balance("user-c").await.unwrap(), dec!(30));
}

#[tokio::test]
async fn wallet_confirm_debits_once() {
    let h = harness();
    h.funded_wallet("user-w", dec!(100)).await;
    let txn = h
        .payments
        .initiate(h.payment("user-w", dec!(60), Gateway::Wallet))
        .await
        .unwrap();
    assert_eq!(txn.status, TransactionStatus::Processing);
    assert!(txn.gateway_order_id.is_none());

    let first = h.payments.confirm(txn.id, "wallet-pay-1", json!({})).await.unwrap();
    let second = h.payments.confirm(txn.id, "wallet-pay-1", json!({})).await.unwrap();

    assert!(first.was_applied());
    assert!(matches!(second, Outcome::AlreadyProcessed(_)));
    assert_eq!(second.inner().audit_count(audit::PAYMENT_CONFIRMED), 1);
    assert_eq!(h.wallet.balance("user-w").await.unwrap(), dec!(40));

    let history = h.wallet.history("user-w", None, None).await.unwrap();
    let debits = history
        .items
        .iter()
        .filter(|e| e.reference_id == debit_reference(txn.id))
        .count();
    assert_eq!(debits, 1);
}

#[tokio::test]
async fn confirm_with_another_payment_id_is_rejected() {
    let h = harness();
    let txn = h
        .payments
        .initiate(h.payment("user-2", dec!(10), Gateway::Razorpay))
        .await
        .unwrap();
    h.payments.confirm(txn.id, "pay_a", json!({})).await.unwrap();

    assert!(matches!(
        h.payments.confirm(txn.id, "pay_b", json!({})).await,
        Err(CommerceError::InvalidTransition { from: TransactionStatus::Success, .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_confirmations_settle_once() {
    let h = harness();
    h.funded_wallet("user-r", dec!(500)).await;
    let txn = h
        .payments
        .initiate(h.payment("user-r", dec!(120), Gateway::Wallet))
        .await
        .unwrap();

    let confirms = (0..8).map(|_| {
        let payments = h.payments.clone();
        tokio::spawn(async move { payments.confirm(txn.id, "wallet-pay", json!({})).await })
    });
    let outcomes: Vec<_> = join_all(confirms)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked").expect("confirm"))
        .collect();

    assert_eq!(outcomes.iter().filter(|o| o.was_applied()).count(), 1);
    assert_eq!(h.wallet.balance("user-r").await.unwrap(), dec!(380));

    let stored = h.payments.get(txn.id).await.unwrap();
    assert_eq!(stored.status, TransactionStatus::Success);
    assert_eq!(stored.audit_count(audit::PAYMENT_CONFIRMED), 1);
}

#[tokio::test]
async fn balance_drained_before_confirm_fails_the_payment() {
    let h = harness();
    h.funded_wallet("user-d", dec!(100)).await;
    let txn = h
        .payments
        .initiate(h.payment("user-d", dec!(80), Gateway::Wallet))
        .await
        .unwrap();
    h.wallet.debit("user-d", dec!(50), "Other order", "elsewhere").await.unwrap();

    assert!(matches!(
        h.payments.confirm(txn.id, "wallet-pay", json!({})).await,
        Err(CommerceError::InsufficientFunds { .. })
    ));
    let stored = h.payments.get(txn.id).await.unwrap();
    assert_eq!(stored.status, TransactionStatus::Failed);
    assert_eq!(stored.failure_reason.as_deref(), Some("InsufficientFunds"));
    assert_eq!(h.wallet.balance("user-d").await.unwrap(), dec!(50));
}

#[tokio::test]
async fn cashback_is_credited_once_on_confirm() {
    let h = harness();
    let mut request = h.payment("user-cb", dec!(300), Gateway::Razorpay);
    request.cashback = dec!(15);
    let txn = h.payments.initiate(request).await.unwrap();

    let confirmed = h
        .payments
        .confirm(txn.id, "pay_cb", json!({}))
        .await
        .unwrap()
        .into_inner();
    assert!(confirmed.cashback_applied);
    assert_eq!(confirmed.audit_count(audit::CASHBACK_APPLIED), 1);

    h.payments.confirm(txn.id, "pay_cb", json!({})).await.unwrap();
    assert_eq!(h.wallet.balance("user-cb").await.unwrap(), dec!(15));
}

#[tokio::test]
async fn partial_then_full_refund_lands_in_wallet() {
    let h = harness();
    let txn = h
        .payments
        .initiate(h.payment("user-refund", dec!(200), Gateway::Razorpay))
        .await
        .unwrap();
    h.payments.confirm(txn.id, "pay_200", json!({})).await.unwrap();

    let partial = h.payments.refund(txn.id, Some(dec!(120))).await.unwrap();
    assert_eq!(partial.status, TransactionStatus::PartiallyRefunded);
    assert_eq!(partial.refund_amount, dec!(120));
    assert_eq!(h.wallet.balance("user-refund").await.unwrap(), dec!(120));

    let full = h.payments.refund(txn.id, Some(dec!(80))).await.unwrap();
    assert_eq!(full.status, TransactionStatus::Refunded);
    assert_eq!(full.refund_amount, dec!(200));
    assert!(full.refunded_at.is_some());
    assert_eq!(full.audit_count(audit::REFUND_PROCESSED), 2);
    assert_eq!(h.wallet.balance("user-refund").await.unwrap(), dec!(200));

    assert!(matches!(
        h.payments.refund(txn.id, Some(dec!(1))).await,
        Err(CommerceError::RefundExceedsAvailable { .. })
    ));

    let refunds = h.processor.refunds();
    assert_eq!(refunds.len(), 2);
    assert_eq!(refunds[0], (format!("txn:{}:refund:1", txn.id), 12000));
    assert_eq!(refunds[1], (format!("txn:{}:refund:2", txn.id), 8000));
}

#[tokio::test]
async fn refund_requires_a_settled_payment() {
    let h = harness();
    let txn = h
        .payments
        .initiate(h.payment("user-3", dec!(50), Gateway::Razorpay))
        .await
        .unwrap();

    assert!(matches!(
        h.payments.refund(txn.id, None).await,
        Err(CommerceError::InvalidTransition { from: TransactionStatus::Processing, .. })
    ));
}

#[tokio::test]
async fn failed_gateway_refund_is_rolled_back() {
    let h = harness();
    let txn = h
        .payments
        .initiate(h.payment("user-4", dec!(90), Gateway::Razorpay))
        .await
        .unwrap();
    h.payments.confirm(txn.id, "pay_90", json!({})).await.unwrap();
    h.processor.fail_refund(true);

    assert!(matches!(
        h.payments.refund(txn.id, Some(dec!(40))).await,
        Err(CommerceError::Gateway { .. })
    ));

    let stored = h.payments.get(txn.id).await.unwrap();
    assert_eq!(stored.status, TransactionStatus::Success);
    assert_eq!(stored.refund_amount, dec!(0));
    assert_eq!(stored.audit_count(audit::REFUND_FAILED), 1);

    h.processor.fail_refund(false);
    let refunded = assert_ok!(h.payments.refund(txn.id, None).await);
    assert_eq!(refunded.status, TransactionStatus::Refunded);
    assert_eq!(h.wallet.balance("user-4").await.unwrap(), dec!(90));
}

#[tokio::test]
async fn interrupted_refund_is_completed_by_the_next_call() {
    let h = harness();
    let txn = h
        .payments
        .initiate(h.payment("user-int", dec!(60), Gateway::Razorpay))
        .await
        .unwrap();
    h.payments.confirm(txn.id, "pay_60", json!({})).await.unwrap();
    let settled = h.payments.get(txn.id).await.unwrap();

    // Recorded and credited, but the outcome never made it onto the row.
    let mut interrupted = settled.next_version();
    interrupted.refund_amount = dec!(60);
    interrupted
        .transition(
            TransactionStatus::Refunded,
            audit::REFUND_REQUESTED,
            json!({ "amount": "60", "sequence": 1 }),
        )
        .unwrap();
    assert!(h.store.swap_transaction(settled.version, &interrupted).await.unwrap());
    let reference = refund_reference(txn.id, 1);
    h.funded_wallet("user-int", dec!(0)).await;
    h.wallet
        .credit("user-int", dec!(60), "Refund", &reference)
        .await
        .unwrap();

    let resumed = h.payments.refund(txn.id, None).await.unwrap();
    assert_eq!(resumed.status, TransactionStatus::Refunded);
    assert!(resumed.pending_refunds().is_empty());
    assert_eq!(resumed.audit_count(audit::REFUND_PROCESSED), 1);
    assert_eq!(h.wallet.balance("user-int").await.unwrap(), dec!(60));
    assert_eq!(h.processor.refunds(), vec![(reference, 6000)]);

    assert!(matches!(
        h.payments.refund(txn.id, None).await,
        Err(CommerceError::RefundExceedsAvailable { .. })
    ));
    assert_eq!(h.wallet.balance("user-int").await.unwrap(), dec!(60));
}

#[tokio::test]
async fn fail_is_idempotent_and_guarded() {
    let h = harness();
    let txn = h
        .payments
        .initiate(h.payment("user-5", dec!(25), Gateway::Razorpay))
        .await
        .unwrap();

    assert!(h.payments.fail(txn.id, "Card declined").await.unwrap().was_applied());
    let again = h.payments.fail(txn.id, "Card declined").await.unwrap();
    assert!(!again.was_applied());
    assert_eq!(again.inner().audit_count(audit::PAYMENT_FAILED), 1);

    let other = h
        .payments
        .initiate(h.payment("user-5", dec!(25), Gateway::Razorpay))
        .await
        .unwrap();
    h.payments.confirm(other.id, "pay_ok", json!({})).await.unwrap();
    assert!(matches!(
        h.payments.fail(other.id, "late failure").await,
        Err(CommerceError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn gateway_error_fails_the_attempt_and_retry_opens_a_new_one() {
    let h = harness();
    h.processor.fail_create(true);
    let request = h.payment("user-6", dec!(75), Gateway::Razorpay);
    let order_id = request.order_id.clone();

    assert!(matches!(
        h.payments.initiate(request).await,
        Err(CommerceError::Gateway { retryable: true, .. })
    ));
    let failed = h.payments.for_order(&order_id).await.unwrap().remove(0);
    assert_eq!(failed.status, TransactionStatus::Failed);

    h.processor.fail_create(false);
    let retried = h.payments.retry(failed.id).await.unwrap();
    assert_ne!(retried.id, failed.id);
    assert_eq!(retried.retry_of, Some(failed.id));
    assert_eq!(retried.order_id, order_id);
    assert_eq!(retried.status, TransactionStatus::Processing);

    assert_eq!(retried.retry_count, 1);

    let original = h.payments.get(failed.id).await.unwrap();
    assert_eq!(original.retry_count, 0);
    assert_eq!(original.status, TransactionStatus::Failed);
    assert_eq!(original.audit_count(audit::PAYMENT_RETRY), 1);
    assert_eq!(h.payments.for_order(&order_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn retries_are_capped_across_the_chain_of_attempts() {
    let h = harness();
    h.processor.fail_create(true);
    let request = h.payment("user-7", dec!(20), Gateway::Razorpay);
    let order_id = request.order_id.clone();
    assert!(h.payments.initiate(request).await.is_err());
    let mut latest = h.payments.for_order(&order_id).await.unwrap().remove(0).id;

    for attempt in 1..=3 {
        assert!(matches!(
            h.payments.retry(latest).await,
            Err(CommerceError::Gateway { .. })
        ));
        let next = h
            .payments
            .for_order(&order_id)
            .await
            .unwrap()
            .into_iter()
            .find(|t| t.retry_of == Some(latest))
            .unwrap();
        assert_eq!(next.retry_count, attempt);
        assert_eq!(next.status, TransactionStatus::Failed);
        latest = next.id;
    }

    assert!(matches!(
        h.payments.retry(latest).await,
        Err(CommerceError::RetryLimitExceeded { max: 3 })
    ));
    assert_eq!(h.payments.for_order(&order_id).await.unwrap().len(), 4);
}

#[tokio::test]
async fn an_attempt_can_only_be_retried_once() {
    let h = harness();
    h.processor.fail_create(true);
    let request = h.payment("user-7b", dec!(20), Gateway::Razorpay);
    let order_id = request.order_id.clone();
    assert!(h.payments.initiate(request).await.is_err());
    let failed = h.payments.for_order(&order_id).await.unwrap().remove(0);

    assert!(h.payments.retry(failed.id).await.is_err());
    assert!(matches!(
        h.payments.retry(failed.id).await,
        Err(CommerceError::AttemptSuperseded(id)) if id == failed.id
    ));
    assert_eq!(h.payments.for_order(&order_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn an_old_attempt_cannot_be_retried_once_a_later_one_paid() {
    let h = harness();
    h.processor.fail_create(true);
    let request = h.payment("user-7c", dec!(20), Gateway::Razorpay);
    let order_id = request.order_id.clone();
    assert!(h.payments.initiate(request).await.is_err());
    let failed = h.payments.for_order(&order_id).await.unwrap().remove(0);

    h.processor.fail_create(false);
    let retried = h.payments.retry(failed.id).await.unwrap();
    h.payments.confirm(retried.id, "pay_7c", json!({})).await.unwrap();

    assert!(matches!(
        h.payments.retry(failed.id).await,
        Err(CommerceError::CannotRetrySuccessful)
    ));
    let attempts = h.payments.for_order(&order_id).await.unwrap();
    assert_eq!(attempts.len(), 2);
    assert_eq!(
        attempts.iter().filter(|t| t.status == TransactionStatus::Success).count(),
        1
    );
}

#[tokio::test]
async fn retry_is_only_for_failed_payments() {
    let h = harness();
    let txn = h
        .payments
        .initiate(h.payment("user-8", dec!(20), Gateway::Razorpay))
        .await
        .unwrap();
    assert!(matches!(
        h.payments.retry(txn.id).await,
        Err(CommerceError::InvalidTransition { .. })
    ));

    h.payments.confirm(txn.id, "pay_8", json!({})).await.unwrap();
    assert!(matches!(
        h.payments.retry(txn.id).await,
        Err(CommerceError::CannotRetrySuccessful)
    ));
}

#[tokio::test]
async fn gateway_timeout_leaves_payment_processing() {
    let h = harness_with(PaymentSettings {
        gateway_timeout: Duration::from_millis(50),
        ..PaymentSettings::default()
    });
    h.processor.delay_create(Duration::from_millis(500));

    let txn = h
        .payments
        .initiate(h.payment("user-9", dec!(45), Gateway::Razorpay))
        .await
        .unwrap();

    assert_eq!(txn.status, TransactionStatus::Processing);
    assert!(txn.gateway_order_id.is_none());
    assert_eq!(txn.audit_count(audit::GATEWAY_TIMEOUT), 1);
}

#[tokio::test]
async fn cod_settles_on_courier_verification() {
    let h = harness();
    let txn = h
        .payments
        .initiate(h.payment("user-cod", dec!(150), Gateway::Cod))
        .await
        .unwrap();
    assert_eq!(txn.status, TransactionStatus::Processing);
    assert_eq!(txn.cod_verification_status, CodVerificationStatus::Pending);

    let verified = h
        .payments
        .verify_cod(txn.id, CodVerificationStatus::Verified)
        .await
        .unwrap();
    assert!(verified.was_applied());
    assert_eq!(verified.inner().status, TransactionStatus::Success);
    assert_eq!(verified.inner().cod_verification_status, CodVerificationStatus::Verified);

    let again = h
        .payments
        .verify_cod(txn.id, CodVerificationStatus::Verified)
        .await
        .unwrap();
    assert!(!again.was_applied());
}

#[tokio::test]
async fn cod_rejection_fails_and_card_payments_cannot_be_verified() {
    let h = harness();
    let cod = h
        .payments
        .initiate(h.payment("user-cod2", dec!(60), Gateway::Cod))
        .await
        .unwrap();
    let rejected = h
        .payments
        .verify_cod(cod.id, CodVerificationStatus::Rejected)
        .await
        .unwrap()
        .into_inner();
    assert_eq!(rejected.status, TransactionStatus::Failed);

    let card = h
        .payments
        .initiate(h.payment("user-cod2", dec!(60), Gateway::Razorpay))
        .await
        .unwrap();
    assert!(matches!(
        h.payments.verify_cod(card.id, CodVerificationStatus::Verified).await,
        Err(CommerceError::NotCashOnDelivery(_))
    ));
}

#[tokio::test]
async fn reconcile_applies_polled_status() {
    let h = harness();
    let paid = h
        .payments
        .initiate(h.payment("user-poll", dec!(99), Gateway::Razorpay))
        .await
        .unwrap();

    let unchanged = h.payments.reconcile(paid.id).await.unwrap();
    assert_eq!(unchanged.status, TransactionStatus::Processing);

    h.processor.report_status(PaymentStatus::Paid {
        gateway_transaction_id: "pay_polled".to_string(),
    });
    let settled = h.payments.reconcile(paid.id).await.unwrap();
    assert_eq!(settled.status, TransactionStatus::Success);
    assert_eq!(settled.gateway_transaction_id.as_deref(), Some("pay_polled"));

    let declined = h
        .payments
        .initiate(h.payment("user-poll", dec!(99), Gateway::Razorpay))
        .await
        .unwrap();
    h.processor.report_status(PaymentStatus::Failed {
        reason: "Bank declined".to_string(),
    });
    let failed = h.payments.reconcile(declined.id).await.unwrap();
    assert_eq!(failed.status, TransactionStatus::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some("Bank declined"));
}

#[tokio::test]
async fn invalid_requests_are_rejected_up_front() {
    let h = harness();
    assert!(matches!(
        h.payments.initiate(h.payment("user-10", dec!(0), Gateway::Razorpay)).await,
        Err(CommerceError::Validation(_))
    ));
    assert!(matches!(
        h.payments.initiate(h.payment("user-10", dec!(10), Gateway::Stripe)).await,
        Err(CommerceError::GatewayNotConfigured(Gateway::Stripe))
    ));
}

#[tokio::test]
async fn history_filters_by_status() {
    let h = harness();
    let a = h
        .payments
        .initiate(h.payment("user-h", dec!(10), Gateway::Razorpay))
        .await
        .unwrap();
    h.payments
        .initiate(h.payment("user-h", dec!(20), Gateway::Razorpay))
        .await
        .unwrap();
    h.payments.confirm(a.id, "pay_h", json!({})).await.unwrap();

    let all = h.payments.history("user-h", None, None, None).await.unwrap();
    assert_eq!(all.total, 2);

    let settled = h
        .payments
        .history("user-h", Some(TransactionStatus::Success), None, None)
        .await
        .unwrap();
    assert_eq!(settled.total, 1);
    assert_eq!(settled.items[0].id, a.id);
}
