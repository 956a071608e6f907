mod common;

use commerce_service::errors::CommerceError;
use commerce_service::models::{LedgerEntryType, Outcome};
use futures::future::join_all;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use common::harness;

async fn ledger_sum(h: &common::Harness, user_id: &str) -> Decimal {
    let page = h.wallet.history(user_id, Some(200), None).await.unwrap();
    page.items
        .iter()
        .map(|e| e.entry_type.delta(e.amount))
        .sum()
}

#[tokio::test]
async fn create_wallet_is_idempotent() {
    let h = harness();
    let first = h.wallet.create_wallet("user-1").await.unwrap();
    let second = h.wallet.create_wallet("user-1").await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.balance, dec!(0));
    assert_eq!(second.currency, "INR");
}

#[tokio::test]
async fn overdraw_is_rejected_and_balance_unchanged() {
    let h = harness();
    h.funded_wallet("user-b", dec!(100)).await;

    let err = h
        .wallet
        .debit("user-b", dec!(150), "Order payment", "ref1")
        .await
        .unwrap_err();
    assert!(matches!(err, CommerceError::InsufficientFunds { .. }));

    assert_eq!(h.wallet.balance("user-b").await.unwrap(), dec!(100));
    let history = h.wallet.history("user-b", None, None).await.unwrap();
    assert_eq!(history.total, 1);
}

#[tokio::test]
async fn duplicate_reference_is_applied_once() {
    let h = harness();
    h.funded_wallet("user-c", dec!(0)).await;

    let first = h.wallet.credit("user-c", dec!(40), "Refund", "refund-42").await.unwrap();
    let second = h.wallet.credit("user-c", dec!(40), "Refund", "refund-42").await.unwrap();

    assert!(first.was_applied());
    assert!(matches!(second, Outcome::AlreadyProcessed(_)));
    assert_eq!(first.inner().id, second.inner().id);
    assert_eq!(h.wallet.balance("user-c").await.unwrap(), dec!(40));
}

#[tokio::test]
async fn ledger_entries_record_balance_after() {
    let h = harness();
    h.funded_wallet("user-d", dec!(0)).await;

    h.wallet.credit("user-d", dec!(100), "Top-up", "t1").await.unwrap();
    let debit = h
        .wallet
        .debit("user-d", dec!(30.50), "Order payment", "d1")
        .await
        .unwrap()
        .into_inner();

    assert_eq!(debit.entry_type, LedgerEntryType::Debit);
    assert_eq!(debit.balance_after, dec!(69.50));

    let history = h.wallet.history("user-d", None, None).await.unwrap();
    assert_eq!(history.items[0].reference_id, "d1");
    assert_eq!(history.items[1].reference_id, "t1");
    assert_eq!(ledger_sum(&h, "user-d").await, dec!(69.50));
}

#[tokio::test]
async fn amounts_and_references_are_validated() {
    let h = harness();
    h.funded_wallet("user-e", dec!(10)).await;

    assert!(matches!(
        h.wallet.credit("user-e", dec!(0), "Nothing", "z1").await,
        Err(CommerceError::Validation(_))
    ));
    assert!(matches!(
        h.wallet.debit("user-e", dec!(-5), "Negative", "z2").await,
        Err(CommerceError::Validation(_))
    ));
    assert!(matches!(
        h.wallet.credit("user-e", dec!(5), "No reference", "").await,
        Err(CommerceError::Validation(_))
    ));
}

#[tokio::test]
async fn missing_wallet_is_not_found() {
    let h = harness();
    assert!(matches!(
        h.wallet.get_wallet("nobody").await,
        Err(CommerceError::WalletNotFound(_))
    ));
    assert!(matches!(
        h.wallet.debit("nobody", dec!(1), "Payment", "x").await,
        Err(CommerceError::WalletNotFound(_))
    ));
}

#[tokio::test]
async fn top_up_respects_limits() {
    let h = harness();
    h.funded_wallet("user-f", dec!(0)).await;

    assert!(matches!(
        h.wallet.top_up("user-f", dec!(5), None, "tu-1").await,
        Err(CommerceError::Validation(_))
    ));
    assert!(matches!(
        h.wallet.top_up("user-f", dec!(50001), None, "tu-2").await,
        Err(CommerceError::Validation(_))
    ));

    let entry = h
        .wallet
        .top_up("user-f", dec!(500), Some("UPI top-up"), "tu-3")
        .await
        .unwrap()
        .into_inner();
    assert_eq!(entry.description, "UPI top-up");
    assert_eq!(h.wallet.balance("user-f").await.unwrap(), dec!(500));
}

#[tokio::test]
async fn history_pages_newest_first() {
    let h = harness();
    h.funded_wallet("user-g", dec!(0)).await;
    for i in 1..=5 {
        h.wallet
            .credit("user-g", Decimal::from(i), "Credit", &format!("c{}", i))
            .await
            .unwrap();
    }

    let first = h.wallet.history("user-g", Some(2), Some(0)).await.unwrap();
    assert_eq!(first.total, 5);
    assert!(first.has_more);
    assert_eq!(first.items[0].reference_id, "c5");

    let last = h.wallet.history("user-g", Some(2), Some(4)).await.unwrap();
    assert_eq!(last.items.len(), 1);
    assert!(!last.has_more);
    assert_eq!(last.items[0].reference_id, "c1");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_debits_never_overdraw() {
    let h = harness();
    h.funded_wallet("user-h", dec!(100)).await;

    let debits = (0..10).map(|i| {
        let wallet = h.wallet.clone();
        tokio::spawn(async move {
            wallet
                .debit("user-h", dec!(30), "Order payment", &format!("race-{}", i))
                .await
        })
    });
    let results: Vec<_> = join_all(debits)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect();

    let applied = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(applied, 3);
    assert!(results
        .iter()
        .filter(|r| r.is_err())
        .all(|r| matches!(r, Err(CommerceError::InsufficientFunds { .. }))));

    let balance = h.wallet.balance("user-h").await.unwrap();
    assert_eq!(balance, dec!(10));
    assert_eq!(ledger_sum(&h, "user-h").await, balance);
}
