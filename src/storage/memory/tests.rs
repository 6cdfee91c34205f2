use super::*;
use crate::model::{Frequency, SubscriptionStatus};
use crate::test_utils;

#[tokio::test]
async fn test_order_update_bumps_version() {
    let store = MemoryOrderStore::new();
    let mut order = test_utils::order("cust-1", "FC-250101-000001");
    store.insert(&order).await.unwrap();

    order.notes = Some("leave at door".to_string());
    let version = store.update(&order).await.unwrap();
    assert_eq!(version, 1);

    // stale write
    let result = store.update(&order).await;
    assert!(matches!(result, Err(StorageError::VersionConflict { .. })));
}

#[tokio::test]
async fn test_order_number_unique() {
    let store = MemoryOrderStore::new();
    store
        .insert(&test_utils::order("cust-1", "FC-1"))
        .await
        .unwrap();
    let result = store.insert(&test_utils::order("cust-2", "FC-1")).await;
    assert!(matches!(result, Err(StorageError::Duplicate { .. })));
}

#[tokio::test]
async fn test_list_due_excludes_paused_and_future() {
    let store = MemorySubscriptionStore::new();
    let today = test_utils::date(2025, 3, 1);

    let due = test_utils::subscription("a", Frequency::Weekly, today);
    let mut paused = test_utils::subscription("b", Frequency::Weekly, today);
    paused.status = SubscriptionStatus::Paused;
    let future = test_utils::subscription("c", Frequency::Weekly, test_utils::date(2025, 3, 2));
    let mut past_due = test_utils::subscription("d", Frequency::Weekly, test_utils::date(2025, 2, 20));
    past_due.status = SubscriptionStatus::PastDue;

    for s in [&due, &paused, &future, &past_due] {
        store.insert(s).await.unwrap();
    }

    let ids: Vec<Uuid> = store
        .list_due(today)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(ids, vec![past_due.id, due.id]);
}

#[tokio::test]
async fn test_injected_conflict_consumed_once() {
    let store = MemorySubscriptionStore::new();
    let subscription =
        test_utils::subscription("a", Frequency::Monthly, test_utils::date(2025, 1, 1));
    store.insert(&subscription).await.unwrap();

    store.inject_conflicts(1);
    assert!(store.update(&subscription).await.is_err());
    assert_eq!(store.update(&subscription).await.unwrap(), 1);
}

#[tokio::test]
async fn test_invoice_create_if_absent_is_per_cycle() {
    let store = MemoryInvoiceStore::new();
    let subscription =
        test_utils::subscription("a", Frequency::Biweekly, test_utils::date(2025, 1, 1));
    let first = test_utils::invoice(&subscription);
    let second = test_utils::invoice(&subscription);

    assert!(matches!(
        store.create_if_absent(&first).await.unwrap(),
        CreateOutcome::Created(_)
    ));
    match store.create_if_absent(&second).await.unwrap() {
        CreateOutcome::Existing(existing) => assert_eq!(existing.id, first.id),
        other => panic!("expected Existing, got {:?}", other),
    }
    assert_eq!(
        store
            .list_for_subscription(subscription.id)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_invoice_transition_guards_status() {
    let store = MemoryInvoiceStore::new();
    let subscription =
        test_utils::subscription("a", Frequency::Biweekly, test_utils::date(2025, 1, 1));
    let invoice = test_utils::invoice(&subscription);
    store.create_if_absent(&invoice).await.unwrap();

    let at = test_utils::noon(invoice.billing_date);
    let paid = store
        .transition(
            invoice.id,
            &[InvoiceStatus::Pending],
            InvoiceUpdate {
                status: InvoiceStatus::Paid,
                transaction_id: Some("txn_1".to_string()),
                error_message: None,
                at,
            },
        )
        .await
        .unwrap();
    assert_eq!(paid.status, InvoiceStatus::Paid);
    assert_eq!(paid.finalized_at, Some(at));

    let again = store
        .transition(
            invoice.id,
            &[InvoiceStatus::Pending],
            InvoiceUpdate {
                status: InvoiceStatus::Failed,
                transaction_id: None,
                error_message: Some("late".to_string()),
                at,
            },
        )
        .await;
    assert!(matches!(again, Err(StorageError::StatusConflict { .. })));
}

#[tokio::test]
async fn test_ledger_claim_once() {
    let ledger = MemoryLedger::new();
    let now = test_utils::noon(test_utils::date(2025, 1, 1));
    let record = NotificationRecord {
        key: "order:1:shipped".to_string(),
        event: "order_shipped".to_string(),
        message: crate::collaborators::EmailMessage {
            to: "a@example.com".to_string(),
            subject: "Shipped".to_string(),
            html: String::new(),
            text: String::new(),
        },
        state: DeliveryState::Pending,
        attempts: 0,
        last_error: None,
        created_at: now,
        updated_at: now,
    };

    assert!(ledger.claim(&record).await.unwrap());
    assert!(!ledger.claim(&record).await.unwrap());

    ledger.mark_failed(&record.key, 3, "smtp down", now).await.unwrap();
    assert_eq!(ledger.list_undelivered(now, 10, 10).await.unwrap().len(), 1);
    assert_eq!(ledger.list_exhausted(3).await.unwrap().len(), 1);

    ledger.mark_delivered(&record.key, 4, now).await.unwrap();
    assert!(ledger.list_undelivered(now, 10, 10).await.unwrap().is_empty());
}
