//! InvoiceStore interface tests.

use uuid::Uuid;

use freshcycle::model::{Frequency, InvoiceStatus};
use freshcycle::storage::{CreateOutcome, InvoiceStore, InvoiceUpdate, StorageError};
use freshcycle::test_utils::{self, date, noon};

fn paid_update() -> InvoiceUpdate {
    InvoiceUpdate {
        status: InvoiceStatus::Paid,
        transaction_id: Some("txn_contract".to_string()),
        error_message: None,
        at: noon(date(2025, 3, 1)),
    }
}

pub async fn test_create_once_per_cycle<S: InvoiceStore>(store: &S) {
    let subscription = test_utils::subscription("test_inv_cycle", Frequency::Weekly, date(2025, 3, 1));
    let first = test_utils::invoice(&subscription);
    let second = test_utils::invoice(&subscription);

    match store.create_if_absent(&first).await.expect("create should succeed") {
        CreateOutcome::Created(invoice) => assert_eq!(invoice.id, first.id),
        other => panic!("expected Created, got {:?}", other),
    }
    match store.create_if_absent(&second).await.expect("create should succeed") {
        CreateOutcome::Existing(invoice) => assert_eq!(invoice.id, first.id),
        other => panic!("expected Existing, got {:?}", other),
    }

    let found = store
        .find(subscription.id, date(2025, 3, 1))
        .await
        .expect("find should succeed")
        .expect("invoice should exist");
    assert_eq!(found.id, first.id);
    assert!(store.find(subscription.id, date(2025, 3, 8)).await.unwrap().is_none());
}

pub async fn test_transition_guards_status<S: InvoiceStore>(store: &S) {
    let subscription = test_utils::subscription("test_inv_guard", Frequency::Weekly, date(2025, 3, 1));
    let invoice = test_utils::invoice(&subscription);
    store.create_if_absent(&invoice).await.unwrap();

    let paid = store
        .transition(invoice.id, &[InvoiceStatus::Pending], paid_update())
        .await
        .expect("pending -> paid should succeed");
    assert_eq!(paid.status, InvoiceStatus::Paid);
    assert_eq!(paid.transaction_id.as_deref(), Some("txn_contract"));
    assert_eq!(paid.finalized_at, Some(noon(date(2025, 3, 1))));

    let result = store
        .transition(invoice.id, &[InvoiceStatus::Pending], paid_update())
        .await;
    assert!(
        matches!(result, Err(StorageError::StatusConflict { .. })),
        "second transition should conflict, got {:?}",
        result
    );

    let stored = store.get(invoice.id).await.unwrap().unwrap();
    assert_eq!(stored, paid);
}

pub async fn test_transition_missing<S: InvoiceStore>(store: &S) {
    let result = store
        .transition(Uuid::new_v4(), &[InvoiceStatus::Pending], paid_update())
        .await;
    assert!(matches!(result, Err(StorageError::NotFound { .. })));
}

pub async fn test_indeterminate_is_not_final<S: InvoiceStore>(store: &S) {
    let subscription = test_utils::subscription("test_inv_indet", Frequency::Weekly, date(2025, 3, 1));
    let invoice = test_utils::invoice(&subscription);
    store.create_if_absent(&invoice).await.unwrap();

    let unsettled = [InvoiceStatus::Pending, InvoiceStatus::Indeterminate];
    let indeterminate = store
        .transition(
            invoice.id,
            &unsettled,
            InvoiceUpdate {
                status: InvoiceStatus::Indeterminate,
                transaction_id: None,
                error_message: Some("payment timed out".to_string()),
                at: noon(date(2025, 3, 1)),
            },
        )
        .await
        .unwrap();
    assert_eq!(indeterminate.finalized_at, None);

    let listed = store
        .list_by_status(InvoiceStatus::Indeterminate)
        .await
        .expect("list should succeed");
    assert!(listed.iter().any(|i| i.id == invoice.id));

    let paid = store.transition(invoice.id, &unsettled, paid_update()).await.unwrap();
    assert_eq!(paid.status, InvoiceStatus::Paid);
}

pub async fn test_list_for_subscription<S: InvoiceStore>(store: &S) {
    let mut subscription =
        test_utils::subscription("test_inv_list", Frequency::Weekly, date(2025, 3, 15));
    let later = test_utils::invoice(&subscription);
    subscription.next_billing_date = date(2025, 3, 1);
    let earlier = test_utils::invoice(&subscription);

    store.create_if_absent(&later).await.unwrap();
    store.create_if_absent(&earlier).await.unwrap();

    let dates: Vec<_> = store
        .list_for_subscription(subscription.id)
        .await
        .expect("list should succeed")
        .into_iter()
        .map(|i| i.billing_date)
        .collect();
    assert_eq!(dates, vec![date(2025, 3, 1), date(2025, 3, 15)]);
}

/// Run all InvoiceStore tests against a store implementation.
#[macro_export]
macro_rules! run_invoice_store_tests {
    ($store:expr) => {
        use $crate::storage::invoice_store_tests::*;

        test_create_once_per_cycle($store).await;
        println!("  test_create_once_per_cycle: PASSED");

        test_transition_guards_status($store).await;
        println!("  test_transition_guards_status: PASSED");

        test_transition_missing($store).await;
        println!("  test_transition_missing: PASSED");

        test_indeterminate_is_not_final($store).await;
        println!("  test_indeterminate_is_not_final: PASSED");

        test_list_for_subscription($store).await;
        println!("  test_list_for_subscription: PASSED");
    };
}
