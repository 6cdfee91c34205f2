//! SubscriptionStore interface tests.

use uuid::Uuid;

use freshcycle::model::{Actor, Frequency, HistoryAction, HistoryEntry, SubscriptionStatus};
use freshcycle::storage::{StorageError, SubscriptionStore};
use freshcycle::test_utils::{self, date, noon};

pub async fn test_insert_and_get<S: SubscriptionStore>(store: &S) {
    let subscription = test_utils::subscription("test_sub_get", Frequency::Weekly, date(2025, 3, 1));
    store.insert(&subscription).await.expect("insert should succeed");

    let loaded = store
        .get(subscription.id)
        .await
        .expect("get should succeed")
        .expect("subscription should exist");
    assert_eq!(loaded, subscription);
}

pub async fn test_duplicate_insert<S: SubscriptionStore>(store: &S) {
    let subscription = test_utils::subscription("test_sub_dup", Frequency::Weekly, date(2025, 3, 1));
    store.insert(&subscription).await.expect("insert should succeed");

    let result = store.insert(&subscription).await;
    assert!(matches!(result, Err(StorageError::Duplicate { .. })));
}

pub async fn test_optimistic_update<S: SubscriptionStore>(store: &S) {
    let mut subscription =
        test_utils::subscription("test_sub_update", Frequency::Monthly, date(2025, 3, 1));
    store.insert(&subscription).await.unwrap();

    subscription.status = SubscriptionStatus::Paused;
    let version = store.update(&subscription).await.expect("update should succeed");
    assert_eq!(version, 1);

    // Writer still holding version 0 loses.
    let result = store.update(&subscription).await;
    assert!(
        matches!(result, Err(StorageError::VersionConflict { .. })),
        "stale write should conflict, got {:?}",
        result
    );

    let loaded = store.get(subscription.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, SubscriptionStatus::Paused);
    assert_eq!(loaded.version, 1);
}

pub async fn test_list_due<S: SubscriptionStore>(store: &S) {
    let today = date(2031, 6, 15);
    let due = test_utils::subscription("test_due_a", Frequency::Weekly, today);
    let overdue = test_utils::subscription("test_due_b", Frequency::Weekly, date(2031, 6, 1));
    let mut past_due = test_utils::subscription("test_due_c", Frequency::Weekly, date(2031, 6, 10));
    past_due.status = SubscriptionStatus::PastDue;
    let future = test_utils::subscription("test_due_d", Frequency::Weekly, date(2031, 6, 16));
    let mut paused = test_utils::subscription("test_due_e", Frequency::Weekly, today);
    paused.status = SubscriptionStatus::Paused;
    let mut cancelled = test_utils::subscription("test_due_f", Frequency::Weekly, today);
    cancelled.status = SubscriptionStatus::Cancelled;

    let mine = [&due, &overdue, &past_due, &future, &paused, &cancelled];
    for s in mine {
        store.insert(s).await.unwrap();
    }
    let mine: Vec<Uuid> = mine.iter().map(|s| s.id).collect();

    let ids: Vec<Uuid> = store
        .list_due(today)
        .await
        .expect("list_due should succeed")
        .into_iter()
        .map(|s| s.id)
        .filter(|id| mine.contains(id))
        .collect();
    assert_eq!(ids, vec![overdue.id, past_due.id, due.id], "oldest due date first");
}

pub async fn test_history_in_append_order<S: SubscriptionStore>(store: &S) {
    let subscription =
        test_utils::subscription("test_history", Frequency::Weekly, date(2025, 3, 1));
    store.insert(&subscription).await.unwrap();

    let actions = [
        HistoryAction::Created,
        HistoryAction::Paused,
        HistoryAction::Resumed,
    ];
    for action in actions {
        let entry = HistoryEntry {
            id: Uuid::new_v4(),
            subscription_id: subscription.id,
            action,
            old_status: SubscriptionStatus::Active,
            new_status: SubscriptionStatus::Active,
            actor: Actor::Customer,
            notes: None,
            // Same instant for all three; order must come from append order.
            at: noon(date(2025, 3, 1)),
        };
        store.append_history(&entry).await.expect("append should succeed");
    }

    let recorded: Vec<HistoryAction> = store
        .history(subscription.id)
        .await
        .expect("history should succeed")
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(recorded, actions);
}

/// Run all SubscriptionStore tests against a store implementation.
#[macro_export]
macro_rules! run_subscription_store_tests {
    ($store:expr) => {
        use $crate::storage::subscription_store_tests::*;

        test_insert_and_get($store).await;
        println!("  test_insert_and_get: PASSED");

        test_duplicate_insert($store).await;
        println!("  test_duplicate_insert: PASSED");

        test_optimistic_update($store).await;
        println!("  test_optimistic_update: PASSED");

        test_list_due($store).await;
        println!("  test_list_due: PASSED");

        test_history_in_append_order($store).await;
        println!("  test_history_in_append_order: PASSED");
    };
}
