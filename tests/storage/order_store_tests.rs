//! OrderStore interface tests.

use uuid::Uuid;

use freshcycle::model::OrderStatus;
use freshcycle::storage::{OrderStore, StorageError};
use freshcycle::test_utils;

fn unique_number() -> String {
    format!("FC-TEST-{}", &Uuid::new_v4().simple().to_string()[..12])
}

pub async fn test_insert_and_get<S: OrderStore>(store: &S) {
    let order = test_utils::order("test_insert_get", &unique_number());
    store.insert(&order).await.expect("insert should succeed");

    let loaded = store
        .get(order.id)
        .await
        .expect("get should succeed")
        .expect("order should exist");
    assert_eq!(loaded, order);
}

pub async fn test_get_missing<S: OrderStore>(store: &S) {
    let loaded = store.get(Uuid::new_v4()).await.expect("get should succeed");
    assert!(loaded.is_none());
}

pub async fn test_duplicate_order_number<S: OrderStore>(store: &S) {
    let number = unique_number();
    store
        .insert(&test_utils::order("test_dup_a", &number))
        .await
        .expect("first insert should succeed");

    let result = store.insert(&test_utils::order("test_dup_b", &number)).await;
    assert!(
        matches!(result, Err(StorageError::Duplicate { .. })),
        "second insert with the same number should be a duplicate, got {:?}",
        result
    );
}

pub async fn test_update_bumps_version<S: OrderStore>(store: &S) {
    let mut order = test_utils::order("test_update", &unique_number());
    store.insert(&order).await.expect("insert should succeed");

    order.status = OrderStatus::Pending;
    let version = store.update(&order).await.expect("update should succeed");
    assert_eq!(version, 1);

    order.version = version;
    order.status = OrderStatus::Processing;
    assert_eq!(store.update(&order).await.expect("update should succeed"), 2);

    let loaded = store.get(order.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, OrderStatus::Processing);
    assert_eq!(loaded.version, 2);
}

pub async fn test_stale_update_conflicts<S: OrderStore>(store: &S) {
    let order = test_utils::order("test_stale", &unique_number());
    store.insert(&order).await.expect("insert should succeed");
    store.update(&order).await.expect("first update should succeed");

    let result = store.update(&order).await;
    assert!(
        matches!(result, Err(StorageError::VersionConflict { .. })),
        "update at a stale version should conflict, got {:?}",
        result
    );
}

pub async fn test_update_missing<S: OrderStore>(store: &S) {
    let order = test_utils::order("test_missing", &unique_number());
    let result = store.update(&order).await;
    assert!(matches!(result, Err(StorageError::NotFound { .. })));
}

pub async fn test_list_by_customer<S: OrderStore>(store: &S) {
    let customer = format!("test_list_{}", Uuid::new_v4().simple());
    let first = test_utils::order(&customer, &unique_number());
    let mut second = test_utils::order(&customer, &unique_number());
    second.created_at = first.created_at + chrono::Duration::hours(1);
    store.insert(&second).await.unwrap();
    store.insert(&first).await.unwrap();
    store
        .insert(&test_utils::order("test_list_other", &unique_number()))
        .await
        .unwrap();

    let ids: Vec<Uuid> = store
        .list_by_customer(&customer)
        .await
        .expect("list should succeed")
        .into_iter()
        .map(|o| o.id)
        .collect();
    assert_eq!(ids, vec![second.id, first.id], "newest first");
}

/// Run all OrderStore tests against a store implementation.
#[macro_export]
macro_rules! run_order_store_tests {
    ($store:expr) => {
        use $crate::storage::order_store_tests::*;

        test_insert_and_get($store).await;
        println!("  test_insert_and_get: PASSED");

        test_get_missing($store).await;
        println!("  test_get_missing: PASSED");

        test_duplicate_order_number($store).await;
        println!("  test_duplicate_order_number: PASSED");

        test_update_bumps_version($store).await;
        println!("  test_update_bumps_version: PASSED");

        test_stale_update_conflicts($store).await;
        println!("  test_stale_update_conflicts: PASSED");

        test_update_missing($store).await;
        println!("  test_update_missing: PASSED");

        test_list_by_customer($store).await;
        println!("  test_list_by_customer: PASSED");
    };
}
