//! NotificationLedger interface tests.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use freshcycle::collaborators::EmailMessage;
use freshcycle::storage::{DeliveryState, NotificationLedger, NotificationRecord};
use freshcycle::test_utils::{date, noon};

fn t0() -> DateTime<Utc> {
    noon(date(2025, 3, 1))
}

fn record(key: &str) -> NotificationRecord {
    NotificationRecord {
        key: key.to_string(),
        event: "order_confirmed".to_string(),
        message: EmailMessage {
            to: "ada@example.com".to_string(),
            subject: "Order confirmed".to_string(),
            html: "<p>Thanks</p>".to_string(),
            text: "Thanks".to_string(),
        },
        state: DeliveryState::Pending,
        attempts: 0,
        last_error: None,
        created_at: t0(),
        updated_at: t0(),
    }
}

fn unique_key(prefix: &str) -> String {
    format!("test:{}:{}", prefix, Uuid::new_v4().simple())
}

pub async fn test_claim_once<L: NotificationLedger>(ledger: &L) {
    let key = unique_key("claim");
    assert!(ledger.claim(&record(&key)).await.expect("claim should succeed"));
    assert!(
        !ledger.claim(&record(&key)).await.expect("claim should succeed"),
        "second claim of the same key must lose"
    );

    let stored = ledger.get(&key).await.unwrap().expect("record should exist");
    assert_eq!(stored.state, DeliveryState::Pending);
    assert_eq!(stored.message.subject, "Order confirmed");
}

pub async fn test_mark_delivered<L: NotificationLedger>(ledger: &L) {
    let key = unique_key("delivered");
    ledger.claim(&record(&key)).await.unwrap();
    ledger
        .mark_delivered(&key, 2, t0() + Duration::seconds(5))
        .await
        .expect("mark_delivered should succeed");

    let stored = ledger.get(&key).await.unwrap().unwrap();
    assert_eq!(stored.state, DeliveryState::Delivered);
    assert_eq!(stored.attempts, 2);
    assert_eq!(stored.updated_at, t0() + Duration::seconds(5));
}

pub async fn test_undelivered_selection<L: NotificationLedger>(ledger: &L) {
    let idle = unique_key("idle");
    let recent = unique_key("recent");
    let spent = unique_key("spent");
    let done = unique_key("done");
    for key in [&idle, &recent, &spent, &done] {
        ledger.claim(&record(key)).await.unwrap();
    }
    ledger.mark_failed(&idle, 3, "rejected", t0()).await.unwrap();
    ledger
        .mark_failed(&recent, 3, "rejected", t0() + Duration::minutes(10))
        .await
        .unwrap();
    ledger.mark_failed(&spent, 10, "rejected", t0()).await.unwrap();
    ledger.mark_delivered(&done, 1, t0()).await.unwrap();

    let mine = [&idle, &recent, &spent, &done];
    let keys: Vec<String> = ledger
        .list_undelivered(t0() + Duration::minutes(1), 10, 1000)
        .await
        .expect("list_undelivered should succeed")
        .into_iter()
        .map(|r| r.key)
        .filter(|k| mine.contains(&k))
        .collect();
    assert_eq!(keys, vec![idle.clone()]);

    let exhausted: Vec<String> = ledger
        .list_exhausted(10)
        .await
        .expect("list_exhausted should succeed")
        .into_iter()
        .map(|r| r.key)
        .filter(|k| mine.contains(&k))
        .collect();
    assert_eq!(exhausted, vec![spent.clone()]);

    let stored = ledger.get(&idle).await.unwrap().unwrap();
    assert_eq!(stored.last_error.as_deref(), Some("rejected"));
}

pub async fn test_mark_missing_key<L: NotificationLedger>(ledger: &L) {
    let result = ledger.mark_delivered(&unique_key("missing"), 1, t0()).await;
    assert!(result.is_err(), "marking an unclaimed key should fail");
}

/// Run all NotificationLedger tests against a ledger implementation.
#[macro_export]
macro_rules! run_ledger_tests {
    ($ledger:expr) => {
        use $crate::storage::ledger_tests::*;

        test_claim_once($ledger).await;
        println!("  test_claim_once: PASSED");

        test_mark_delivered($ledger).await;
        println!("  test_mark_delivered: PASSED");

        test_undelivered_selection($ledger).await;
        println!("  test_undelivered_selection: PASSED");

        test_mark_missing_key($ledger).await;
        println!("  test_mark_missing_key: PASSED");
    };
}
