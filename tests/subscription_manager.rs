//! Customer-facing subscription operations through the engine.

mod common;

use common::Harness;
use freshcycle::model::{
    Frequency, HistoryAction, ItemSelection, ItemsUpdate, SubscriptionStatus,
};
use freshcycle::test_utils::{self, date};
use freshcycle::ErrorKind;

#[tokio::test]
async fn test_pause_freezes_next_billing_date() {
    let h = Harness::new();
    let subs = h.engine.subscriptions();
    let mut draft = h.subscription_draft("cust-pause", Frequency::Weekly);
    draft.start_date = Some(date(2025, 3, 5));
    let sub = subs.create_subscription(draft).await.unwrap();

    let paused = subs.pause(sub.id, None).await.unwrap();
    assert_eq!(paused.status, SubscriptionStatus::Paused);
    assert_eq!(paused.next_billing_date, date(2025, 3, 5));

    h.clock.set_date(date(2025, 4, 1));
    assert_eq!(
        subs.get(sub.id).await.unwrap().next_billing_date,
        date(2025, 3, 5)
    );
    let resumed = subs.resume(sub.id).await.unwrap();
    assert_eq!(resumed.next_billing_date, date(2025, 4, 8));
}

#[tokio::test]
async fn test_skip_next_moves_two_intervals() {
    let h = Harness::new();
    let subs = h.engine.subscriptions();
    let sub = subs
        .create_subscription(h.subscription_draft("cust-skip", Frequency::Weekly))
        .await
        .unwrap();

    let skipped = subs
        .skip_next(sub.id, Some("away".to_string()))
        .await
        .unwrap();
    assert_eq!(skipped.next_billing_date, date(2025, 3, 15));
    assert_eq!(skipped.skip_count, 1);
    assert!(h.engine.billing().invoices_for(sub.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_change_frequency_anchors_on_last_billing() {
    let h = Harness::new();
    h.clock.set_date(date(2025, 1, 2));
    let mut sub = test_utils::subscription("cust-freq", Frequency::Weekly, date(2025, 1, 8));
    sub.last_billing_date = Some(date(2025, 1, 1));
    h.engine.stores().subscriptions.insert(&sub).await.unwrap();

    let changed = h
        .engine
        .subscriptions()
        .change_frequency(sub.id, Frequency::Monthly)
        .await
        .unwrap();
    assert_eq!(changed.frequency, Frequency::Monthly);
    assert_eq!(changed.next_billing_date, date(2025, 2, 1));
}

#[tokio::test]
async fn test_update_items_ignores_client_amount() {
    let h = Harness::new();
    let subs = h.engine.subscriptions();
    let sub = subs
        .create_subscription(h.subscription_draft("cust-items", Frequency::Biweekly))
        .await
        .unwrap();

    let updated = subs
        .update_items(
            sub.id,
            ItemsUpdate {
                items: vec![ItemSelection {
                    product_id: "harvest-box".to_string(),
                    quantity: 1,
                }],
                client_amount_cents: Some(1),
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.amount_cents, 4500);

    // The next invoice is priced from the stored amount.
    let report = h.engine.billing().sweep().await.unwrap();
    assert_eq!(report.paid, 1);
    let invoice = &h.engine.billing().invoices_for(sub.id).await.unwrap()[0];
    assert_eq!(invoice.subtotal_cents, 4500);
}

#[tokio::test]
async fn test_cancel_stops_billing_and_notifies_once() {
    let h = Harness::new();
    let subs = h.engine.subscriptions();
    let sub = subs
        .create_subscription(h.subscription_draft("cust-cancel", Frequency::Weekly))
        .await
        .unwrap();

    subs.cancel(sub.id, Some("moving".to_string())).await.unwrap();
    subs.cancel(sub.id, None).await.unwrap();
    assert_eq!(h.email.sent_with_subject("cancelled").await.len(), 1);

    assert_eq!(h.engine.billing().sweep().await.unwrap().paid, 0);
    let err = subs.pause(sub.id, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let actions: Vec<HistoryAction> = subs
        .history(sub.id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(actions, vec![HistoryAction::Created, HistoryAction::Cancelled]);
}

#[tokio::test]
async fn test_unknown_subscription_is_not_found() {
    let h = Harness::new();
    let err = h
        .engine
        .subscriptions()
        .resume(uuid::Uuid::new_v4())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
