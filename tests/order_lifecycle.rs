//! Checkout orders from creation to delivery.

mod common;

use common::Harness;
use freshcycle::model::{LineItem, OrderDraft, OrderStatus, PaymentStatus};
use freshcycle::orders::PaymentResult;
use freshcycle::test_utils;
use freshcycle::ErrorKind;

async fn checkout(h: &Harness, items: Vec<LineItem>) -> freshcycle::model::Order {
    let totals = h
        .engine
        .orders()
        .quote(&items, &test_utils::address())
        .await
        .unwrap();
    h.engine
        .orders()
        .create_order(OrderDraft {
            customer: test_utils::customer("cust-checkout"),
            shipping_address: test_utils::address(),
            items,
            totals,
            notes: Some("leave by the gate".to_string()),
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_checkout_to_delivery() {
    let h = Harness::new();
    let order = checkout(&h, vec![test_utils::line_item("kale-box", 2, 1500)]).await;
    assert_eq!(order.status, OrderStatus::PendingPayment);
    assert_eq!(order.totals.shipping_cents, 599);
    assert_eq!(order.totals.tax_cents, 248);
    assert!(h.email.sent().await.is_empty());

    let orders = h.engine.orders();
    let order = orders
        .confirm_payment(
            order.id,
            PaymentResult::Approved {
                transaction_id: "txn_checkout".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_status, PaymentStatus::Paid);

    orders.set_status(order.id, OrderStatus::Processing).await.unwrap();
    let shipped = orders
        .attach_tracking(order.id, "1Z999AA10123456784", "UPS")
        .await
        .unwrap();
    assert_eq!(shipped.status, OrderStatus::Shipped);
    assert!(shipped.shipped_at.is_some());

    orders.set_status(order.id, OrderStatus::OutForDelivery).await.unwrap();
    let delivered = orders.set_status(order.id, OrderStatus::Delivered).await.unwrap();
    assert_eq!(delivered.tracking_number.as_deref(), Some("1Z999AA10123456784"));

    let subjects: Vec<String> = h.email.sent().await.into_iter().map(|m| m.subject).collect();
    assert_eq!(subjects.len(), 5);
    assert!(subjects[0].starts_with("Order confirmed"));
    assert!(subjects[4].ends_with("was delivered"));
}

#[tokio::test]
async fn test_shipping_twice_sends_one_email() {
    let h = Harness::new();
    let order = checkout(&h, vec![test_utils::line_item("kale-box", 1, 1500)]).await;
    let orders = h.engine.orders();
    orders
        .confirm_payment(
            order.id,
            PaymentResult::Approved {
                transaction_id: "txn_1".to_string(),
            },
        )
        .await
        .unwrap();
    orders.set_status(order.id, OrderStatus::Processing).await.unwrap();

    orders.attach_tracking(order.id, "TRACK-1", "USPS").await.unwrap();
    orders.attach_tracking(order.id, "TRACK-1", "USPS").await.unwrap();
    orders.set_status(order.id, OrderStatus::Shipped).await.unwrap();

    assert_eq!(h.email.sent_with_subject("has shipped").await.len(), 1);
}

#[tokio::test]
async fn test_illegal_transition_leaves_order_unchanged() {
    let h = Harness::new();
    let order = checkout(&h, vec![test_utils::line_item("kale-box", 1, 1500)]).await;
    let orders = h.engine.orders();
    orders
        .confirm_payment(
            order.id,
            PaymentResult::Approved {
                transaction_id: "txn_2".to_string(),
            },
        )
        .await
        .unwrap();
    let before = orders.get_order(order.id).await.unwrap();

    let err = orders
        .set_status(order.id, OrderStatus::Delivered)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(orders.get_order(order.id).await.unwrap(), before);
}

#[tokio::test]
async fn test_out_of_stock_rejects_checkout() {
    let h = Harness::new();
    let items = vec![test_utils::line_item("fruit-box", 3, 2000)];
    let totals = h
        .engine
        .orders()
        .quote(&items, &test_utils::address())
        .await
        .unwrap();
    assert_eq!(totals.shipping_cents, 0, "free shipping at $50");

    let err = h
        .engine
        .orders()
        .create_order(OrderDraft {
            customer: test_utils::customer("cust-oos"),
            shipping_address: test_utils::address(),
            items,
            totals,
            notes: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(h
        .engine
        .orders()
        .orders_for_customer("cust-oos")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_cancel_before_shipping() {
    let h = Harness::new();
    let order = checkout(&h, vec![test_utils::line_item("kale-box", 1, 1500)]).await;
    let canceled = h
        .engine
        .orders()
        .set_status(order.id, OrderStatus::Canceled)
        .await
        .unwrap();
    assert_eq!(canceled.status, OrderStatus::Canceled);

    let err = h
        .engine
        .orders()
        .confirm_payment(
            order.id,
            PaymentResult::Approved {
                transaction_id: "txn_late".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}
