//! Shared storage contract tests.
//!
//! Tests the OrderStore, SubscriptionStore, InvoiceStore and
//! NotificationLedger interfaces against every implementation. Each
//! implementation module imports these test functions and runs them.

pub mod invoice_store_tests;
pub mod ledger_tests;
pub mod order_store_tests;
pub mod subscription_store_tests;
