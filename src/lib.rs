//! freshcycle - Order Lifecycle & Subscription Billing Engine
//!
//! Drives one-time orders through their status graph and bills recurring
//! subscriptions on a calendar schedule, firing each customer notification
//! exactly once.

pub mod billing;
pub mod clock;
pub mod collaborators;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod notification;
pub mod orders;
pub mod schedule;
pub mod storage;
pub mod subscriptions;
pub mod test_utils;
pub mod utils;

pub use engine::{Engine, EngineBuilder};
pub use error::{EngineError, ErrorKind, Result};
