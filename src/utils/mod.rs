//! Shared utilities: tracing bootstrap, retry policies and keyed locks.

pub mod bootstrap;
pub mod locks;
pub mod retry;

pub use locks::KeyedLocks;
pub use retry::RetryPolicy;
