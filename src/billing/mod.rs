//! Subscription billing: invoice generation, payment execution and the
//! scheduler that drives both.

pub mod invoice;
pub mod payment;
pub mod scheduler;

pub use invoice::{invoice_number, InvoiceGenerator};
pub use payment::{PaymentExecutor, PaymentOutcome};
pub use scheduler::{
    BillingScheduler, CycleOutcome, ReconcileReport, SchedulerHandle, SkipReason, SweepReport,
};
