pub mod checkout;
pub mod jobs;
pub mod ledger;
pub mod reconcile;
pub mod services;

#[cfg(test)]
mod test_support;

pub use checkout::{CartCheckout, CheckoutReport, ItemIssue};
pub use jobs::{HorizonReport, JobReport, JobRunner, JobTrigger};
pub use ledger::{BookingLedger, CreateBookingRequest};
pub use reconcile::{
    linked_booking_id, BatchRecoveryReport, FailureOutcome, OrphanedPayment, PaymentFailed, PaymentSucceeded,
    ReconciliationPipeline, RecoveredPayment, RecoveryIssue, SuccessOutcome,
};
pub use services::BookingServices;
