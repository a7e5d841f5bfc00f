pub mod holds;
pub mod invoices;
pub mod refunds;
pub mod sweeper;
pub mod webhook;

pub use holds::{HoldResult, SeatHoldManager};
pub use invoices::{CheckoutRequest, CheckoutResponse, InvoiceBuilder};
pub use refunds::RefundWorkflow;
pub use sweeper::Sweeper;
pub use webhook::{PaymentReconciler, WebhookOutcome};
