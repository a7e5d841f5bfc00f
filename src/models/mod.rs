pub mod catalog;
pub mod invoice;
pub mod refund;
pub mod seat;
pub mod ticket;

pub use catalog::{seat_price, ComboItem, Showtime, Voucher, VoucherTarget};
pub use invoice::{ComboLine, Invoice, InvoiceStatus};
pub use refund::{BankAccount, ReconciliationFlag, RefundRequest, RefundStatus};
pub use seat::{SeatStatus, ShowtimeSeat};
pub use ticket::{Ticket, TicketStatus};
