//! `faktura-invoicing` — invoices (Rechnungen) and payment reminders
//! (Mahnungen).
//!
//! Invoices carry an `RE-` document number, accumulate partial payments, and
//! escalate through up to three reminder levels while open. Cancellation
//! (Storno) is terminal; paid invoices cannot be cancelled.

pub mod invoice;

pub use invoice::{
    CancelInvoice, CreateInvoice, Invoice, InvoiceCancelled, InvoiceCommand, InvoiceCreated,
    InvoiceEvent, InvoiceId, InvoiceLine, InvoiceMarkedOverdue, InvoiceSent, InvoiceStatus,
    InvoiceTotals, IssueReminder, MarkOverdue, MAX_REMINDER_LEVEL, PaymentRegistered,
    RegisterPayment, ReminderIssued, SendInvoice,
};
