//! Billing domain module (event-sourced).
//!
//! This crate contains business rules for invoices — derivation from a
//! completed visit, the paid-balance bounds, and status re-derivation as
//! payments apply and roll back — implemented purely as deterministic
//! domain logic (no IO, no HTTP, no storage).

pub mod invoice;

pub use invoice::{
    ApplyPayment, Invoice, InvoiceCommand, InvoiceEvent, InvoiceId, InvoiceIssued, InvoiceRemoved,
    InvoiceStatus, IssueInvoice, PaymentApplied, PaymentRolledBack, RemoveInvoice, RollbackPayment,
    derive_status,
};
