//! Payments domain module (event-sourced).
//!
//! This crate contains business rules for individual payments against an
//! invoice's outstanding balance — the settlement lifecycle, refunds, and
//! the external gateway boundary. The aggregate is deterministic domain
//! logic; the only asynchronous piece is the `SettlementGateway` trait the
//! reconciliation service awaits.

pub mod gateway;
pub mod payment;

pub use gateway::{SettlementGateway, SettlementOutcome, SettlementRequest, SimulatedGateway};
pub use payment::{
    BeginProcessing, CancelPayment, CompletePayment, CreatePayment, FailPayment, NotesUpdated,
    Payment, PaymentCancelled, PaymentCommand, PaymentCompleted, PaymentCreated, PaymentEvent,
    PaymentFailed, PaymentId, PaymentMethod, PaymentRefunded, PaymentRemoved, PaymentStatus,
    ProcessingStarted, RefundPayment, RemovePayment, UpdateNotes,
};
