//! Scheduling domain module (event-sourced).
//!
//! This crate contains business rules for appointments — the visit lifecycle
//! state machine and consultation capture — implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage).

pub mod appointment;

pub use appointment::{
    Appointment, AppointmentCommand, AppointmentCreated, AppointmentEvent, AppointmentId,
    AppointmentStatus, ChangeStatus, Consultation, CreateAppointment, InvoiceLinked, LinkInvoice,
    StatusChanged,
};
