//! Read-model projections fed from committed event envelopes.
//!
//! Projections are disposable: each can be rebuilt from its aggregate's
//! event streams. Envelope application is idempotent (duplicates are
//! skipped by sequence number) because the bus is at-least-once.

mod appointments;
mod invoices;
mod payments;

pub use appointments::{APPOINTMENT_AGGREGATE_TYPE, AppointmentRecord, AppointmentsProjection};
pub use invoices::{INVOICE_AGGREGATE_TYPE, InvoiceRecord, InvoicesProjection};
pub use payments::{PAYMENT_AGGREGATE_TYPE, PaymentRecord, PaymentsProjection};

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;
use thiserror::Error;

use clinicops_core::{AggregateId, ClinicId};
use clinicops_events::EventEnvelope;

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize event payload: {0}")]
    Deserialize(String),

    #[error("clinic isolation violation: {0}")]
    ClinicIsolation(String),

    #[error("sequence numbers start at 1 (found 0)")]
    InvalidSequence,
}

/// Whether an envelope should be applied or silently skipped.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum CursorDecision {
    Apply,
    /// Already seen (at-least-once redelivery).
    Skip,
}

/// Per-stream sequence cursors shared by all projections in this crate.
#[derive(Debug, Default)]
pub(crate) struct Cursors {
    inner: RwLock<HashMap<(ClinicId, AggregateId), u64>>,
}

impl Cursors {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Decide whether an envelope at `seq` should be applied.
    ///
    /// Any sequence ahead of the cursor is applied, gaps included: events
    /// carry absolute state, and inline projection under stream contention
    /// can observe commits out of order, so a gap means "behind", not
    /// "broken". Anything at or behind the cursor is a redelivery.
    pub(crate) fn check(
        &self,
        clinic_id: ClinicId,
        aggregate_id: AggregateId,
        seq: u64,
    ) -> Result<CursorDecision, ProjectionError> {
        let last = match self.inner.read() {
            Ok(cursors) => *cursors.get(&(clinic_id, aggregate_id)).unwrap_or(&0),
            Err(_) => 0,
        };

        if seq == 0 {
            return Err(ProjectionError::InvalidSequence);
        }
        if seq <= last {
            return Ok(CursorDecision::Skip);
        }
        Ok(CursorDecision::Apply)
    }

    pub(crate) fn advance(&self, clinic_id: ClinicId, aggregate_id: AggregateId, seq: u64) {
        if let Ok(mut cursors) = self.inner.write() {
            cursors.insert((clinic_id, aggregate_id), seq);
        }
    }

    pub(crate) fn clear_clinic(&self, clinic_id: ClinicId) {
        if let Ok(mut cursors) = self.inner.write() {
            cursors.retain(|(c, _), _| *c != clinic_id);
        }
    }
}

/// All read models behind the application services, applied in one call.
///
/// Each projection ignores envelopes for aggregate types it does not track,
/// so fan-out is safe.
pub struct ReadModels {
    pub appointments: AppointmentsProjection,
    pub invoices: InvoicesProjection,
    pub payments: PaymentsProjection,
}

impl ReadModels {
    pub fn in_memory() -> Self {
        Self {
            appointments: AppointmentsProjection::in_memory(),
            invoices: InvoicesProjection::in_memory(),
            payments: PaymentsProjection::in_memory(),
        }
    }

    pub fn apply(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        self.appointments.apply_envelope(envelope)?;
        self.invoices.apply_envelope(envelope)?;
        self.payments.apply_envelope(envelope)?;
        Ok(())
    }
}

impl Default for ReadModels {
    fn default() -> Self {
        Self::in_memory()
    }
}
