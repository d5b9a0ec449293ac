//! Payments projection: settlement state per payment, queryable by invoice.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use clinicops_billing::InvoiceId;
use clinicops_core::ClinicId;
use clinicops_events::EventEnvelope;
use clinicops_payments::{PaymentEvent, PaymentId, PaymentMethod, PaymentStatus};

use crate::read_model::{ClinicStore, InMemoryClinicStore};

use super::{CursorDecision, Cursors, ProjectionError};

pub const PAYMENT_AGGREGATE_TYPE: &str = "payments.payment";

/// Read model: one row per live payment. Removed payments leave the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRecord {
    pub payment_id: PaymentId,
    pub invoice_id: InvoiceId,
    pub amount: u64,
    pub method: PaymentMethod,
    pub transaction_id: String,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub status: PaymentStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

pub struct PaymentsProjection {
    store: Arc<dyn ClinicStore<PaymentId, PaymentRecord>>,
    cursors: Cursors,
}

impl PaymentsProjection {
    pub fn new(store: Arc<dyn ClinicStore<PaymentId, PaymentRecord>>) -> Self {
        Self {
            store,
            cursors: Cursors::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryClinicStore::new()))
    }

    pub fn get(&self, clinic_id: ClinicId, id: &PaymentId) -> Option<PaymentRecord> {
        self.store.get(clinic_id, id)
    }

    pub fn list(&self, clinic_id: ClinicId) -> Vec<PaymentRecord> {
        self.store.list(clinic_id)
    }

    pub fn list_for_invoice(&self, clinic_id: ClinicId, invoice_id: InvoiceId) -> Vec<PaymentRecord> {
        self.store
            .list(clinic_id)
            .into_iter()
            .filter(|p| p.invoice_id == invoice_id)
            .collect()
    }

    pub fn clear_clinic(&self, clinic_id: ClinicId) {
        self.store.clear_clinic(clinic_id);
        self.cursors.clear_clinic(clinic_id);
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != PAYMENT_AGGREGATE_TYPE {
            return Ok(());
        }

        let clinic_id = envelope.clinic_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        match self.cursors.check(clinic_id, aggregate_id, seq)? {
            CursorDecision::Skip => return Ok(()),
            CursorDecision::Apply => {}
        }

        let ev: PaymentEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let (event_clinic, payment_id) = match &ev {
            PaymentEvent::PaymentCreated(e) => (e.clinic_id, e.payment_id),
            PaymentEvent::ProcessingStarted(e) => (e.clinic_id, e.payment_id),
            PaymentEvent::PaymentCompleted(e) => (e.clinic_id, e.payment_id),
            PaymentEvent::PaymentFailed(e) => (e.clinic_id, e.payment_id),
            PaymentEvent::PaymentRefunded(e) => (e.clinic_id, e.payment_id),
            PaymentEvent::PaymentCancelled(e) => (e.clinic_id, e.payment_id),
            PaymentEvent::NotesUpdated(e) => (e.clinic_id, e.payment_id),
            PaymentEvent::PaymentRemoved(e) => (e.clinic_id, e.payment_id),
        };

        if event_clinic != clinic_id {
            return Err(ProjectionError::ClinicIsolation(
                "event clinic_id does not match envelope clinic_id".to_string(),
            ));
        }
        if payment_id.0 != aggregate_id {
            return Err(ProjectionError::ClinicIsolation(
                "event payment_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match ev {
            PaymentEvent::PaymentCreated(e) => {
                let record = PaymentRecord {
                    payment_id: e.payment_id,
                    invoice_id: e.invoice_id,
                    amount: e.amount,
                    method: e.method,
                    transaction_id: e.transaction_id,
                    reference: e.reference,
                    notes: e.notes,
                    status: PaymentStatus::Pending,
                    completed_at: None,
                    refunded_at: None,
                };
                self.store.upsert(clinic_id, e.payment_id, record);
            }
            PaymentEvent::ProcessingStarted(e) => {
                self.update(clinic_id, e.payment_id, |record| {
                    record.status = PaymentStatus::Processing;
                });
            }
            PaymentEvent::PaymentCompleted(e) => {
                self.update(clinic_id, e.payment_id, |record| {
                    record.status = PaymentStatus::Completed;
                    record.completed_at = Some(e.completed_at);
                });
            }
            PaymentEvent::PaymentFailed(e) => {
                self.update(clinic_id, e.payment_id, |record| {
                    record.status = PaymentStatus::Failed;
                    record.notes = Some(match record.notes.take() {
                        Some(existing) => format!("{existing}; {}", e.note),
                        None => e.note.clone(),
                    });
                });
            }
            PaymentEvent::PaymentRefunded(e) => {
                self.update(clinic_id, e.payment_id, |record| {
                    record.status = PaymentStatus::Refunded;
                    record.refunded_at = Some(e.refunded_at);
                });
            }
            PaymentEvent::PaymentCancelled(e) => {
                self.update(clinic_id, e.payment_id, |record| {
                    record.status = PaymentStatus::Cancelled;
                });
            }
            PaymentEvent::NotesUpdated(e) => {
                self.update(clinic_id, e.payment_id, |record| {
                    if e.notes.is_some() {
                        record.notes = e.notes.clone();
                    }
                    if e.reference.is_some() {
                        record.reference = e.reference.clone();
                    }
                });
            }
            PaymentEvent::PaymentRemoved(e) => {
                self.store.remove(clinic_id, &e.payment_id);
            }
        }

        self.cursors.advance(clinic_id, aggregate_id, seq);
        Ok(())
    }

    fn update(&self, clinic_id: ClinicId, id: PaymentId, f: impl FnOnce(&mut PaymentRecord)) {
        if let Some(mut record) = self.store.get(clinic_id, &id) {
            f(&mut record);
            self.store.upsert(clinic_id, id, record);
        }
    }
}
