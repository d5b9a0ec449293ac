//! Invoices projection: balances and statuses per clinic, plus the overdue
//! query.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use clinicops_billing::{InvoiceEvent, InvoiceId, InvoiceStatus, derive_status};
use clinicops_core::ClinicId;
use clinicops_directory::PatientId;
use clinicops_events::EventEnvelope;
use clinicops_scheduling::AppointmentId;

use crate::read_model::{ClinicStore, InMemoryClinicStore};

use super::{CursorDecision, Cursors, ProjectionError};

pub const INVOICE_AGGREGATE_TYPE: &str = "billing.invoice";

/// Read model: one row per live invoice. Removed invoices leave the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceRecord {
    pub invoice_id: InvoiceId,
    pub patient_id: PatientId,
    pub invoice_number: String,
    pub status: InvoiceStatus,
    pub total_amount: u64,
    pub paid_amount: u64,
    pub tax_amount: u64,
    pub discount_amount: u64,
    pub due_date: Option<DateTime<Utc>>,
    pub appointment_id: Option<AppointmentId>,
}

impl InvoiceRecord {
    pub fn remaining_amount(&self) -> u64 {
        self.total_amount.saturating_sub(self.paid_amount)
    }
}

pub struct InvoicesProjection {
    store: Arc<dyn ClinicStore<InvoiceId, InvoiceRecord>>,
    cursors: Cursors,
}

impl InvoicesProjection {
    pub fn new(store: Arc<dyn ClinicStore<InvoiceId, InvoiceRecord>>) -> Self {
        Self {
            store,
            cursors: Cursors::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryClinicStore::new()))
    }

    pub fn get(&self, clinic_id: ClinicId, id: &InvoiceId) -> Option<InvoiceRecord> {
        self.store.get(clinic_id, id)
    }

    pub fn list(&self, clinic_id: ClinicId) -> Vec<InvoiceRecord> {
        self.store.list(clinic_id)
    }

    /// Invoices due at or before `now` and still fully unpaid.
    ///
    /// Partially paid invoices are excluded: a balance in motion is not
    /// treated as delinquent. Flagged as a business-rule choice rather than
    /// assumed silently; the integration suite pins it.
    pub fn list_overdue(&self, clinic_id: ClinicId, now: DateTime<Utc>) -> Vec<InvoiceRecord> {
        self.store
            .list(clinic_id)
            .into_iter()
            .filter(|inv| {
                inv.status == InvoiceStatus::Issued
                    && inv.due_date.is_some_and(|due| due <= now)
            })
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
        if envelope.aggregate_type() != INVOICE_AGGREGATE_TYPE {
            return Ok(());
        }

        let clinic_id = envelope.clinic_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        match self.cursors.check(clinic_id, aggregate_id, seq)? {
            CursorDecision::Skip => return Ok(()),
            CursorDecision::Apply => {}
        }

        let ev: InvoiceEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let (event_clinic, invoice_id) = match &ev {
            InvoiceEvent::InvoiceIssued(e) => (e.clinic_id, e.invoice_id),
            InvoiceEvent::PaymentApplied(e) => (e.clinic_id, e.invoice_id),
            InvoiceEvent::PaymentRolledBack(e) => (e.clinic_id, e.invoice_id),
            InvoiceEvent::InvoiceRemoved(e) => (e.clinic_id, e.invoice_id),
        };

        if event_clinic != clinic_id {
            return Err(ProjectionError::ClinicIsolation(
                "event clinic_id does not match envelope clinic_id".to_string(),
            ));
        }
        if invoice_id.0 != aggregate_id {
            return Err(ProjectionError::ClinicIsolation(
                "event invoice_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match ev {
            InvoiceEvent::InvoiceIssued(e) => {
                let record = InvoiceRecord {
                    invoice_id: e.invoice_id,
                    patient_id: e.patient_id,
                    invoice_number: e.invoice_number,
                    status: InvoiceStatus::Issued,
                    total_amount: e.total_amount,
                    paid_amount: 0,
                    tax_amount: e.tax_amount,
                    discount_amount: e.discount_amount,
                    due_date: e.due_date,
                    appointment_id: e.appointment_id,
                };
                self.store.upsert(clinic_id, e.invoice_id, record);
            }
            InvoiceEvent::PaymentApplied(e) => {
                if let Some(mut record) = self.store.get(clinic_id, &e.invoice_id) {
                    record.paid_amount = e.new_paid_amount;
                    record.status = derive_status(record.paid_amount, record.total_amount);
                    self.store.upsert(clinic_id, e.invoice_id, record);
                }
            }
            InvoiceEvent::PaymentRolledBack(e) => {
                if let Some(mut record) = self.store.get(clinic_id, &e.invoice_id) {
                    record.paid_amount = e.new_paid_amount;
                    record.status = derive_status(record.paid_amount, record.total_amount);
                    self.store.upsert(clinic_id, e.invoice_id, record);
                }
            }
            InvoiceEvent::InvoiceRemoved(e) => {
                self.store.remove(clinic_id, &e.invoice_id);
            }
        }

        self.cursors.advance(clinic_id, aggregate_id, seq);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use clinicops_billing::{InvoiceIssued, InvoiceRemoved, PaymentApplied};
    use clinicops_core::AggregateId;

    fn make_envelope(
        clinic_id: ClinicId,
        aggregate_id: AggregateId,
        seq: u64,
        event: InvoiceEvent,
    ) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            uuid::Uuid::now_v7(),
            clinic_id,
            aggregate_id,
            INVOICE_AGGREGATE_TYPE,
            seq,
            serde_json::to_value(&event).unwrap(),
        )
    }

    fn issued(
        clinic_id: ClinicId,
        invoice_id: InvoiceId,
        total: u64,
        due_date: Option<DateTime<Utc>>,
    ) -> InvoiceEvent {
        InvoiceEvent::InvoiceIssued(InvoiceIssued {
            clinic_id,
            invoice_id,
            patient_id: PatientId::new(AggregateId::new()),
            invoice_number: "INV-20260824-1".to_string(),
            total_amount: total,
            tax_amount: 0,
            discount_amount: 0,
            due_date,
            appointment_id: None,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn payment_re_derives_status() {
        let proj = InvoicesProjection::in_memory();
        let clinic_id = ClinicId::new();
        let invoice_id = InvoiceId::new(AggregateId::new());

        proj.apply_envelope(&make_envelope(
            clinic_id,
            invoice_id.0,
            1,
            issued(clinic_id, invoice_id, 100, None),
        ))
        .unwrap();

        let applied = InvoiceEvent::PaymentApplied(PaymentApplied {
            clinic_id,
            invoice_id,
            amount: 60,
            new_paid_amount: 60,
            occurred_at: Utc::now(),
        });
        proj.apply_envelope(&make_envelope(clinic_id, invoice_id.0, 2, applied))
            .unwrap();

        let record = proj.get(clinic_id, &invoice_id).unwrap();
        assert_eq!(record.status, InvoiceStatus::PartiallyPaid);
        assert_eq!(record.remaining_amount(), 40);
    }

    #[test]
    fn overdue_excludes_partially_paid() {
        let proj = InvoicesProjection::in_memory();
        let clinic_id = ClinicId::new();
        let now = Utc::now();
        let past_due = Some(now - Duration::days(5));

        let unpaid = InvoiceId::new(AggregateId::new());
        proj.apply_envelope(&make_envelope(
            clinic_id,
            unpaid.0,
            1,
            issued(clinic_id, unpaid, 100, past_due),
        ))
        .unwrap();

        let partial = InvoiceId::new(AggregateId::new());
        proj.apply_envelope(&make_envelope(
            clinic_id,
            partial.0,
            1,
            issued(clinic_id, partial, 100, past_due),
        ))
        .unwrap();
        let applied = InvoiceEvent::PaymentApplied(PaymentApplied {
            clinic_id,
            invoice_id: partial,
            amount: 30,
            new_paid_amount: 30,
            occurred_at: now,
        });
        proj.apply_envelope(&make_envelope(clinic_id, partial.0, 2, applied))
            .unwrap();

        let overdue = proj.list_overdue(clinic_id, now);
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].invoice_id, unpaid);
    }

    #[test]
    fn invoice_due_exactly_now_is_overdue() {
        let proj = InvoicesProjection::in_memory();
        let clinic_id = ClinicId::new();
        let now = Utc::now();

        let invoice_id = InvoiceId::new(AggregateId::new());
        proj.apply_envelope(&make_envelope(
            clinic_id,
            invoice_id.0,
            1,
            issued(clinic_id, invoice_id, 100, Some(now)),
        ))
        .unwrap();

        let overdue = proj.list_overdue(clinic_id, now);
        assert_eq!(overdue.len(), 1);
        assert!(proj.list_overdue(clinic_id, now - Duration::seconds(1)).is_empty());
    }

    #[test]
    fn removal_drops_the_record() {
        let proj = InvoicesProjection::in_memory();
        let clinic_id = ClinicId::new();
        let invoice_id = InvoiceId::new(AggregateId::new());

        proj.apply_envelope(&make_envelope(
            clinic_id,
            invoice_id.0,
            1,
            issued(clinic_id, invoice_id, 100, None),
        ))
        .unwrap();

        let removed = InvoiceEvent::InvoiceRemoved(InvoiceRemoved {
            clinic_id,
            invoice_id,
            occurred_at: Utc::now(),
        });
        proj.apply_envelope(&make_envelope(clinic_id, invoice_id.0, 2, removed))
            .unwrap();

        assert!(proj.get(clinic_id, &invoice_id).is_none());
    }
}
