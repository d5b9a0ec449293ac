//! Appointments projection: current state of every visit per clinic.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use clinicops_auth::Role;
use clinicops_core::{AggregateId, ClinicId, UserId};
use clinicops_directory::{DoctorId, PatientId};
use clinicops_events::EventEnvelope;
use clinicops_scheduling::{AppointmentEvent, AppointmentId, AppointmentStatus, Consultation};

use crate::read_model::{ClinicStore, InMemoryClinicStore};

use super::{CursorDecision, Cursors, ProjectionError};

pub const APPOINTMENT_AGGREGATE_TYPE: &str = "scheduling.appointment";

/// Read model: one row per appointment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentRecord {
    pub appointment_id: AppointmentId,
    pub patient_id: PatientId,
    pub doctor_id: DoctorId,
    pub receptionist_id: Option<UserId>,
    pub reason: String,
    pub billed_amount: u64,
    pub scheduled_at: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub consultation: Option<Consultation>,
    pub invoice_id: Option<AggregateId>,
    pub created_by: Role,
}

pub struct AppointmentsProjection {
    store: Arc<dyn ClinicStore<AppointmentId, AppointmentRecord>>,
    cursors: Cursors,
}

impl AppointmentsProjection {
    pub fn new(store: Arc<dyn ClinicStore<AppointmentId, AppointmentRecord>>) -> Self {
        Self {
            store,
            cursors: Cursors::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryClinicStore::new()))
    }

    pub fn get(&self, clinic_id: ClinicId, id: &AppointmentId) -> Option<AppointmentRecord> {
        self.store.get(clinic_id, id)
    }

    pub fn list(&self, clinic_id: ClinicId) -> Vec<AppointmentRecord> {
        self.store.list(clinic_id)
    }

    pub fn list_by_status(
        &self,
        clinic_id: ClinicId,
        status: AppointmentStatus,
    ) -> Vec<AppointmentRecord> {
        self.store
            .list(clinic_id)
            .into_iter()
            .filter(|a| a.status == status)
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
        if envelope.aggregate_type() != APPOINTMENT_AGGREGATE_TYPE {
            return Ok(());
        }

        let clinic_id = envelope.clinic_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        match self.cursors.check(clinic_id, aggregate_id, seq)? {
            CursorDecision::Skip => return Ok(()),
            CursorDecision::Apply => {}
        }

        let ev: AppointmentEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let (event_clinic, appointment_id) = match &ev {
            AppointmentEvent::AppointmentCreated(e) => (e.clinic_id, e.appointment_id),
            AppointmentEvent::StatusChanged(e) => (e.clinic_id, e.appointment_id),
            AppointmentEvent::InvoiceLinked(e) => (e.clinic_id, e.appointment_id),
        };

        if event_clinic != clinic_id {
            return Err(ProjectionError::ClinicIsolation(
                "event clinic_id does not match envelope clinic_id".to_string(),
            ));
        }
        if appointment_id.0 != aggregate_id {
            return Err(ProjectionError::ClinicIsolation(
                "event appointment_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match ev {
            AppointmentEvent::AppointmentCreated(e) => {
                let record = AppointmentRecord {
                    appointment_id: e.appointment_id,
                    patient_id: e.patient_id,
                    doctor_id: e.doctor_id,
                    receptionist_id: e.receptionist_id,
                    reason: e.reason,
                    billed_amount: e.billed_amount,
                    scheduled_at: e.scheduled_at,
                    status: AppointmentStatus::Pending,
                    consultation: None,
                    invoice_id: None,
                    created_by: e.created_by,
                };
                self.store.upsert(clinic_id, e.appointment_id, record);
            }
            AppointmentEvent::StatusChanged(e) => {
                if let Some(mut record) = self.store.get(clinic_id, &e.appointment_id) {
                    record.status = e.new_status;
                    if let Some(consultation) = e.consultation {
                        record.consultation = Some(consultation);
                    }
                    self.store.upsert(clinic_id, e.appointment_id, record);
                }
            }
            AppointmentEvent::InvoiceLinked(e) => {
                if let Some(mut record) = self.store.get(clinic_id, &e.appointment_id) {
                    record.invoice_id = Some(e.invoice_id);
                    self.store.upsert(clinic_id, e.appointment_id, record);
                }
            }
        }

        self.cursors.advance(clinic_id, aggregate_id, seq);
        Ok(())
    }
}
