//! Appointment scheduling service.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use clinicops_auth::{Action, Caller, Role, authorize};
use clinicops_core::{AggregateId, ClinicId};
use clinicops_directory::{DirectoryProvider, AccountDirectory, DoctorId, PatientId};
use clinicops_scheduling::{
    Appointment, AppointmentCommand, AppointmentId, AppointmentStatus, ChangeStatus, Consultation,
    CreateAppointment,
};

use crate::projections::{APPOINTMENT_AGGREGATE_TYPE, AppointmentRecord, ReadModels};

use super::{Dispatcher, ServiceError, project, resolve_caller};

/// Input for scheduling a visit.
#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub patient_id: PatientId,
    pub doctor_id: DoctorId,
    pub reason: String,
    pub scheduled_at: DateTime<Utc>,
    /// Defaults to the clinic's standard visit fee when omitted.
    pub billed_amount: Option<u64>,
}

pub struct AppointmentService {
    dispatcher: Arc<Dispatcher>,
    directory: Arc<dyn DirectoryProvider>,
    accounts: Arc<AccountDirectory>,
    read_models: Arc<ReadModels>,
}

impl AppointmentService {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        directory: Arc<dyn DirectoryProvider>,
        accounts: Arc<AccountDirectory>,
        read_models: Arc<ReadModels>,
    ) -> Self {
        Self {
            dispatcher,
            directory,
            accounts,
            read_models,
        }
    }

    /// Schedule a new visit.
    pub fn create_appointment(
        &self,
        caller: &Caller,
        clinic_id: ClinicId,
        input: NewAppointment,
    ) -> Result<AppointmentId, ServiceError> {
        authorize(caller, Action::CreateAppointment)?;
        resolve_caller(&self.accounts, caller)?;

        let clinic = self
            .directory
            .clinic(clinic_id)
            .ok_or_else(|| ServiceError::NotFound("clinic not found".to_string()))?;
        self.directory
            .patient(clinic_id, input.patient_id)
            .ok_or_else(|| ServiceError::NotFound("patient not found".to_string()))?;
        self.directory
            .doctor(clinic_id, input.doctor_id)
            .ok_or_else(|| ServiceError::NotFound("doctor not found".to_string()))?;

        let appointment_id = AppointmentId::new(AggregateId::new());
        let billed_amount = input.billed_amount.unwrap_or(clinic.standard_visit_fee);
        let receptionist_id = (caller.role == Role::Receptionist).then_some(caller.user_id);

        let committed = self.dispatcher.dispatch::<Appointment>(
            clinic_id,
            appointment_id.0,
            APPOINTMENT_AGGREGATE_TYPE,
            AppointmentCommand::CreateAppointment(CreateAppointment {
                clinic_id,
                appointment_id,
                patient_id: input.patient_id,
                doctor_id: input.doctor_id,
                receptionist_id,
                reason: input.reason,
                billed_amount,
                scheduled_at: input.scheduled_at,
                created_by: caller.role,
                occurred_at: Utc::now(),
            }),
            |_, id| Appointment::empty(AppointmentId::new(id)),
        )?;
        project(&self.read_models, &committed)?;

        info!(
            appointment_id = %appointment_id,
            clinic_id = %clinic_id,
            billed_amount,
            "appointment created"
        );
        Ok(appointment_id)
    }

    /// Move a visit through its lifecycle.
    ///
    /// Completing requires consultation notes with a non-blank examination;
    /// the aggregate enforces that and the absorbing completed state.
    pub fn change_status(
        &self,
        caller: &Caller,
        clinic_id: ClinicId,
        appointment_id: AppointmentId,
        new_status: AppointmentStatus,
        consultation: Option<Consultation>,
    ) -> Result<(), ServiceError> {
        authorize(caller, Action::ChangeAppointmentStatus)?;
        resolve_caller(&self.accounts, caller)?;

        let committed = self.dispatcher.dispatch::<Appointment>(
            clinic_id,
            appointment_id.0,
            APPOINTMENT_AGGREGATE_TYPE,
            AppointmentCommand::ChangeStatus(ChangeStatus {
                clinic_id,
                appointment_id,
                new_status,
                consultation,
                occurred_at: Utc::now(),
            }),
            |_, id| Appointment::empty(AppointmentId::new(id)),
        )?;
        project(&self.read_models, &committed)?;

        info!(
            appointment_id = %appointment_id,
            status = ?new_status,
            "appointment status changed"
        );
        Ok(())
    }

    pub fn appointment(
        &self,
        clinic_id: ClinicId,
        appointment_id: AppointmentId,
    ) -> Option<AppointmentRecord> {
        self.read_models.appointments.get(clinic_id, &appointment_id)
    }

    pub fn appointments(&self, clinic_id: ClinicId) -> Vec<AppointmentRecord> {
        self.read_models.appointments.list(clinic_id)
    }
}
