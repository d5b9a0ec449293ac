use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use clinicops_auth::Role;
use clinicops_core::{Aggregate, AggregateId, AggregateRoot, ClinicId, DomainError, UserId, ValueObject};
use clinicops_directory::{DoctorId, PatientId};
use clinicops_events::Event;

/// Appointment identifier (clinic-scoped via `clinic_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppointmentId(pub AggregateId);

impl AppointmentId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for AppointmentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Appointment status lifecycle.
///
/// Serialized names are the persisted wire contract and must round-trip
/// exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Pending,
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

/// Clinical notes attached when a visit completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consultation {
    pub examination: String,
    pub diagnosis: Option<String>,
    pub treatment: Option<String>,
}

impl ValueObject for Consultation {}

/// Aggregate root: Appointment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appointment {
    id: AppointmentId,
    clinic_id: Option<ClinicId>,
    patient_id: Option<PatientId>,
    doctor_id: Option<DoctorId>,
    receptionist_id: Option<UserId>,
    reason: String,
    /// Amount billed for the visit, in the smallest currency unit.
    billed_amount: u64,
    scheduled_at: Option<DateTime<Utc>>,
    status: AppointmentStatus,
    consultation: Option<Consultation>,
    /// 1:1 back-reference to the invoice derived from this visit.
    invoice_id: Option<AggregateId>,
    version: u64,
    created: bool,
}

impl Appointment {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: AppointmentId) -> Self {
        Self {
            id,
            clinic_id: None,
            patient_id: None,
            doctor_id: None,
            receptionist_id: None,
            reason: String::new(),
            billed_amount: 0,
            scheduled_at: None,
            status: AppointmentStatus::Pending,
            consultation: None,
            invoice_id: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> AppointmentId {
        self.id
    }

    pub fn clinic_id(&self) -> Option<ClinicId> {
        self.clinic_id
    }

    pub fn patient_id(&self) -> Option<PatientId> {
        self.patient_id
    }

    pub fn doctor_id(&self) -> Option<DoctorId> {
        self.doctor_id
    }

    pub fn receptionist_id(&self) -> Option<UserId> {
        self.receptionist_id
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn billed_amount(&self) -> u64 {
        self.billed_amount
    }

    pub fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        self.scheduled_at
    }

    pub fn status(&self) -> AppointmentStatus {
        self.status
    }

    pub fn consultation(&self) -> Option<&Consultation> {
        self.consultation.as_ref()
    }

    pub fn invoice_id(&self) -> Option<AggregateId> {
        self.invoice_id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    /// Invariant: a completed visit is absorbing — no further transitions.
    pub fn is_mutable(&self) -> bool {
        self.status != AppointmentStatus::Completed
    }
}

impl AggregateRoot for Appointment {
    type Id = AppointmentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateAppointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAppointment {
    pub clinic_id: ClinicId,
    pub appointment_id: AppointmentId,
    pub patient_id: PatientId,
    pub doctor_id: DoctorId,
    pub receptionist_id: Option<UserId>,
    pub reason: String,
    pub billed_amount: u64,
    pub scheduled_at: DateTime<Utc>,
    pub created_by: Role,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeStatus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeStatus {
    pub clinic_id: ClinicId,
    pub appointment_id: AppointmentId,
    pub new_status: AppointmentStatus,
    /// Required (with a non-empty examination) when completing the visit.
    pub consultation: Option<Consultation>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: LinkInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkInvoice {
    pub clinic_id: ClinicId,
    pub appointment_id: AppointmentId,
    pub invoice_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentCommand {
    CreateAppointment(CreateAppointment),
    ChangeStatus(ChangeStatus),
    LinkInvoice(LinkInvoice),
}

/// Event: AppointmentCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentCreated {
    pub clinic_id: ClinicId,
    pub appointment_id: AppointmentId,
    pub patient_id: PatientId,
    pub doctor_id: DoctorId,
    pub receptionist_id: Option<UserId>,
    pub reason: String,
    pub billed_amount: u64,
    pub scheduled_at: DateTime<Utc>,
    pub created_by: Role,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChanged {
    pub clinic_id: ClinicId,
    pub appointment_id: AppointmentId,
    pub new_status: AppointmentStatus,
    pub consultation: Option<Consultation>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceLinked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLinked {
    pub clinic_id: ClinicId,
    pub appointment_id: AppointmentId,
    pub invoice_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentEvent {
    AppointmentCreated(AppointmentCreated),
    StatusChanged(StatusChanged),
    InvoiceLinked(InvoiceLinked),
}

impl Event for AppointmentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AppointmentEvent::AppointmentCreated(_) => "scheduling.appointment.created",
            AppointmentEvent::StatusChanged(_) => "scheduling.appointment.status_changed",
            AppointmentEvent::InvoiceLinked(_) => "scheduling.appointment.invoice_linked",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AppointmentEvent::AppointmentCreated(e) => e.occurred_at,
            AppointmentEvent::StatusChanged(e) => e.occurred_at,
            AppointmentEvent::InvoiceLinked(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Appointment {
    type Command = AppointmentCommand;
    type Event = AppointmentEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            AppointmentEvent::AppointmentCreated(e) => {
                self.id = e.appointment_id;
                self.clinic_id = Some(e.clinic_id);
                self.patient_id = Some(e.patient_id);
                self.doctor_id = Some(e.doctor_id);
                self.receptionist_id = e.receptionist_id;
                self.reason = e.reason.clone();
                self.billed_amount = e.billed_amount;
                self.scheduled_at = Some(e.scheduled_at);
                self.status = AppointmentStatus::Pending;
                self.created = true;
            }
            AppointmentEvent::StatusChanged(e) => {
                self.status = e.new_status;
                if let Some(consultation) = &e.consultation {
                    self.consultation = Some(consultation.clone());
                }
            }
            AppointmentEvent::InvoiceLinked(e) => {
                self.invoice_id = Some(e.invoice_id);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            AppointmentCommand::CreateAppointment(cmd) => self.handle_create(cmd),
            AppointmentCommand::ChangeStatus(cmd) => self.handle_change_status(cmd),
            AppointmentCommand::LinkInvoice(cmd) => self.handle_link_invoice(cmd),
        }
    }
}

impl Appointment {
    fn ensure_clinic(&self, clinic_id: ClinicId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.clinic_id != Some(clinic_id) {
            return Err(DomainError::invariant("clinic mismatch"));
        }
        Ok(())
    }

    fn ensure_appointment_id(&self, appointment_id: AppointmentId) -> Result<(), DomainError> {
        if self.id != appointment_id {
            return Err(DomainError::invariant("appointment_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateAppointment) -> Result<Vec<AppointmentEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("appointment already exists"));
        }

        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("visit reason must not be empty"));
        }

        if cmd.billed_amount == 0 {
            return Err(DomainError::validation("billed_amount must be positive"));
        }

        Ok(vec![AppointmentEvent::AppointmentCreated(AppointmentCreated {
            clinic_id: cmd.clinic_id,
            appointment_id: cmd.appointment_id,
            patient_id: cmd.patient_id,
            doctor_id: cmd.doctor_id,
            receptionist_id: cmd.receptionist_id,
            reason: cmd.reason.clone(),
            billed_amount: cmd.billed_amount,
            scheduled_at: cmd.scheduled_at,
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_status(&self, cmd: &ChangeStatus) -> Result<Vec<AppointmentEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_clinic(cmd.clinic_id)?;
        self.ensure_appointment_id(cmd.appointment_id)?;

        // The only transition guard at this layer: a completed visit is
        // absorbing. Any other status may move to any other status,
        // including skipping states. Cancelled visits may be rescheduled;
        // whether cancellation should be terminal is an open business rule
        // and the test suite pins the current choice.
        if self.status == AppointmentStatus::Completed {
            return Err(DomainError::conflict("appointment is already completed"));
        }

        let consultation = match cmd.new_status {
            AppointmentStatus::Completed => match &cmd.consultation {
                Some(c) if !c.examination.trim().is_empty() => Some(c.clone()),
                _ => {
                    return Err(DomainError::validation(
                        "completing a visit requires an examination record",
                    ));
                }
            },
            // Consultation notes are only captured on completion.
            _ => None,
        };

        Ok(vec![AppointmentEvent::StatusChanged(StatusChanged {
            clinic_id: cmd.clinic_id,
            appointment_id: cmd.appointment_id,
            new_status: cmd.new_status,
            consultation,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_link_invoice(&self, cmd: &LinkInvoice) -> Result<Vec<AppointmentEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_clinic(cmd.clinic_id)?;
        self.ensure_appointment_id(cmd.appointment_id)?;

        if self.invoice_id.is_some() {
            return Err(DomainError::conflict("appointment already has an invoice"));
        }

        Ok(vec![AppointmentEvent::InvoiceLinked(InvoiceLinked {
            clinic_id: cmd.clinic_id,
            appointment_id: cmd.appointment_id,
            invoice_id: cmd.invoice_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
