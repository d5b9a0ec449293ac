//! Invoice management service.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use clinicops_auth::{Action, Caller, authorize};
use clinicops_billing::{Invoice, InvoiceCommand, InvoiceId, IssueInvoice, RemoveInvoice};
use clinicops_core::{AggregateId, ClinicId};
use clinicops_directory::{AccountDirectory, DirectoryProvider, PatientId};
use clinicops_scheduling::{
    Appointment, AppointmentCommand, AppointmentId, AppointmentStatus, LinkInvoice,
};

use crate::invoice_numbers::InvoiceNumbers;
use crate::projections::{
    APPOINTMENT_AGGREGATE_TYPE, INVOICE_AGGREGATE_TYPE, InvoiceRecord, ReadModels,
};

use super::{Dispatcher, ServiceError, project, resolve_caller};

/// Input for deriving an invoice from a completed visit.
#[derive(Debug, Clone, Default)]
pub struct NewInvoice {
    pub tax_amount: u64,
    pub discount_amount: u64,
    pub due_date: Option<DateTime<Utc>>,
}

pub struct InvoiceService {
    dispatcher: Arc<Dispatcher>,
    directory: Arc<dyn DirectoryProvider>,
    numbers: Arc<InvoiceNumbers>,
    accounts: Arc<AccountDirectory>,
    read_models: Arc<ReadModels>,
}

impl InvoiceService {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        directory: Arc<dyn DirectoryProvider>,
        numbers: Arc<InvoiceNumbers>,
        accounts: Arc<AccountDirectory>,
        read_models: Arc<ReadModels>,
    ) -> Self {
        Self {
            dispatcher,
            directory,
            numbers,
            accounts,
            read_models,
        }
    }

    /// Issue a standalone invoice, unattached to any visit.
    pub fn create_invoice(
        &self,
        caller: &Caller,
        clinic_id: ClinicId,
        patient_id: PatientId,
        total_amount: u64,
        input: NewInvoice,
    ) -> Result<InvoiceId, ServiceError> {
        authorize(caller, Action::ManageInvoices)?;
        resolve_caller(&self.accounts, caller)?;

        self.directory
            .clinic(clinic_id)
            .ok_or_else(|| ServiceError::NotFound("clinic not found".to_string()))?;
        self.directory
            .patient(clinic_id, patient_id)
            .ok_or_else(|| ServiceError::NotFound("patient not found".to_string()))?;

        let invoice_id = InvoiceId::new(AggregateId::new());
        let now = Utc::now();
        let invoice_number = self.numbers.next(clinic_id, now.date_naive());

        let committed = self.dispatcher.dispatch::<Invoice>(
            clinic_id,
            invoice_id.0,
            INVOICE_AGGREGATE_TYPE,
            InvoiceCommand::IssueInvoice(IssueInvoice {
                clinic_id,
                invoice_id,
                patient_id,
                invoice_number: invoice_number.clone(),
                total_amount,
                tax_amount: input.tax_amount,
                discount_amount: input.discount_amount,
                due_date: input.due_date,
                appointment_id: None,
                occurred_at: now,
            }),
            |_, id| Invoice::empty(InvoiceId::new(id)),
        )?;
        project(&self.read_models, &committed)?;

        info!(
            invoice_id = %invoice_id,
            invoice_number = %invoice_number,
            total_amount,
            "invoice issued"
        );
        Ok(invoice_id)
    }

    /// Derive an invoice from a completed visit.
    ///
    /// The appointment's invoice link is written first. Linking is the
    /// uniqueness guard (one invoice per visit), so a duplicate attempt
    /// fails there and never leaves an orphaned invoice behind.
    pub fn create_for_appointment(
        &self,
        caller: &Caller,
        clinic_id: ClinicId,
        appointment_id: AppointmentId,
        input: NewInvoice,
    ) -> Result<InvoiceId, ServiceError> {
        authorize(caller, Action::ManageInvoices)?;
        resolve_caller(&self.accounts, caller)?;

        let appointment = self
            .dispatcher
            .rehydrate(clinic_id, appointment_id.0, |_, id| {
                Appointment::empty(AppointmentId::new(id))
            })?;
        if !appointment.exists() {
            return Err(ServiceError::NotFound("appointment not found".to_string()));
        }
        if appointment.status() != AppointmentStatus::Completed {
            return Err(ServiceError::BadRequest(
                "an invoice can only be created for a completed visit".to_string(),
            ));
        }
        let patient_id = appointment
            .patient_id()
            .ok_or_else(|| ServiceError::Internal("appointment has no patient".to_string()))?;

        let invoice_id = InvoiceId::new(AggregateId::new());
        let now = Utc::now();

        let linked = self.dispatcher.dispatch::<Appointment>(
            clinic_id,
            appointment_id.0,
            APPOINTMENT_AGGREGATE_TYPE,
            AppointmentCommand::LinkInvoice(LinkInvoice {
                clinic_id,
                appointment_id,
                invoice_id: invoice_id.0,
                occurred_at: now,
            }),
            |_, id| Appointment::empty(AppointmentId::new(id)),
        )?;
        project(&self.read_models, &linked)?;

        let invoice_number = self.numbers.next(clinic_id, now.date_naive());

        let committed = self.dispatcher.dispatch::<Invoice>(
            clinic_id,
            invoice_id.0,
            INVOICE_AGGREGATE_TYPE,
            InvoiceCommand::IssueInvoice(IssueInvoice {
                clinic_id,
                invoice_id,
                patient_id,
                invoice_number: invoice_number.clone(),
                total_amount: appointment.billed_amount(),
                tax_amount: input.tax_amount,
                discount_amount: input.discount_amount,
                due_date: input.due_date,
                appointment_id: Some(appointment_id),
                occurred_at: now,
            }),
            |_, id| Invoice::empty(InvoiceId::new(id)),
        )?;
        project(&self.read_models, &committed)?;

        info!(
            invoice_id = %invoice_id,
            appointment_id = %appointment_id,
            invoice_number = %invoice_number,
            total_amount = appointment.billed_amount(),
            "invoice issued"
        );
        Ok(invoice_id)
    }

    /// Remove an invoice from circulation.
    ///
    /// Rejected while any payment record still references it; the payment
    /// trail has to be dealt with first. The aggregate additionally rejects
    /// removal while a paid balance is applied.
    pub fn remove_invoice(
        &self,
        caller: &Caller,
        clinic_id: ClinicId,
        invoice_id: InvoiceId,
    ) -> Result<(), ServiceError> {
        authorize(caller, Action::ManageInvoices)?;
        resolve_caller(&self.accounts, caller)?;

        if !self
            .read_models
            .payments
            .list_for_invoice(clinic_id, invoice_id)
            .is_empty()
        {
            return Err(ServiceError::Conflict(
                "invoice has payment records and cannot be removed".to_string(),
            ));
        }

        let committed = self.dispatcher.dispatch::<Invoice>(
            clinic_id,
            invoice_id.0,
            INVOICE_AGGREGATE_TYPE,
            InvoiceCommand::RemoveInvoice(RemoveInvoice {
                clinic_id,
                invoice_id,
                occurred_at: Utc::now(),
            }),
            |_, id| Invoice::empty(InvoiceId::new(id)),
        )?;
        project(&self.read_models, &committed)?;

        info!(invoice_id = %invoice_id, "invoice removed");
        Ok(())
    }

    pub fn invoice(&self, clinic_id: ClinicId, invoice_id: InvoiceId) -> Option<InvoiceRecord> {
        self.read_models.invoices.get(clinic_id, &invoice_id)
    }

    pub fn invoices(&self, clinic_id: ClinicId) -> Vec<InvoiceRecord> {
        self.read_models.invoices.list(clinic_id)
    }

    /// Invoices past due and still fully unpaid (partially paid excluded).
    pub fn overdue_invoices(
        &self,
        clinic_id: ClinicId,
        now: DateTime<Utc>,
    ) -> Vec<InvoiceRecord> {
        self.read_models.invoices.list_overdue(clinic_id, now)
    }
}
