//! End-to-end wiring demo: schedule a visit, complete it, invoice it, and
//! settle the bill through the simulated gateway.
//!
//! ```text
//! RUST_LOG=info cargo run -p clinicops-infra --bin clinicops-demo
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use tracing::info;

use clinicops_auth::Caller;
use clinicops_core::{AggregateId, ClinicId, UserId};
use clinicops_directory::{
    Account, AccountDirectory, Clinic, ContactInfo, Doctor, DoctorId, DirectoryProvider,
    InMemoryDirectory, Patient, PatientId,
};
use clinicops_events::InMemoryEventBus;
use clinicops_infra::command_dispatcher::CommandDispatcher;
use clinicops_infra::event_store::{EventStore, InMemoryEventStore};
use clinicops_infra::invoice_numbers::InvoiceNumbers;
use clinicops_infra::projections::ReadModels;
use clinicops_infra::services::{
    AppointmentService, InvoiceService, NewAppointment, NewInvoice, NewPayment, PaymentService,
};
use clinicops_payments::{PaymentMethod, SimulatedGateway};
use clinicops_scheduling::{AppointmentStatus, Consultation};

#[tokio::main]
async fn main() -> Result<()> {
    clinicops_observability::init();

    // Infrastructure wiring.
    let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
    let bus = Arc::new(InMemoryEventBus::new());
    let dispatcher = Arc::new(CommandDispatcher::new(store, bus));
    let read_models = Arc::new(ReadModels::in_memory());
    let numbers = Arc::new(InvoiceNumbers::new());

    // Directory records.
    let clinic_id = ClinicId::new();
    let directory = Arc::new(InMemoryDirectory::new());
    directory
        .register_clinic(Clinic {
            id: clinic_id,
            name: "North Side Family Care".to_string(),
            standard_visit_fee: 7_500,
            contact: ContactInfo::default(),
        })
        .context("registering clinic")?;

    let patient_id = PatientId::new(AggregateId::new());
    directory.register_patient(Patient {
        id: patient_id,
        clinic_id,
        name: "Ada Bennett".to_string(),
        contact: ContactInfo::default(),
    });

    let doctor_id = DoctorId::new(AggregateId::new());
    directory.register_doctor(Doctor {
        id: doctor_id,
        clinic_id,
        name: "Dr. Okafor".to_string(),
        specialty: Some("family medicine".to_string()),
        contact: ContactInfo::default(),
    });

    // Caller accounts.
    let accounts = Arc::new(AccountDirectory::in_memory());
    let receptionist = Caller::receptionist(UserId::new());
    accounts
        .access(receptionist.role)
        .context("missing role store")?
        .save(Account {
            user_id: receptionist.user_id,
            role: receptionist.role,
            display_name: "Front Desk".to_string(),
            deleted: false,
        });

    // Services.
    let appointments = AppointmentService::new(
        Arc::clone(&dispatcher),
        Arc::clone(&directory) as Arc<dyn DirectoryProvider>,
        Arc::clone(&accounts),
        Arc::clone(&read_models),
    );
    let invoices = InvoiceService::new(
        Arc::clone(&dispatcher),
        directory,
        numbers,
        Arc::clone(&accounts),
        Arc::clone(&read_models),
    );
    let payments = PaymentService::new(
        dispatcher,
        Arc::new(SimulatedGateway::default()),
        accounts,
        Arc::clone(&read_models),
    );

    // Walk the lifecycle.
    let appointment_id = appointments.create_appointment(
        &receptionist,
        clinic_id,
        NewAppointment {
            patient_id,
            doctor_id,
            reason: "annual checkup".to_string(),
            scheduled_at: Utc::now() + Duration::hours(2),
            billed_amount: None,
        },
    )?;
    appointments.change_status(
        &receptionist,
        clinic_id,
        appointment_id,
        AppointmentStatus::Completed,
        Some(Consultation {
            examination: "BP 120/80, no abnormalities".to_string(),
            diagnosis: Some("healthy".to_string()),
            treatment: None,
        }),
    )?;

    let invoice_id = invoices.create_for_appointment(
        &receptionist,
        clinic_id,
        appointment_id,
        NewInvoice {
            due_date: Some(Utc::now() + Duration::days(30)),
            ..NewInvoice::default()
        },
    )?;

    let payment_id = payments.create_payment(
        &receptionist,
        clinic_id,
        NewPayment {
            invoice_id,
            amount: 7_500,
            method: PaymentMethod::CreditCard,
            reference: None,
            notes: None,
        },
    )?;
    let status = payments
        .process_payment(&receptionist, clinic_id, payment_id)
        .await?;

    let invoice = invoices
        .invoice(clinic_id, invoice_id)
        .context("invoice missing from read model")?;
    info!(
        payment_status = ?status,
        invoice_status = ?invoice.status,
        paid_amount = invoice.paid_amount,
        remaining = invoice.remaining_amount(),
        "demo complete"
    );

    Ok(())
}
