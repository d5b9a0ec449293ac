//! End-to-end tests across services: visit lifecycle, invoicing, and
//! payment reconciliation against in-memory infrastructure.

use std::sync::Arc;

use chrono::{Duration, Utc};

use clinicops_auth::Caller;
use clinicops_billing::{InvoiceId, InvoiceStatus};
use clinicops_core::{AggregateId, ClinicId, UserId};
use clinicops_directory::{
    Account, AccountDirectory, Clinic, ContactInfo, Doctor, DoctorId, DirectoryProvider,
    InMemoryDirectory, Patient, PatientId,
};
use clinicops_events::InMemoryEventBus;
use clinicops_payments::{PaymentMethod, PaymentStatus, SettlementGateway, SimulatedGateway};
use clinicops_scheduling::{AppointmentId, AppointmentStatus, Consultation};

use crate::command_dispatcher::CommandDispatcher;
use crate::event_store::{EventStore, InMemoryEventStore};
use crate::invoice_numbers::InvoiceNumbers;
use crate::projections::ReadModels;
use crate::services::{
    AppointmentService, InvoiceService, NewAppointment, NewInvoice, NewPayment, PaymentService,
    PaymentUpdate, ServiceError,
};

struct TestApp {
    clinic_id: ClinicId,
    receptionist: Caller,
    doctor: Caller,
    patient: Caller,
    patient_id: PatientId,
    doctor_id: DoctorId,
    appointments: AppointmentService,
    invoices: InvoiceService,
    payments: PaymentService,
}

fn app_with_gateway(gateway: Arc<dyn SettlementGateway>) -> TestApp {
    let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
    let bus = Arc::new(InMemoryEventBus::new());
    let dispatcher = Arc::new(CommandDispatcher::new(store, bus));
    let read_models = Arc::new(ReadModels::in_memory());
    let numbers = Arc::new(InvoiceNumbers::new());

    let clinic_id = ClinicId::new();
    let directory = Arc::new(InMemoryDirectory::new());
    directory
        .register_clinic(Clinic {
            id: clinic_id,
            name: format!("Clinic {clinic_id}"),
            standard_visit_fee: 7_500,
            contact: ContactInfo::default(),
        })
        .unwrap();

    let patient_id = PatientId::new(AggregateId::new());
    directory.register_patient(Patient {
        id: patient_id,
        clinic_id,
        name: "Ada".to_string(),
        contact: ContactInfo::default(),
    });

    let doctor_id = DoctorId::new(AggregateId::new());
    directory.register_doctor(Doctor {
        id: doctor_id,
        clinic_id,
        name: "Dr. Okafor".to_string(),
        specialty: None,
        contact: ContactInfo::default(),
    });

    let accounts = Arc::new(AccountDirectory::in_memory());
    let receptionist = Caller::receptionist(UserId::new());
    let doctor = Caller::doctor(UserId::new());
    let patient = Caller::patient(UserId::new());
    for caller in [&receptionist, &doctor, &patient] {
        accounts.access(caller.role).unwrap().save(Account {
            user_id: caller.user_id,
            role: caller.role,
            display_name: caller.role.as_str().to_string(),
            deleted: false,
        });
    }

    TestApp {
        clinic_id,
        receptionist,
        doctor,
        patient,
        patient_id,
        doctor_id,
        appointments: AppointmentService::new(
            Arc::clone(&dispatcher),
            Arc::clone(&directory) as Arc<dyn DirectoryProvider>,
            Arc::clone(&accounts),
            Arc::clone(&read_models),
        ),
        invoices: InvoiceService::new(
            Arc::clone(&dispatcher),
            directory,
            numbers,
            Arc::clone(&accounts),
            Arc::clone(&read_models),
        ),
        payments: PaymentService::new(dispatcher, gateway, accounts, read_models),
    }
}

fn app() -> TestApp {
    app_with_gateway(Arc::new(SimulatedGateway::always_settles()))
}

fn consultation() -> Consultation {
    Consultation {
        examination: "unremarkable".to_string(),
        diagnosis: None,
        treatment: None,
    }
}

fn completed_visit(app: &TestApp, billed_amount: u64) -> AppointmentId {
    let appointment_id = app
        .appointments
        .create_appointment(
            &app.receptionist,
            app.clinic_id,
            NewAppointment {
                patient_id: app.patient_id,
                doctor_id: app.doctor_id,
                reason: "checkup".to_string(),
                scheduled_at: Utc::now(),
                billed_amount: Some(billed_amount),
            },
        )
        .unwrap();
    app.appointments
        .change_status(
            &app.doctor,
            app.clinic_id,
            appointment_id,
            AppointmentStatus::Completed,
            Some(consultation()),
        )
        .unwrap();
    appointment_id
}

fn invoice_for(app: &TestApp, billed_amount: u64) -> InvoiceId {
    let appointment_id = completed_visit(app, billed_amount);
    app.invoices
        .create_for_appointment(
            &app.receptionist,
            app.clinic_id,
            appointment_id,
            NewInvoice::default(),
        )
        .unwrap()
}

fn pay(app: &TestApp, invoice_id: InvoiceId, amount: u64) -> clinicops_payments::PaymentId {
    app.payments
        .create_payment(
            &app.receptionist,
            app.clinic_id,
            NewPayment {
                invoice_id,
                amount,
                method: PaymentMethod::CreditCard,
                reference: None,
                notes: None,
            },
        )
        .unwrap()
}

#[tokio::test]
async fn full_reconciliation_scenario() {
    // 100 total: pay 60, pay 40, refund 40, refund 60.
    let app = app();
    let invoice_id = invoice_for(&app, 100);

    let p60 = pay(&app, invoice_id, 60);
    let status = app
        .payments
        .process_payment(&app.receptionist, app.clinic_id, p60)
        .await
        .unwrap();
    assert_eq!(status, PaymentStatus::Completed);

    let invoice = app.invoices.invoice(app.clinic_id, invoice_id).unwrap();
    assert_eq!(invoice.paid_amount, 60);
    assert_eq!(invoice.status, InvoiceStatus::PartiallyPaid);

    let p40 = pay(&app, invoice_id, 40);
    app.payments
        .process_payment(&app.receptionist, app.clinic_id, p40)
        .await
        .unwrap();

    let invoice = app.invoices.invoice(app.clinic_id, invoice_id).unwrap();
    assert_eq!(invoice.paid_amount, 100);
    assert_eq!(invoice.status, InvoiceStatus::Paid);

    app.payments
        .refund_payment(&app.receptionist, app.clinic_id, p40)
        .unwrap();
    let invoice = app.invoices.invoice(app.clinic_id, invoice_id).unwrap();
    assert_eq!(invoice.paid_amount, 60);
    assert_eq!(invoice.status, InvoiceStatus::PartiallyPaid);

    app.payments
        .refund_payment(&app.receptionist, app.clinic_id, p60)
        .unwrap();
    let invoice = app.invoices.invoice(app.clinic_id, invoice_id).unwrap();
    assert_eq!(invoice.paid_amount, 0);
    assert_eq!(invoice.status, InvoiceStatus::Issued);
}

#[tokio::test]
async fn payment_above_remaining_balance_is_rejected() {
    let app = app();
    let invoice_id = invoice_for(&app, 100);

    let p60 = pay(&app, invoice_id, 60);
    app.payments
        .process_payment(&app.receptionist, app.clinic_id, p60)
        .await
        .unwrap();

    // Remaining is 40; one cent more is a bad request.
    let err = app
        .payments
        .create_payment(
            &app.receptionist,
            app.clinic_id,
            NewPayment {
                invoice_id,
                amount: 41,
                method: PaymentMethod::Cash,
                reference: None,
                notes: None,
            },
        )
        .unwrap_err();
    assert!(matches!(err, ServiceError::BadRequest(_)));

    // Exactly the remaining balance is fine.
    let p40 = pay(&app, invoice_id, 40);
    let status = app
        .payments
        .process_payment(&app.receptionist, app.clinic_id, p40)
        .await
        .unwrap();
    assert_eq!(status, PaymentStatus::Completed);
}

#[tokio::test]
async fn processing_a_non_pending_payment_leaves_invoice_untouched() {
    let app = app();
    let invoice_id = invoice_for(&app, 100);

    let payment_id = pay(&app, invoice_id, 60);
    app.payments
        .process_payment(&app.receptionist, app.clinic_id, payment_id)
        .await
        .unwrap();

    let err = app
        .payments
        .process_payment(&app.receptionist, app.clinic_id, payment_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::BadRequest(_)));

    let invoice = app.invoices.invoice(app.clinic_id, invoice_id).unwrap();
    assert_eq!(invoice.paid_amount, 60);
}

#[tokio::test]
async fn declined_settlement_fails_payment_without_touching_invoice() {
    let app = app_with_gateway(Arc::new(SimulatedGateway::always_declines()));
    let invoice_id = invoice_for(&app, 100);

    let payment_id = pay(&app, invoice_id, 60);
    let status = app
        .payments
        .process_payment(&app.receptionist, app.clinic_id, payment_id)
        .await
        .unwrap();
    assert_eq!(status, PaymentStatus::Failed);

    let record = app.payments.payment(app.clinic_id, payment_id).unwrap();
    assert!(record.notes.unwrap().contains("declined"));

    let invoice = app.invoices.invoice(app.clinic_id, invoice_id).unwrap();
    assert_eq!(invoice.paid_amount, 0);
    assert_eq!(invoice.status, InvoiceStatus::Issued);
}

#[tokio::test]
async fn completing_a_payment_mid_settlement_cannot_double_credit() {
    // A settlement run claims the payment (PENDING -> PROCESSING) before
    // contacting the gateway. A COMPLETED update racing that run must lose
    // the claim and the invoice must be credited exactly once.
    let app = app_with_gateway(Arc::new(SimulatedGateway::new(
        1.0,
        std::time::Duration::from_millis(50),
    )));
    let invoice_id = invoice_for(&app, 100);
    let payment_id = pay(&app, invoice_id, 60);

    let (processed, updated) = tokio::join!(
        app.payments
            .process_payment(&app.receptionist, app.clinic_id, payment_id),
        app.payments.update_payment(
            &app.receptionist,
            app.clinic_id,
            payment_id,
            PaymentUpdate {
                status: Some(PaymentStatus::Completed),
                ..PaymentUpdate::default()
            },
        ),
    );

    assert_eq!(processed.unwrap(), PaymentStatus::Completed);
    assert!(matches!(updated.unwrap_err(), ServiceError::Conflict(_)));

    let invoice = app.invoices.invoice(app.clinic_id, invoice_id).unwrap();
    assert_eq!(invoice.paid_amount, 60);
    assert_eq!(invoice.status, InvoiceStatus::PartiallyPaid);
}

#[tokio::test]
async fn racing_settlements_complete_at_most_one() {
    // Both payments cover the full remaining balance; only one may settle.
    let app = app();
    let invoice_id = invoice_for(&app, 100);

    let first = pay(&app, invoice_id, 100);
    let second = pay(&app, invoice_id, 100);

    let (a, b) = tokio::join!(
        app.payments
            .process_payment(&app.receptionist, app.clinic_id, first),
        app.payments
            .process_payment(&app.receptionist, app.clinic_id, second),
    );
    let outcomes = [a.unwrap(), b.unwrap()];

    let completed = outcomes
        .iter()
        .filter(|s| **s == PaymentStatus::Completed)
        .count();
    let failed = outcomes
        .iter()
        .filter(|s| **s == PaymentStatus::Failed)
        .count();
    assert_eq!(completed, 1);
    assert_eq!(failed, 1);

    let invoice = app.invoices.invoice(app.clinic_id, invoice_id).unwrap();
    assert_eq!(invoice.paid_amount, 100);
    assert_eq!(invoice.status, InvoiceStatus::Paid);
}

#[test]
fn invoice_numbers_are_unique_and_dated() {
    let app = app();
    let prefix = format!("INV-{}-", Utc::now().format("%Y%m%d"));

    let mut numbers = std::collections::HashSet::new();
    for _ in 0..3 {
        let invoice_id = invoice_for(&app, 100);
        let record = app.invoices.invoice(app.clinic_id, invoice_id).unwrap();
        assert!(record.invoice_number.starts_with(&prefix));
        assert!(numbers.insert(record.invoice_number));
    }
}

#[test]
fn second_invoice_for_a_visit_conflicts_and_leaves_no_orphan() {
    let app = app();
    let appointment_id = completed_visit(&app, 100);

    app.invoices
        .create_for_appointment(
            &app.receptionist,
            app.clinic_id,
            appointment_id,
            NewInvoice::default(),
        )
        .unwrap();

    let err = app
        .invoices
        .create_for_appointment(
            &app.receptionist,
            app.clinic_id,
            appointment_id,
            NewInvoice::default(),
        )
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));
    assert_eq!(app.invoices.invoices(app.clinic_id).len(), 1);
}

#[tokio::test]
async fn standalone_invoice_settles_like_any_other() {
    let app = app();

    let invoice_id = app
        .invoices
        .create_invoice(
            &app.receptionist,
            app.clinic_id,
            app.patient_id,
            2_500,
            NewInvoice::default(),
        )
        .unwrap();
    let record = app.invoices.invoice(app.clinic_id, invoice_id).unwrap();
    assert_eq!(record.appointment_id, None);
    assert_eq!(record.status, InvoiceStatus::Issued);

    let payment_id = pay(&app, invoice_id, 2_500);
    app.payments
        .process_payment(&app.receptionist, app.clinic_id, payment_id)
        .await
        .unwrap();
    let record = app.invoices.invoice(app.clinic_id, invoice_id).unwrap();
    assert_eq!(record.status, InvoiceStatus::Paid);
}

#[test]
fn standalone_invoice_requires_a_known_patient() {
    let app = app();
    let stranger = PatientId::new(AggregateId::new());

    let err = app
        .invoices
        .create_invoice(
            &app.receptionist,
            app.clinic_id,
            stranger,
            2_500,
            NewInvoice::default(),
        )
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[test]
fn invoice_requires_a_completed_visit() {
    let app = app();
    let appointment_id = app
        .appointments
        .create_appointment(
            &app.receptionist,
            app.clinic_id,
            NewAppointment {
                patient_id: app.patient_id,
                doctor_id: app.doctor_id,
                reason: "checkup".to_string(),
                scheduled_at: Utc::now(),
                billed_amount: Some(100),
            },
        )
        .unwrap();

    let err = app
        .invoices
        .create_for_appointment(
            &app.receptionist,
            app.clinic_id,
            appointment_id,
            NewInvoice::default(),
        )
        .unwrap_err();
    assert!(matches!(err, ServiceError::BadRequest(_)));
}

#[tokio::test]
async fn overdue_report_excludes_partially_paid() {
    let app = app();
    let now = Utc::now();
    let past_due = Some(now - Duration::days(3));

    let unpaid_appointment = completed_visit(&app, 100);
    let unpaid = app
        .invoices
        .create_for_appointment(
            &app.receptionist,
            app.clinic_id,
            unpaid_appointment,
            NewInvoice {
                due_date: past_due,
                ..NewInvoice::default()
            },
        )
        .unwrap();

    let partial_appointment = completed_visit(&app, 100);
    let partial = app
        .invoices
        .create_for_appointment(
            &app.receptionist,
            app.clinic_id,
            partial_appointment,
            NewInvoice {
                due_date: past_due,
                ..NewInvoice::default()
            },
        )
        .unwrap();

    let payment_id = pay(&app, partial, 30);
    app.payments
        .process_payment(&app.receptionist, app.clinic_id, payment_id)
        .await
        .unwrap();

    let overdue = app.invoices.overdue_invoices(app.clinic_id, now);
    assert_eq!(overdue.len(), 1);
    assert_eq!(overdue[0].invoice_id, unpaid);
}

#[test]
fn refund_requires_a_completed_payment() {
    let app = app();
    let invoice_id = invoice_for(&app, 100);
    let payment_id = pay(&app, invoice_id, 60);

    let err = app
        .payments
        .refund_payment(&app.receptionist, app.clinic_id, payment_id)
        .unwrap_err();
    assert!(matches!(err, ServiceError::BadRequest(_)));
}

#[tokio::test]
async fn update_routes_status_targets_through_the_authoritative_paths() {
    let app = app();
    let invoice_id = invoice_for(&app, 100);
    let payment_id = pay(&app, invoice_id, 60);

    // COMPLETED via update settles the invoice, same as processing.
    let status = app
        .payments
        .update_payment(
            &app.receptionist,
            app.clinic_id,
            payment_id,
            PaymentUpdate {
                status: Some(PaymentStatus::Completed),
                ..PaymentUpdate::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(status, PaymentStatus::Completed);
    let invoice = app.invoices.invoice(app.clinic_id, invoice_id).unwrap();
    assert_eq!(invoice.paid_amount, 60);

    // A repeated COMPLETED update must not credit the invoice again.
    let err = app
        .payments
        .update_payment(
            &app.receptionist,
            app.clinic_id,
            payment_id,
            PaymentUpdate {
                status: Some(PaymentStatus::Completed),
                ..PaymentUpdate::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));
    let invoice = app.invoices.invoice(app.clinic_id, invoice_id).unwrap();
    assert_eq!(invoice.paid_amount, 60);

    // REFUNDED via update releases the balance, same as a refund.
    let status = app
        .payments
        .update_payment(
            &app.receptionist,
            app.clinic_id,
            payment_id,
            PaymentUpdate {
                status: Some(PaymentStatus::Refunded),
                ..PaymentUpdate::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(status, PaymentStatus::Refunded);
    let invoice = app.invoices.invoice(app.clinic_id, invoice_id).unwrap();
    assert_eq!(invoice.paid_amount, 0);

    // Resetting to PENDING is not a thing.
    let err = app
        .payments
        .update_payment(
            &app.receptionist,
            app.clinic_id,
            payment_id,
            PaymentUpdate {
                status: Some(PaymentStatus::Pending),
                ..PaymentUpdate::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::BadRequest(_)));
}

#[test]
fn invoice_with_payment_records_cannot_be_removed() {
    let app = app();
    let invoice_id = invoice_for(&app, 100);
    let payment_id = pay(&app, invoice_id, 60);

    let err = app
        .invoices
        .remove_invoice(&app.receptionist, app.clinic_id, invoice_id)
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));

    // Clearing the payment trail unblocks removal.
    app.payments
        .remove_payment(&app.receptionist, app.clinic_id, payment_id)
        .unwrap();
    app.invoices
        .remove_invoice(&app.receptionist, app.clinic_id, invoice_id)
        .unwrap();
    assert!(app.invoices.invoice(app.clinic_id, invoice_id).is_none());
}

#[tokio::test]
async fn role_gating_matches_the_policy_table() {
    let app = app();
    let invoice_id = invoice_for(&app, 100);
    let payment_id = pay(&app, invoice_id, 60);

    // Patients may book visits and record payments, nothing else.
    let err = app
        .payments
        .process_payment(&app.patient, app.clinic_id, payment_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Unauthorized(_)));

    let err = app
        .payments
        .refund_payment(&app.patient, app.clinic_id, payment_id)
        .unwrap_err();
    assert!(matches!(err, ServiceError::Unauthorized(_)));

    // Doctors run visits, not billing.
    let appointment_id = completed_visit(&app, 100);
    let err = app
        .invoices
        .create_for_appointment(&app.doctor, app.clinic_id, appointment_id, NewInvoice::default())
        .unwrap_err();
    assert!(matches!(err, ServiceError::Unauthorized(_)));

    // Patients may book their own visits.
    app.appointments
        .create_appointment(
            &app.patient,
            app.clinic_id,
            NewAppointment {
                patient_id: app.patient_id,
                doctor_id: app.doctor_id,
                reason: "follow-up".to_string(),
                scheduled_at: Utc::now(),
                billed_amount: None,
            },
        )
        .unwrap();
}

#[test]
fn unknown_caller_account_is_unauthorized() {
    let app = app();
    let stranger = Caller::receptionist(UserId::new());

    let err = app
        .appointments
        .create_appointment(
            &stranger,
            app.clinic_id,
            NewAppointment {
                patient_id: app.patient_id,
                doctor_id: app.doctor_id,
                reason: "checkup".to_string(),
                scheduled_at: Utc::now(),
                billed_amount: None,
            },
        )
        .unwrap_err();
    assert!(matches!(err, ServiceError::Unauthorized(_)));
}

#[test]
fn appointment_read_model_tracks_the_invoice_link() {
    let app = app();
    let appointment_id = completed_visit(&app, 100);
    let invoice_id = app
        .invoices
        .create_for_appointment(
            &app.receptionist,
            app.clinic_id,
            appointment_id,
            NewInvoice::default(),
        )
        .unwrap();

    let record = app
        .appointments
        .appointment(app.clinic_id, appointment_id)
        .unwrap();
    assert_eq!(record.status, AppointmentStatus::Completed);
    assert_eq!(record.invoice_id, Some(invoice_id.0));
    assert!(record.consultation.is_some());
}
