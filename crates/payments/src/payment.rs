use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use clinicops_billing::InvoiceId;
use clinicops_core::{Aggregate, AggregateId, AggregateRoot, ClinicId, DomainError};
use clinicops_events::Event;

/// Payment identifier (clinic-scoped via `clinic_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentId(pub AggregateId);

impl PaymentId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PaymentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Payment settlement lifecycle.
///
/// Serialized names are the persisted wire contract and must round-trip
/// exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Refunded,
}

/// How the patient paid. Wire names are lowercase snake_case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    CreditCard,
    DebitCard,
    BankTransfer,
    Check,
}

/// Aggregate root: Payment.
///
/// A payment records one attempt to settle part of an invoice's outstanding
/// balance. The aggregate owns the settlement lifecycle only; the matching
/// invoice balance mutation lives in the billing aggregate and is sequenced
/// by the reconciliation service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    id: PaymentId,
    clinic_id: Option<ClinicId>,
    invoice_id: Option<InvoiceId>,
    /// Amount in the smallest currency unit.
    amount: u64,
    method: Option<PaymentMethod>,
    transaction_id: String,
    reference: Option<String>,
    notes: Option<String>,
    status: PaymentStatus,
    completed_at: Option<DateTime<Utc>>,
    refunded_at: Option<DateTime<Utc>>,
    removed: bool,
    version: u64,
    created: bool,
}

impl Payment {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: PaymentId) -> Self {
        Self {
            id,
            clinic_id: None,
            invoice_id: None,
            amount: 0,
            method: None,
            transaction_id: String::new(),
            reference: None,
            notes: None,
            status: PaymentStatus::Pending,
            completed_at: None,
            refunded_at: None,
            removed: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PaymentId {
        self.id
    }

    pub fn clinic_id(&self) -> Option<ClinicId> {
        self.clinic_id
    }

    pub fn invoice_id(&self) -> Option<InvoiceId> {
        self.invoice_id
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn method(&self) -> Option<PaymentMethod> {
        self.method
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn refunded_at(&self) -> Option<DateTime<Utc>> {
        self.refunded_at
    }

    pub fn exists(&self) -> bool {
        self.created && !self.removed
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }
}

impl AggregateRoot for Payment {
    type Id = PaymentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreatePayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePayment {
    pub clinic_id: ClinicId,
    pub payment_id: PaymentId,
    pub invoice_id: InvoiceId,
    pub amount: u64,
    pub method: PaymentMethod,
    pub transaction_id: String,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: BeginProcessing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeginProcessing {
    pub clinic_id: ClinicId,
    pub payment_id: PaymentId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CompletePayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletePayment {
    pub clinic_id: ClinicId,
    pub payment_id: PaymentId,
    pub completed_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: FailPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailPayment {
    pub clinic_id: ClinicId,
    pub payment_id: PaymentId,
    /// Operator-visible explanation appended to the payment notes.
    pub note: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RefundPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundPayment {
    pub clinic_id: ClinicId,
    pub payment_id: PaymentId,
    pub refunded_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelPayment {
    pub clinic_id: ClinicId,
    pub payment_id: PaymentId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateNotes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateNotes {
    pub clinic_id: ClinicId,
    pub payment_id: PaymentId,
    pub notes: Option<String>,
    pub reference: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemovePayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovePayment {
    pub clinic_id: ClinicId,
    pub payment_id: PaymentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentCommand {
    CreatePayment(CreatePayment),
    BeginProcessing(BeginProcessing),
    CompletePayment(CompletePayment),
    FailPayment(FailPayment),
    RefundPayment(RefundPayment),
    CancelPayment(CancelPayment),
    UpdateNotes(UpdateNotes),
    RemovePayment(RemovePayment),
}

/// Event: PaymentCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCreated {
    pub clinic_id: ClinicId,
    pub payment_id: PaymentId,
    pub invoice_id: InvoiceId,
    pub amount: u64,
    pub method: PaymentMethod,
    pub transaction_id: String,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProcessingStarted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingStarted {
    pub clinic_id: ClinicId,
    pub payment_id: PaymentId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCompleted {
    pub clinic_id: ClinicId,
    pub payment_id: PaymentId,
    pub completed_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentFailed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFailed {
    pub clinic_id: ClinicId,
    pub payment_id: PaymentId,
    pub note: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentRefunded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRefunded {
    pub clinic_id: ClinicId,
    pub payment_id: PaymentId,
    pub refunded_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCancelled {
    pub clinic_id: ClinicId,
    pub payment_id: PaymentId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: NotesUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotesUpdated {
    pub clinic_id: ClinicId,
    pub payment_id: PaymentId,
    pub notes: Option<String>,
    pub reference: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRemoved {
    pub clinic_id: ClinicId,
    pub payment_id: PaymentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentEvent {
    PaymentCreated(PaymentCreated),
    ProcessingStarted(ProcessingStarted),
    PaymentCompleted(PaymentCompleted),
    PaymentFailed(PaymentFailed),
    PaymentRefunded(PaymentRefunded),
    PaymentCancelled(PaymentCancelled),
    NotesUpdated(NotesUpdated),
    PaymentRemoved(PaymentRemoved),
}

impl Event for PaymentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PaymentEvent::PaymentCreated(_) => "payments.payment.created",
            PaymentEvent::ProcessingStarted(_) => "payments.payment.processing_started",
            PaymentEvent::PaymentCompleted(_) => "payments.payment.completed",
            PaymentEvent::PaymentFailed(_) => "payments.payment.failed",
            PaymentEvent::PaymentRefunded(_) => "payments.payment.refunded",
            PaymentEvent::PaymentCancelled(_) => "payments.payment.cancelled",
            PaymentEvent::NotesUpdated(_) => "payments.payment.notes_updated",
            PaymentEvent::PaymentRemoved(_) => "payments.payment.removed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PaymentEvent::PaymentCreated(e) => e.occurred_at,
            PaymentEvent::ProcessingStarted(e) => e.occurred_at,
            PaymentEvent::PaymentCompleted(e) => e.occurred_at,
            PaymentEvent::PaymentFailed(e) => e.occurred_at,
            PaymentEvent::PaymentRefunded(e) => e.occurred_at,
            PaymentEvent::PaymentCancelled(e) => e.occurred_at,
            PaymentEvent::NotesUpdated(e) => e.occurred_at,
            PaymentEvent::PaymentRemoved(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Payment {
    type Command = PaymentCommand;
    type Event = PaymentEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PaymentEvent::PaymentCreated(e) => {
                self.id = e.payment_id;
                self.clinic_id = Some(e.clinic_id);
                self.invoice_id = Some(e.invoice_id);
                self.amount = e.amount;
                self.method = Some(e.method);
                self.transaction_id = e.transaction_id.clone();
                self.reference = e.reference.clone();
                self.notes = e.notes.clone();
                self.status = PaymentStatus::Pending;
                self.created = true;
            }
            PaymentEvent::ProcessingStarted(_) => {
                self.status = PaymentStatus::Processing;
            }
            PaymentEvent::PaymentCompleted(e) => {
                self.status = PaymentStatus::Completed;
                self.completed_at = Some(e.completed_at);
            }
            PaymentEvent::PaymentFailed(e) => {
                self.status = PaymentStatus::Failed;
                self.notes = Some(match self.notes.take() {
                    Some(existing) => format!("{existing}; {}", e.note),
                    None => e.note.clone(),
                });
            }
            PaymentEvent::PaymentRefunded(e) => {
                self.status = PaymentStatus::Refunded;
                self.refunded_at = Some(e.refunded_at);
            }
            PaymentEvent::PaymentCancelled(_) => {
                self.status = PaymentStatus::Cancelled;
            }
            PaymentEvent::NotesUpdated(e) => {
                if e.notes.is_some() {
                    self.notes = e.notes.clone();
                }
                if e.reference.is_some() {
                    self.reference = e.reference.clone();
                }
            }
            PaymentEvent::PaymentRemoved(_) => {
                self.removed = true;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PaymentCommand::CreatePayment(cmd) => self.handle_create(cmd),
            PaymentCommand::BeginProcessing(cmd) => self.handle_begin_processing(cmd),
            PaymentCommand::CompletePayment(cmd) => self.handle_complete(cmd),
            PaymentCommand::FailPayment(cmd) => self.handle_fail(cmd),
            PaymentCommand::RefundPayment(cmd) => self.handle_refund(cmd),
            PaymentCommand::CancelPayment(cmd) => self.handle_cancel(cmd),
            PaymentCommand::UpdateNotes(cmd) => self.handle_update_notes(cmd),
            PaymentCommand::RemovePayment(cmd) => self.handle_remove(cmd),
        }
    }
}

impl Payment {
    fn ensure_live(&self, clinic_id: ClinicId, payment_id: PaymentId) -> Result<(), DomainError> {
        if !self.created || self.removed {
            return Err(DomainError::not_found());
        }
        if self.clinic_id != Some(clinic_id) {
            return Err(DomainError::invariant("clinic mismatch"));
        }
        if self.id != payment_id {
            return Err(DomainError::invariant("payment_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreatePayment) -> Result<Vec<PaymentEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("payment already exists"));
        }

        if cmd.amount == 0 {
            return Err(DomainError::validation("payment amount must be positive"));
        }

        if cmd.transaction_id.trim().is_empty() {
            return Err(DomainError::validation("transaction_id must not be empty"));
        }

        Ok(vec![PaymentEvent::PaymentCreated(PaymentCreated {
            clinic_id: cmd.clinic_id,
            payment_id: cmd.payment_id,
            invoice_id: cmd.invoice_id,
            amount: cmd.amount,
            method: cmd.method,
            transaction_id: cmd.transaction_id.clone(),
            reference: cmd.reference.clone(),
            notes: cmd.notes.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_begin_processing(
        &self,
        cmd: &BeginProcessing,
    ) -> Result<Vec<PaymentEvent>, DomainError> {
        self.ensure_live(cmd.clinic_id, cmd.payment_id)?;

        if self.status != PaymentStatus::Pending {
            return Err(DomainError::validation(
                "only pending payments can be submitted for processing",
            ));
        }

        Ok(vec![PaymentEvent::ProcessingStarted(ProcessingStarted {
            clinic_id: cmd.clinic_id,
            payment_id: cmd.payment_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_complete(&self, cmd: &CompletePayment) -> Result<Vec<PaymentEvent>, DomainError> {
        self.ensure_live(cmd.clinic_id, cmd.payment_id)?;

        match self.status {
            PaymentStatus::Pending | PaymentStatus::Processing => {}
            PaymentStatus::Completed => {
                return Err(DomainError::conflict("payment is already completed"));
            }
            _ => {
                return Err(DomainError::validation(
                    "only pending or processing payments can be completed",
                ));
            }
        }

        Ok(vec![PaymentEvent::PaymentCompleted(PaymentCompleted {
            clinic_id: cmd.clinic_id,
            payment_id: cmd.payment_id,
            completed_at: cmd.completed_at,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_fail(&self, cmd: &FailPayment) -> Result<Vec<PaymentEvent>, DomainError> {
        self.ensure_live(cmd.clinic_id, cmd.payment_id)?;

        match self.status {
            PaymentStatus::Pending | PaymentStatus::Processing => {}
            _ => {
                return Err(DomainError::validation(
                    "only pending or processing payments can fail",
                ));
            }
        }

        Ok(vec![PaymentEvent::PaymentFailed(PaymentFailed {
            clinic_id: cmd.clinic_id,
            payment_id: cmd.payment_id,
            note: cmd.note.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_refund(&self, cmd: &RefundPayment) -> Result<Vec<PaymentEvent>, DomainError> {
        self.ensure_live(cmd.clinic_id, cmd.payment_id)?;

        if self.status != PaymentStatus::Completed {
            return Err(DomainError::validation(
                "only completed payments can be refunded",
            ));
        }

        Ok(vec![PaymentEvent::PaymentRefunded(PaymentRefunded {
            clinic_id: cmd.clinic_id,
            payment_id: cmd.payment_id,
            refunded_at: cmd.refunded_at,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelPayment) -> Result<Vec<PaymentEvent>, DomainError> {
        self.ensure_live(cmd.clinic_id, cmd.payment_id)?;

        match self.status {
            // Money already moved; the only way back is a refund.
            PaymentStatus::Completed => Err(DomainError::validation(
                "a completed payment must be refunded, not cancelled",
            )),
            PaymentStatus::Refunded => Err(DomainError::validation(
                "a refunded payment cannot be cancelled",
            )),
            PaymentStatus::Cancelled => Err(DomainError::conflict("payment is already cancelled")),
            _ => Ok(vec![PaymentEvent::PaymentCancelled(PaymentCancelled {
                clinic_id: cmd.clinic_id,
                payment_id: cmd.payment_id,
                occurred_at: cmd.occurred_at,
            })]),
        }
    }

    fn handle_update_notes(&self, cmd: &UpdateNotes) -> Result<Vec<PaymentEvent>, DomainError> {
        self.ensure_live(cmd.clinic_id, cmd.payment_id)?;

        if cmd.notes.is_none() && cmd.reference.is_none() {
            return Err(DomainError::validation("nothing to update"));
        }

        Ok(vec![PaymentEvent::NotesUpdated(NotesUpdated {
            clinic_id: cmd.clinic_id,
            payment_id: cmd.payment_id,
            notes: cmd.notes.clone(),
            reference: cmd.reference.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove(&self, cmd: &RemovePayment) -> Result<Vec<PaymentEvent>, DomainError> {
        self.ensure_live(cmd.clinic_id, cmd.payment_id)?;

        // A completed payment still counts against the invoice balance;
        // it has to be refunded first.
        if self.status == PaymentStatus::Completed {
            return Err(DomainError::conflict(
                "a completed payment must be refunded before removal",
            ));
        }

        Ok(vec![PaymentEvent::PaymentRemoved(PaymentRemoved {
            clinic_id: cmd.clinic_id,
            payment_id: cmd.payment_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
