//! Payment engine service: settlement orchestration and refunds.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use clinicops_auth::{Action, Caller, authorize};
use clinicops_billing::{ApplyPayment, Invoice, InvoiceCommand, InvoiceId, RollbackPayment};
use clinicops_core::{AggregateId, ClinicId};
use clinicops_directory::AccountDirectory;
use clinicops_payments::{
    BeginProcessing, CancelPayment, CompletePayment, CreatePayment, FailPayment, Payment,
    PaymentCommand, PaymentId, PaymentMethod, PaymentStatus, RefundPayment, RemovePayment,
    SettlementGateway, SettlementOutcome, SettlementRequest, UpdateNotes,
};

use crate::command_dispatcher::DispatchError;
use crate::projections::{INVOICE_AGGREGATE_TYPE, PAYMENT_AGGREGATE_TYPE, PaymentRecord, ReadModels};

use super::{Dispatcher, ServiceError, project, resolve_caller};

/// Bounded retry for the invoice-side append when settlements race.
const BALANCE_CAS_ATTEMPTS: u32 = 3;

/// Input for recording a payment against an invoice.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub invoice_id: InvoiceId,
    pub amount: u64,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

/// Partial update of a payment record.
///
/// Status targets are narrowed: a `COMPLETED` or `REFUNDED` target routes
/// through the same authoritative routines as the first-class operations,
/// so there is exactly one code path that settles money and one that gives
/// it back.
#[derive(Debug, Clone, Default)]
pub struct PaymentUpdate {
    pub status: Option<PaymentStatus>,
    pub notes: Option<String>,
    pub reference: Option<String>,
}

pub struct PaymentService {
    dispatcher: Arc<Dispatcher>,
    gateway: Arc<dyn SettlementGateway>,
    accounts: Arc<AccountDirectory>,
    read_models: Arc<ReadModels>,
}

impl PaymentService {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        gateway: Arc<dyn SettlementGateway>,
        accounts: Arc<AccountDirectory>,
        read_models: Arc<ReadModels>,
    ) -> Self {
        Self {
            dispatcher,
            gateway,
            accounts,
            read_models,
        }
    }

    /// Record a payment intent against an invoice.
    ///
    /// The amount is validated against the remaining balance up front so an
    /// obviously oversized payment is rejected before any money moves. The
    /// same bound is re-checked inside the invoice aggregate at settlement
    /// time, which is what makes concurrent settlements safe.
    pub fn create_payment(
        &self,
        caller: &Caller,
        clinic_id: ClinicId,
        input: NewPayment,
    ) -> Result<PaymentId, ServiceError> {
        authorize(caller, Action::CreatePayment)?;
        resolve_caller(&self.accounts, caller)?;

        let invoice = self.rehydrate_invoice(clinic_id, input.invoice_id)?;
        if !invoice.exists() {
            return Err(ServiceError::NotFound("invoice not found".to_string()));
        }
        if !invoice.can_reconcile() {
            return Err(ServiceError::Conflict(
                "invoice has been removed".to_string(),
            ));
        }
        if input.amount == 0 {
            return Err(ServiceError::BadRequest(
                "payment amount must be positive".to_string(),
            ));
        }
        if input.amount > invoice.remaining_amount() {
            return Err(ServiceError::BadRequest(
                "payment exceeds the invoice's remaining balance".to_string(),
            ));
        }

        let payment_id = PaymentId::new(AggregateId::new());
        let transaction_id = format!("TXN-{}", Uuid::now_v7());

        let committed = self.dispatcher.dispatch::<Payment>(
            clinic_id,
            payment_id.0,
            PAYMENT_AGGREGATE_TYPE,
            PaymentCommand::CreatePayment(CreatePayment {
                clinic_id,
                payment_id,
                invoice_id: input.invoice_id,
                amount: input.amount,
                method: input.method,
                transaction_id: transaction_id.clone(),
                reference: input.reference,
                notes: input.notes,
                occurred_at: Utc::now(),
            }),
            |_, id| Payment::empty(PaymentId::new(id)),
        )?;
        project(&self.read_models, &committed)?;

        info!(
            payment_id = %payment_id,
            invoice_id = %input.invoice_id,
            amount = input.amount,
            transaction_id = %transaction_id,
            "payment created"
        );
        Ok(payment_id)
    }

    /// Run a pending payment through the settlement gateway.
    ///
    /// Only `PENDING` payments are accepted; anything else is rejected
    /// before the gateway is contacted and the invoice is left untouched.
    pub async fn process_payment(
        &self,
        caller: &Caller,
        clinic_id: ClinicId,
        payment_id: PaymentId,
    ) -> Result<PaymentStatus, ServiceError> {
        authorize(caller, Action::ProcessPayment)?;
        resolve_caller(&self.accounts, caller)?;

        let payment = self.rehydrate_payment(clinic_id, payment_id)?;
        if !payment.exists() {
            return Err(ServiceError::NotFound("payment not found".to_string()));
        }
        if payment.status() != PaymentStatus::Pending {
            return Err(ServiceError::BadRequest(
                "only pending payments can be processed".to_string(),
            ));
        }
        let invoice_id = payment
            .invoice_id()
            .ok_or_else(|| ServiceError::Internal("payment has no invoice".to_string()))?;
        let method = payment
            .method()
            .ok_or_else(|| ServiceError::Internal("payment has no method".to_string()))?;

        let committed = self.dispatcher.dispatch::<Payment>(
            clinic_id,
            payment_id.0,
            PAYMENT_AGGREGATE_TYPE,
            PaymentCommand::BeginProcessing(BeginProcessing {
                clinic_id,
                payment_id,
                occurred_at: Utc::now(),
            }),
            |_, id| Payment::empty(PaymentId::new(id)),
        )?;
        project(&self.read_models, &committed)?;

        let request = SettlementRequest {
            payment_id,
            transaction_id: payment.transaction_id().to_string(),
            amount: payment.amount(),
            method,
        };

        match self.gateway.settle(&request).await {
            SettlementOutcome::Settled => {
                self.settle_and_complete(clinic_id, payment_id, invoice_id, payment.amount())
            }
            SettlementOutcome::Declined { reason } => {
                warn!(payment_id = %payment_id, %reason, "settlement declined");
                self.fail_payment(clinic_id, payment_id, reason)
            }
        }
    }

    /// Narrow partial update of a payment.
    pub async fn update_payment(
        &self,
        caller: &Caller,
        clinic_id: ClinicId,
        payment_id: PaymentId,
        update: PaymentUpdate,
    ) -> Result<PaymentStatus, ServiceError> {
        authorize(caller, Action::ProcessPayment)?;
        resolve_caller(&self.accounts, caller)?;

        if update.notes.is_some() || update.reference.is_some() {
            let committed = self.dispatcher.dispatch::<Payment>(
                clinic_id,
                payment_id.0,
                PAYMENT_AGGREGATE_TYPE,
                PaymentCommand::UpdateNotes(UpdateNotes {
                    clinic_id,
                    payment_id,
                    notes: update.notes.clone(),
                    reference: update.reference.clone(),
                    occurred_at: Utc::now(),
                }),
                |_, id| Payment::empty(PaymentId::new(id)),
            )?;
            project(&self.read_models, &committed)?;
        }

        let Some(target) = update.status else {
            let payment = self.rehydrate_payment(clinic_id, payment_id)?;
            return Ok(payment.status());
        };

        match target {
            PaymentStatus::Completed => {
                let payment = self.rehydrate_payment(clinic_id, payment_id)?;
                if !payment.exists() {
                    return Err(ServiceError::NotFound("payment not found".to_string()));
                }
                match payment.status() {
                    PaymentStatus::Pending => {}
                    PaymentStatus::Processing => {
                        return Err(ServiceError::Conflict(
                            "a settlement is already in flight for this payment".to_string(),
                        ));
                    }
                    PaymentStatus::Completed => {
                        return Err(ServiceError::Conflict(
                            "payment is already completed".to_string(),
                        ));
                    }
                    _ => {
                        return Err(ServiceError::BadRequest(
                            "only pending payments can be completed".to_string(),
                        ));
                    }
                }
                let invoice_id = payment
                    .invoice_id()
                    .ok_or_else(|| ServiceError::Internal("payment has no invoice".to_string()))?;

                // Claim the payment before touching the invoice. The
                // PENDING → PROCESSING append is CAS-guarded on the payment
                // stream, so of two racing completers exactly one reaches
                // the invoice; the loser surfaces as Conflict here.
                let committed = self.dispatcher.dispatch::<Payment>(
                    clinic_id,
                    payment_id.0,
                    PAYMENT_AGGREGATE_TYPE,
                    PaymentCommand::BeginProcessing(BeginProcessing {
                        clinic_id,
                        payment_id,
                        occurred_at: Utc::now(),
                    }),
                    |_, id| Payment::empty(PaymentId::new(id)),
                )?;
                project(&self.read_models, &committed)?;

                self.settle_and_complete(clinic_id, payment_id, invoice_id, payment.amount())
            }
            PaymentStatus::Refunded => {
                authorize(caller, Action::RefundPayment)?;
                self.refund(clinic_id, payment_id)
            }
            PaymentStatus::Failed => self.fail_payment(
                clinic_id,
                payment_id,
                "marked failed by operator".to_string(),
            ),
            PaymentStatus::Cancelled => {
                let committed = self.dispatcher.dispatch::<Payment>(
                    clinic_id,
                    payment_id.0,
                    PAYMENT_AGGREGATE_TYPE,
                    PaymentCommand::CancelPayment(CancelPayment {
                        clinic_id,
                        payment_id,
                        occurred_at: Utc::now(),
                    }),
                    |_, id| Payment::empty(PaymentId::new(id)),
                )?;
                project(&self.read_models, &committed)?;
                Ok(PaymentStatus::Cancelled)
            }
            PaymentStatus::Pending | PaymentStatus::Processing => Err(ServiceError::BadRequest(
                "a payment cannot be reset to pending or processing".to_string(),
            )),
        }
    }

    /// Refund a completed payment and release its share of the invoice
    /// balance.
    pub fn refund_payment(
        &self,
        caller: &Caller,
        clinic_id: ClinicId,
        payment_id: PaymentId,
    ) -> Result<PaymentStatus, ServiceError> {
        authorize(caller, Action::RefundPayment)?;
        resolve_caller(&self.accounts, caller)?;
        self.refund(clinic_id, payment_id)
    }

    /// Remove a payment record. Completed payments must be refunded first;
    /// the aggregate enforces that.
    pub fn remove_payment(
        &self,
        caller: &Caller,
        clinic_id: ClinicId,
        payment_id: PaymentId,
    ) -> Result<(), ServiceError> {
        authorize(caller, Action::ProcessPayment)?;
        resolve_caller(&self.accounts, caller)?;

        let committed = self.dispatcher.dispatch::<Payment>(
            clinic_id,
            payment_id.0,
            PAYMENT_AGGREGATE_TYPE,
            PaymentCommand::RemovePayment(RemovePayment {
                clinic_id,
                payment_id,
                occurred_at: Utc::now(),
            }),
            |_, id| Payment::empty(PaymentId::new(id)),
        )?;
        project(&self.read_models, &committed)?;

        info!(payment_id = %payment_id, "payment removed");
        Ok(())
    }

    pub fn payment(&self, clinic_id: ClinicId, payment_id: PaymentId) -> Option<PaymentRecord> {
        self.read_models.payments.get(clinic_id, &payment_id)
    }

    pub fn payments_for_invoice(
        &self,
        clinic_id: ClinicId,
        invoice_id: InvoiceId,
    ) -> Vec<PaymentRecord> {
        self.read_models
            .payments
            .list_for_invoice(clinic_id, invoice_id)
    }

    /// The single authoritative completion routine.
    ///
    /// Order matters: the invoice balance is applied before the payment is
    /// marked completed. A crash between the two appends under-counts the
    /// settlement (recoverable from the payment stream), it never credits
    /// the invoice twice.
    ///
    /// Races between settlements targeting the last of a balance serialize
    /// on the invoice stream version. A concurrency loser retries a bounded
    /// number of times against fresh state; once the balance is gone the
    /// aggregate rejects the apply and the payment is failed with a note
    /// instead of overpaying the invoice.
    fn settle_and_complete(
        &self,
        clinic_id: ClinicId,
        payment_id: PaymentId,
        invoice_id: InvoiceId,
        amount: u64,
    ) -> Result<PaymentStatus, ServiceError> {
        let mut attempt = 1;
        loop {
            let result = self.dispatcher.dispatch::<Invoice>(
                clinic_id,
                invoice_id.0,
                INVOICE_AGGREGATE_TYPE,
                InvoiceCommand::ApplyPayment(ApplyPayment {
                    clinic_id,
                    invoice_id,
                    amount,
                    occurred_at: Utc::now(),
                }),
                |_, id| Invoice::empty(InvoiceId::new(id)),
            );

            match result {
                Ok(committed) => {
                    project(&self.read_models, &committed)?;
                    break;
                }
                Err(DispatchError::Concurrency(_)) if attempt < BALANCE_CAS_ATTEMPTS => {
                    warn!(
                        payment_id = %payment_id,
                        invoice_id = %invoice_id,
                        attempt,
                        "invoice balance contention, retrying"
                    );
                    attempt += 1;
                }
                Err(DispatchError::Concurrency(msg)) => {
                    return self.fail_payment(
                        clinic_id,
                        payment_id,
                        format!("settlement abandoned after balance contention: {msg}"),
                    );
                }
                Err(DispatchError::Validation(msg))
                | Err(DispatchError::InvariantViolation(msg)) => {
                    // Balance exhausted (or invoice removed) while settling.
                    return self.fail_payment(clinic_id, payment_id, msg);
                }
                Err(other) => return Err(other.into()),
            }
        }

        let committed = self.dispatcher.dispatch::<Payment>(
            clinic_id,
            payment_id.0,
            PAYMENT_AGGREGATE_TYPE,
            PaymentCommand::CompletePayment(CompletePayment {
                clinic_id,
                payment_id,
                completed_at: Utc::now(),
                occurred_at: Utc::now(),
            }),
            |_, id| Payment::empty(PaymentId::new(id)),
        )?;
        project(&self.read_models, &committed)?;

        info!(payment_id = %payment_id, invoice_id = %invoice_id, amount, "payment completed");
        Ok(PaymentStatus::Completed)
    }

    /// The single authoritative refund routine.
    fn refund(
        &self,
        clinic_id: ClinicId,
        payment_id: PaymentId,
    ) -> Result<PaymentStatus, ServiceError> {
        let payment = self.rehydrate_payment(clinic_id, payment_id)?;
        if !payment.exists() {
            return Err(ServiceError::NotFound("payment not found".to_string()));
        }
        let invoice_id = payment
            .invoice_id()
            .ok_or_else(|| ServiceError::Internal("payment has no invoice".to_string()))?;

        let now = Utc::now();
        let committed = self.dispatcher.dispatch::<Payment>(
            clinic_id,
            payment_id.0,
            PAYMENT_AGGREGATE_TYPE,
            PaymentCommand::RefundPayment(RefundPayment {
                clinic_id,
                payment_id,
                refunded_at: now,
                occurred_at: now,
            }),
            |_, id| Payment::empty(PaymentId::new(id)),
        )?;
        project(&self.read_models, &committed)?;

        // Release the balance. The rollback floors at zero inside the
        // aggregate, so a retry after a publish hiccup cannot go negative.
        let mut attempt = 1;
        loop {
            let result = self.dispatcher.dispatch::<Invoice>(
                clinic_id,
                invoice_id.0,
                INVOICE_AGGREGATE_TYPE,
                InvoiceCommand::RollbackPayment(RollbackPayment {
                    clinic_id,
                    invoice_id,
                    amount: payment.amount(),
                    occurred_at: Utc::now(),
                }),
                |_, id| Invoice::empty(InvoiceId::new(id)),
            );

            match result {
                Ok(committed) => {
                    project(&self.read_models, &committed)?;
                    break;
                }
                Err(DispatchError::Concurrency(_)) if attempt < BALANCE_CAS_ATTEMPTS => {
                    attempt += 1;
                }
                Err(other) => return Err(other.into()),
            }
        }

        info!(
            payment_id = %payment_id,
            invoice_id = %invoice_id,
            amount = payment.amount(),
            "payment refunded"
        );
        Ok(PaymentStatus::Refunded)
    }

    fn fail_payment(
        &self,
        clinic_id: ClinicId,
        payment_id: PaymentId,
        note: String,
    ) -> Result<PaymentStatus, ServiceError> {
        let committed = self.dispatcher.dispatch::<Payment>(
            clinic_id,
            payment_id.0,
            PAYMENT_AGGREGATE_TYPE,
            PaymentCommand::FailPayment(FailPayment {
                clinic_id,
                payment_id,
                note,
                occurred_at: Utc::now(),
            }),
            |_, id| Payment::empty(PaymentId::new(id)),
        )?;
        project(&self.read_models, &committed)?;
        Ok(PaymentStatus::Failed)
    }

    fn rehydrate_payment(
        &self,
        clinic_id: ClinicId,
        payment_id: PaymentId,
    ) -> Result<Payment, ServiceError> {
        Ok(self
            .dispatcher
            .rehydrate(clinic_id, payment_id.0, |_, id| {
                Payment::empty(PaymentId::new(id))
            })?)
    }

    fn rehydrate_invoice(
        &self,
        clinic_id: ClinicId,
        invoice_id: InvoiceId,
    ) -> Result<Invoice, ServiceError> {
        Ok(self
            .dispatcher
            .rehydrate(clinic_id, invoice_id.0, |_, id| {
                Invoice::empty(InvoiceId::new(id))
            })?)
    }
}
