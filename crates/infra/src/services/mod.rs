//! Application services: the operations surface of the platform.
//!
//! Services authorize the caller, resolve directory records, run read-side
//! validation, dispatch commands through the event-sourcing pipeline, and
//! feed the read models with the committed events. All business rules live
//! in the domain aggregates; services only orchestrate.

mod appointments;
mod invoices;
mod payments;

pub use appointments::{AppointmentService, NewAppointment};
pub use invoices::{InvoiceService, NewInvoice};
pub use payments::{NewPayment, PaymentService, PaymentUpdate};

use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;

use clinicops_auth::{AuthzError, Caller};
use clinicops_directory::{Account, AccountDirectory};
use clinicops_events::{EventEnvelope, InMemoryEventBus};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::{EventStore, StoredEvent};
use crate::projections::{ProjectionError, ReadModels};

/// Bus type the services publish through.
pub type Bus = InMemoryEventBus<EventEnvelope<JsonValue>>;

/// Dispatcher type the services share.
pub type Dispatcher = CommandDispatcher<Arc<dyn EventStore>, Arc<Bus>>;

/// Service-level error, mapped onto transport semantics by the edge.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<DispatchError> for ServiceError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::Concurrency(msg) => ServiceError::Conflict(msg),
            DispatchError::InvariantViolation(msg) => ServiceError::Conflict(msg),
            DispatchError::Validation(msg) => ServiceError::BadRequest(msg),
            DispatchError::Unauthorized => {
                ServiceError::Unauthorized("domain authorization failed".to_string())
            }
            DispatchError::NotFound => ServiceError::NotFound("record not found".to_string()),
            DispatchError::ClinicIsolation(msg) => ServiceError::Internal(msg),
            DispatchError::Deserialize(msg) => ServiceError::Internal(msg),
            DispatchError::Store(err) => ServiceError::Internal(err.to_string()),
            DispatchError::Publish(msg) => ServiceError::Internal(msg),
        }
    }
}

impl From<AuthzError> for ServiceError {
    fn from(value: AuthzError) -> Self {
        ServiceError::Unauthorized(value.to_string())
    }
}

impl From<ProjectionError> for ServiceError {
    fn from(value: ProjectionError) -> Self {
        ServiceError::Internal(value.to_string())
    }
}

/// Resolve the caller's live account through the role-keyed directory.
///
/// An unknown or soft-deleted account is an authorization failure, not a
/// lookup miss: the caller identity could not be established.
pub(crate) fn resolve_caller(
    accounts: &AccountDirectory,
    caller: &Caller,
) -> Result<Account, ServiceError> {
    accounts.resolve(caller.role, caller.user_id).ok_or_else(|| {
        ServiceError::Unauthorized(format!(
            "no active {} account for caller",
            caller.role.as_str()
        ))
    })
}

/// Feed committed events into the read models.
///
/// The bus also carries these envelopes for external consumers; applying
/// them inline keeps service queries read-your-writes consistent.
pub(crate) fn project(
    read_models: &ReadModels,
    committed: &[StoredEvent],
) -> Result<(), ServiceError> {
    for stored in committed {
        read_models.apply(&stored.to_envelope())?;
    }
    Ok(())
}
