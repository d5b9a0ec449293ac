use thiserror::Error;

use crate::{Caller, Role};

/// Operations that require an authorization decision.
///
/// Each variant corresponds to one service-level operation; the role policy
/// is a static table rather than per-call-site branching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    CreateAppointment,
    ChangeAppointmentStatus,
    ManageInvoices,
    CreatePayment,
    ProcessPayment,
    RefundPayment,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::CreateAppointment => "appointments.create",
            Action::ChangeAppointmentStatus => "appointments.change_status",
            Action::ManageInvoices => "invoices.manage",
            Action::CreatePayment => "payments.create",
            Action::ProcessPayment => "payments.process",
            Action::RefundPayment => "payments.refund",
        }
    }
}

/// Roles permitted to perform an action.
pub fn allowed_roles(action: Action) -> &'static [Role] {
    match action {
        Action::CreateAppointment => &[Role::Receptionist, Role::Patient],
        Action::ChangeAppointmentStatus => &[Role::Receptionist, Role::Doctor],
        Action::ManageInvoices => &[Role::Receptionist],
        Action::CreatePayment => &[Role::Receptionist, Role::Patient],
        Action::ProcessPayment => &[Role::Receptionist],
        Action::RefundPayment => &[Role::Receptionist],
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: role '{role}' may not perform '{action}'")]
    Forbidden { role: &'static str, action: &'static str },
}

/// Authorize a caller for an action.
///
/// - No IO
/// - No panics
/// - No business logic (pure policy check)
pub fn authorize(caller: &Caller, action: Action) -> Result<(), AuthzError> {
    if allowed_roles(action).contains(&caller.role) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden {
            role: caller.role.as_str(),
            action: action.as_str(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinicops_core::UserId;

    #[test]
    fn receptionist_may_manage_invoices() {
        let caller = Caller::receptionist(UserId::new());
        assert!(authorize(&caller, Action::ManageInvoices).is_ok());
    }

    #[test]
    fn patient_may_create_appointment_and_payment_only() {
        let caller = Caller::patient(UserId::new());
        assert!(authorize(&caller, Action::CreateAppointment).is_ok());
        assert!(authorize(&caller, Action::CreatePayment).is_ok());
        assert!(authorize(&caller, Action::ChangeAppointmentStatus).is_err());
        assert!(authorize(&caller, Action::ManageInvoices).is_err());
        assert!(authorize(&caller, Action::ProcessPayment).is_err());
        assert!(authorize(&caller, Action::RefundPayment).is_err());
    }

    #[test]
    fn doctor_may_change_status_but_not_bill() {
        let caller = Caller::doctor(UserId::new());
        assert!(authorize(&caller, Action::ChangeAppointmentStatus).is_ok());
        assert!(authorize(&caller, Action::ManageInvoices).is_err());
        assert!(authorize(&caller, Action::ProcessPayment).is_err());
    }
}
