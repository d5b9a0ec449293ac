use serde::{Deserialize, Serialize};

use clinicops_core::UserId;

use crate::Role;

/// A resolved caller identity, as supplied by the identity collaborator.
///
/// Construction is decoupled from transport: an API layer would derive this
/// from validated claims, tests construct it directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: UserId,
    pub role: Role,
}

impl Caller {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn receptionist(user_id: UserId) -> Self {
        Self::new(user_id, Role::Receptionist)
    }

    pub fn doctor(user_id: UserId) -> Self {
        Self::new(user_id, Role::Doctor)
    }

    pub fn patient(user_id: UserId) -> Self {
        Self::new(user_id, Role::Patient)
    }
}
