use serde::{Deserialize, Serialize};

/// Role attached to a caller identity by the external identity collaborator.
///
/// The role set is closed: clinic operations only distinguish the front
/// desk, clinicians, and patients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Receptionist,
    Doctor,
    Patient,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Receptionist => "receptionist",
            Role::Doctor => "doctor",
            Role::Patient => "patient",
        }
    }

    /// All role variants, in declaration order.
    pub const ALL: [Role; 3] = [Role::Receptionist, Role::Doctor, Role::Patient];
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
