//! Role-keyed account access.
//!
//! Lookup, save, and soft-delete of caller accounts go through one
//! polymorphic interface with an implementation per role variant, selected
//! once via a role→implementation map. Call sites never branch on role.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use clinicops_auth::Role;
use clinicops_core::UserId;

/// A caller's account record, as held by the identity collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: UserId,
    pub role: Role,
    pub display_name: String,
    pub deleted: bool,
}

/// Polymorphic account access: one implementation per role variant.
pub trait AccountAccess: Send + Sync {
    fn find_by_id(&self, id: UserId) -> Option<Account>;
    fn save(&self, account: Account);
    /// Mark the account deleted without removing the record.
    /// Returns false if the account does not exist.
    fn soft_delete(&self, id: UserId) -> bool;
}

/// In-memory account store; instantiated once per role variant.
#[derive(Debug, Default)]
pub struct InMemoryAccounts {
    inner: RwLock<HashMap<UserId, Account>>,
}

impl InMemoryAccounts {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AccountAccess for InMemoryAccounts {
    fn find_by_id(&self, id: UserId) -> Option<Account> {
        let map = self.inner.read().ok()?;
        map.get(&id).filter(|a| !a.deleted).cloned()
    }

    fn save(&self, account: Account) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(account.user_id, account);
        }
    }

    fn soft_delete(&self, id: UserId) -> bool {
        let Ok(mut map) = self.inner.write() else {
            return false;
        };
        match map.get_mut(&id) {
            Some(account) => {
                account.deleted = true;
                true
            }
            None => false,
        }
    }
}

/// Role→implementation map, built once at wiring time.
pub struct AccountDirectory {
    by_role: HashMap<Role, Arc<dyn AccountAccess>>,
}

impl AccountDirectory {
    pub fn new(by_role: HashMap<Role, Arc<dyn AccountAccess>>) -> Self {
        Self { by_role }
    }

    /// One in-memory store per role variant.
    pub fn in_memory() -> Self {
        let mut by_role: HashMap<Role, Arc<dyn AccountAccess>> = HashMap::new();
        for role in Role::ALL {
            by_role.insert(role, Arc::new(InMemoryAccounts::new()));
        }
        Self { by_role }
    }

    /// Select the implementation for a role.
    pub fn access(&self, role: Role) -> Option<&Arc<dyn AccountAccess>> {
        self.by_role.get(&role)
    }

    /// Resolve a live (not soft-deleted) account for a caller.
    pub fn resolve(&self, role: Role, id: UserId) -> Option<Account> {
        self.access(role)?.find_by_id(id)
    }
}

impl core::fmt::Debug for AccountDirectory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AccountDirectory")
            .field("roles", &self.by_role.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(role: Role) -> Account {
        Account {
            user_id: UserId::new(),
            role,
            display_name: "Sam".to_string(),
            deleted: false,
        }
    }

    #[test]
    fn resolve_goes_through_the_role_map() {
        let directory = AccountDirectory::in_memory();
        let receptionist = account(Role::Receptionist);
        let id = receptionist.user_id;
        directory
            .access(Role::Receptionist)
            .unwrap()
            .save(receptionist);

        assert!(directory.resolve(Role::Receptionist, id).is_some());
        // Same id under a different role's store does not resolve.
        assert!(directory.resolve(Role::Doctor, id).is_none());
    }

    #[test]
    fn soft_deleted_accounts_do_not_resolve() {
        let directory = AccountDirectory::in_memory();
        let patient = account(Role::Patient);
        let id = patient.user_id;
        let access = directory.access(Role::Patient).unwrap();
        access.save(patient);

        assert!(access.soft_delete(id));
        assert!(directory.resolve(Role::Patient, id).is_none());
        assert!(!access.soft_delete(UserId::new()));
    }
}
