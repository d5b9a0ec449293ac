//! `clinicops-auth` — caller identity and authorization boundary.
//!
//! Identity issuance (login, tokens) lives outside this system; what arrives
//! here is a resolved caller `{id, role}`. This crate is intentionally
//! decoupled from HTTP and storage.

pub mod authorize;
pub mod principal;
pub mod roles;

pub use authorize::{Action, AuthzError, allowed_roles, authorize};
pub use principal::Caller;
pub use roles::Role;
