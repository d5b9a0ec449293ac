//! `clinicops-directory` — clinic and staff directory boundary.
//!
//! Directory management (onboarding clinics, registering patients and
//! doctors) is an external collaborator; this crate specifies the lookup
//! contract the operations platform consumes, plus an in-memory
//! implementation used for wiring and tests.

pub mod accounts;
pub mod provider;
pub mod records;

pub use accounts::{Account, AccountAccess, AccountDirectory, InMemoryAccounts};
pub use provider::{DirectoryError, DirectoryProvider, InMemoryDirectory};
pub use records::{Clinic, ContactInfo, Doctor, DoctorId, Patient, PatientId};
