use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

use clinicops_core::ClinicId;

use crate::records::{Clinic, Doctor, DoctorId, Patient, PatientId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("directory record not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Lookup contract the operations platform consumes.
///
/// The platform never mutates directory records; it only resolves them by
/// id when validating appointments and invoices.
pub trait DirectoryProvider: Send + Sync {
    fn clinic(&self, id: ClinicId) -> Option<Clinic>;
    fn patient(&self, clinic_id: ClinicId, id: PatientId) -> Option<Patient>;
    fn doctor(&self, clinic_id: ClinicId, id: DoctorId) -> Option<Doctor>;
}

/// In-memory directory for wiring and tests.
///
/// Registration enforces the uniqueness rules the real directory carries:
/// duplicate clinic names are a conflict.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    clinics: RwLock<HashMap<ClinicId, Clinic>>,
    patients: RwLock<HashMap<(ClinicId, PatientId), Patient>>,
    doctors: RwLock<HashMap<(ClinicId, DoctorId), Doctor>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_clinic(&self, clinic: Clinic) -> Result<(), DirectoryError> {
        let mut clinics = self
            .clinics
            .write()
            .map_err(|_| DirectoryError::Conflict("lock poisoned".to_string()))?;

        if clinics.values().any(|c| c.name == clinic.name && c.id != clinic.id) {
            return Err(DirectoryError::Conflict(format!(
                "clinic name '{}' is already registered",
                clinic.name
            )));
        }

        clinics.insert(clinic.id, clinic);
        Ok(())
    }

    pub fn register_patient(&self, patient: Patient) {
        if let Ok(mut patients) = self.patients.write() {
            patients.insert((patient.clinic_id, patient.id), patient);
        }
    }

    pub fn register_doctor(&self, doctor: Doctor) {
        if let Ok(mut doctors) = self.doctors.write() {
            doctors.insert((doctor.clinic_id, doctor.id), doctor);
        }
    }
}

impl DirectoryProvider for InMemoryDirectory {
    fn clinic(&self, id: ClinicId) -> Option<Clinic> {
        self.clinics.read().ok()?.get(&id).cloned()
    }

    fn patient(&self, clinic_id: ClinicId, id: PatientId) -> Option<Patient> {
        self.patients.read().ok()?.get(&(clinic_id, id)).cloned()
    }

    fn doctor(&self, clinic_id: ClinicId, id: DoctorId) -> Option<Doctor> {
        self.doctors.read().ok()?.get(&(clinic_id, id)).cloned()
    }
}
