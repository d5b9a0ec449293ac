use serde::{Deserialize, Serialize};

use clinicops_core::{AggregateId, ClinicId, Entity};

/// Patient identifier (clinic-scoped).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientId(pub AggregateId);

impl PatientId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PatientId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Doctor identifier (clinic-scoped).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DoctorId(pub AggregateId);

impl DoctorId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for DoctorId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Contact information for a directory record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

/// A registered patient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub id: PatientId,
    pub clinic_id: ClinicId,
    pub name: String,
    pub contact: ContactInfo,
}

impl Entity for Patient {
    type Id = PatientId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// A registered doctor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Doctor {
    pub id: DoctorId,
    pub clinic_id: ClinicId,
    pub name: String,
    pub specialty: Option<String>,
    pub contact: ContactInfo,
}

impl Entity for Doctor {
    type Id = DoctorId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// A registered clinic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clinic {
    pub id: ClinicId,
    pub name: String,
    /// Default amount billed per visit, in the smallest currency unit.
    pub standard_visit_fee: u64,
    pub contact: ContactInfo,
}

impl Entity for Clinic {
    type Id = ClinicId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
