use clinicops_core::ClinicId;

use crate::EventEnvelope;

/// Helper trait for clinic-scoped messages.
///
/// Marks types carrying an associated clinic id so infrastructure components
/// (projections, subscription loops) can filter or validate messages by
/// clinic without knowing the payload type.
pub trait ClinicScoped {
    fn clinic_id(&self) -> ClinicId;
}

impl<E> ClinicScoped for EventEnvelope<E> {
    fn clinic_id(&self) -> ClinicId {
        self.clinic_id()
    }
}
