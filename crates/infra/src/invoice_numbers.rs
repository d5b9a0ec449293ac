//! Human-readable invoice number allocation.
//!
//! Numbers follow `INV-{YYYYMMDD}-{seq}` where `seq` restarts at 1 each
//! day, per clinic. The counter increment happens under one lock, so two
//! invoices created in the same instant cannot share a number.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::NaiveDate;

use clinicops_core::ClinicId;

#[derive(Debug, Default)]
pub struct InvoiceNumbers {
    counters: Mutex<HashMap<(ClinicId, NaiveDate), u64>>,
}

impl InvoiceNumbers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next number for a clinic on the given day.
    pub fn next(&self, clinic_id: ClinicId, date: NaiveDate) -> String {
        let seq = {
            let mut counters = match self.counters.lock() {
                Ok(c) => c,
                Err(poisoned) => poisoned.into_inner(),
            };
            let counter = counters.entry((clinic_id, date)).or_insert(0);
            *counter += 1;
            *counter
        };

        format!("INV-{}-{seq}", date.format("%Y%m%d"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, d).unwrap()
    }

    #[test]
    fn sequence_restarts_each_day_per_clinic() {
        let numbers = InvoiceNumbers::new();
        let clinic = ClinicId::new();

        assert_eq!(numbers.next(clinic, day(24)), "INV-20260824-1");
        assert_eq!(numbers.next(clinic, day(24)), "INV-20260824-2");
        assert_eq!(numbers.next(clinic, day(25)), "INV-20260825-1");

        let other = ClinicId::new();
        assert_eq!(numbers.next(other, day(24)), "INV-20260824-1");
    }

    #[test]
    fn concurrent_allocation_never_duplicates() {
        use std::collections::HashSet;
        use std::sync::Arc;

        let numbers = Arc::new(InvoiceNumbers::new());
        let clinic = ClinicId::new();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let numbers = Arc::clone(&numbers);
                std::thread::spawn(move || {
                    (0..50)
                        .map(|_| numbers.next(clinic, day(24)))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for number in handle.join().unwrap() {
                assert!(seen.insert(number), "duplicate invoice number allocated");
            }
        }
        assert_eq!(seen.len(), 400);
    }
}
