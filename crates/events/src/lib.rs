//! `clinicops-events` — event plumbing shared by the domain crates.
//!
//! Domain aggregates emit typed events; this crate supplies the `Event`
//! contract, the clinic-scoped envelope used for persistence/publication,
//! and the pub/sub bus abstraction.

pub mod bus;
pub mod clinic;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use clinic::ClinicScoped;
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
