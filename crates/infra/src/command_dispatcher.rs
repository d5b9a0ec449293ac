//! Command execution pipeline (application-level orchestration).
//!
//! Every command against an event-sourced aggregate runs through the same
//! steps:
//!
//! ```text
//! 1. Load events from store (clinic-scoped)
//! 2. Rehydrate aggregate (apply history)
//! 3. Handle command (pure decision logic, produces events)
//! 4. Persist events (append-only, optimistic concurrency check)
//! 5. Publish events to bus (read-model consumers)
//! ```
//!
//! The expected stream version is captured at load time, so a concurrent
//! writer that appended in between makes the append fail with
//! [`DispatchError::Concurrency`]. That closes the check-then-write window
//! on invoice balances: two settlements racing for the last of a balance
//! serialize on the stream version, and the loser gets a conflict instead
//! of silently overpaying.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use clinicops_core::{Aggregate, AggregateId, ClinicId, DomainError, ExpectedVersion};
use clinicops_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug)]
pub enum DispatchError {
    /// Optimistic concurrency failure (e.g. stale aggregate version).
    Concurrency(String),
    /// Clinic isolation violation (cross-clinic or cross-aggregate stream mixing).
    ClinicIsolation(String),
    /// Domain validation failure (deterministic).
    Validation(String),
    /// Domain invariant failure (deterministic).
    InvariantViolation(String),
    /// Domain authorization failure.
    Unauthorized,
    /// Domain-level not found.
    NotFound,
    /// Failed to deserialize historical event payloads into the aggregate event type.
    Deserialize(String),
    /// Persisting to the event store failed.
    Store(EventStoreError),
    /// Publication failed after a successful append (at-least-once; retry may duplicate).
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match &value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg.clone()),
            EventStoreError::ClinicIsolation(msg) => DispatchError::ClinicIsolation(msg.clone()),
            _ => DispatchError::Store(value),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::Conflict(msg) => DispatchError::Concurrency(msg),
            DomainError::Unauthorized => DispatchError::Unauthorized,
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
        }
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Generic over the store and bus so tests can wire in-memory
/// implementations and production can swap real backends without touching
/// domain code.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Rehydrate an aggregate from its stream without dispatching a command.
    ///
    /// Services use this for read-side validation before deciding which
    /// command to dispatch. The returned state is a snapshot; the actual
    /// write is still guarded by the optimistic concurrency check.
    pub fn rehydrate<A>(
        &self,
        clinic_id: ClinicId,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(ClinicId, AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(clinic_id, aggregate_id)?;
        validate_loaded_stream(clinic_id, aggregate_id, &history)?;

        let mut aggregate = make_aggregate(clinic_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;
        Ok(aggregate)
    }

    /// Dispatch a command through the full event-sourcing pipeline.
    ///
    /// The `make_aggregate` closure constructs a fresh instance for
    /// rehydration (e.g. `|_, id| Invoice::empty(InvoiceId::new(id))`),
    /// keeping the dispatcher generic over aggregate types.
    ///
    /// Returns the committed events (with assigned sequence numbers). If
    /// publication fails after the append, the events are already durable
    /// and [`DispatchError::Publish`] is returned so the caller can retry
    /// publication; consumers must therefore be idempotent.
    pub fn dispatch<A>(
        &self,
        clinic_id: ClinicId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(ClinicId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: clinicops_events::Event + Serialize + DeserializeOwned,
    {
        // 1) Load history (clinic-scoped)
        let history = self.store.load_stream(clinic_id, aggregate_id)?;
        validate_loaded_stream(clinic_id, aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        // 2) Rehydrate aggregate
        let mut aggregate = make_aggregate(clinic_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        // 3) Decide events (no mutation)
        let decided = aggregate.handle(&command).map_err(DispatchError::from)?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        // 4) Persist (append-only, optimistic)
        let aggregate_type = aggregate_type.into();
        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    clinic_id,
                    aggregate_id,
                    aggregate_type.clone(),
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        // 5) Publish committed events (after append)
        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(committed)
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    clinic_id: ClinicId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // Enforce clinic isolation even if a buggy backend returns cross-clinic
    // data. Also ensure the stream is monotonically increasing by sequence
    // number.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.clinic_id != clinic_id {
            return Err(DispatchError::ClinicIsolation(format!(
                "loaded stream contains wrong clinic_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::ClinicIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number == 0 {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                "stored event has sequence_number=0".to_string(),
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                format!(
                    "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                    e.sequence_number
                ),
            )));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    // Ensure deterministic ordering.
    let mut sorted = history.to_vec();
    sorted.sort_by_key(|e| e.sequence_number);

    for stored in sorted {
        let ev: A::Event = serde_json::from_value(stored.payload)
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}
