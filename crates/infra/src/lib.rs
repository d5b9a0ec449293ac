//! Infrastructure layer: event store, dispatch pipeline, read models,
//! and the application services that tie the domain crates together.

pub mod command_dispatcher;
pub mod event_store;
pub mod invoice_numbers;
pub mod projections;
pub mod read_model;
pub mod services;

#[cfg(test)]
mod integration_tests;
