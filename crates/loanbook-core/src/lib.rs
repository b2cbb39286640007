//! Loanbook Core — event-sourcing engine abstractions.
//!
//! This crate defines the aggregate, event and storage contracts every
//! bounded context depends on, together with the infrastructure-free parts
//! of the engine: the event-sourced repository, snapshot policy, command and
//! query buses, audit service and buffered metrics collector. Storage
//! adapters live in `loanbook-event-store`.

pub mod aggregate;
pub mod audit;
pub mod bus;
pub mod clock;
pub mod command;
pub mod error;
pub mod event;
pub mod event_sourced;
pub mod metrics;
pub mod repository;
pub mod snapshot;
