//! Shared test doubles and utilities for the loanbook engine.

mod audit_store;
mod clock;
mod event_store;
mod metrics_sink;
mod snapshot_store;

pub use audit_store::{FailingAuditStore, InMemoryAuditStore};
pub use clock::{FixedClock, SteppingClock};
pub use event_store::{FailingEventStore, InMemoryEventStore};
pub use metrics_sink::{FailingMetricsSink, InMemoryMetricsSink};
pub use snapshot_store::InMemorySnapshotStore;
