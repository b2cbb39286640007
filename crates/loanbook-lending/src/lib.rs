//! Loanbook — loan application bounded context.
//!
//! A loan application moves through an explicit status machine; every
//! change is recorded as a domain event and persisted through the
//! event-sourced repository in `loanbook-core`.

pub mod application;
pub mod domain;
