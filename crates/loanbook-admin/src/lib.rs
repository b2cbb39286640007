//! Loanbook admin — operator commands over the PostgreSQL-backed engine.

pub mod cli;
pub mod error;
pub mod state;
