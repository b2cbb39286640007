//! Command and query abstractions.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DomainError;
use crate::event::ActorContext;

/// Trait that all commands implement.
pub trait Command: Send + Sync + std::fmt::Debug {
    /// The type name for this command (for logging/routing).
    fn command_type(&self) -> &'static str;

    /// Unique identifier of this command instance.
    fn command_id(&self) -> Uuid;

    /// Who issued the command.
    fn actor(&self) -> &ActorContext;
}

/// Trait that all queries implement.
pub trait Query: Send + Sync + std::fmt::Debug {
    /// The type name for this query (for logging/metrics).
    fn query_type(&self) -> &'static str;

    /// Who issued the query.
    fn actor(&self) -> &ActorContext;
}

/// Business logic for one command type.
#[async_trait]
pub trait CommandHandler<C: Command>: Send + Sync {
    /// What a successful command returns.
    type Output: Send;

    /// Executes the command.
    async fn handle(&self, command: &C) -> Result<Self::Output, DomainError>;
}

/// Read-model logic for one query type.
#[async_trait]
pub trait QueryHandler<Q: Query>: Send + Sync {
    /// What the query returns.
    type Output: Send;

    /// Executes the query.
    async fn handle(&self, query: &Q) -> Result<Self::Output, DomainError>;
}
