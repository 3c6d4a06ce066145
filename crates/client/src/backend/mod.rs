//! Capability interface for the remote object store.
//!
//! The backend is an external collaborator: a table-oriented store with
//! insert/upsert/query/update and a realtime change feed. It does not
//! guarantee server-side filtering of realtime events.

use async_trait::async_trait;
use futures::stream::BoxStream;
use reelchat_shared::api::realtime::RowEvent;
use serde_json::Value;

pub mod memory;

pub use memory::MemoryBackend;

/// Live feed of row changes for one table. Dropping it unsubscribes.
pub type RowEventStream = BoxStream<'static, RowEvent>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// A unique column already holds the inserted value.
    #[error("conflict on {table}.{column}")]
    Conflict { table: String, column: String },

    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Row predicate. Only equality is needed by the messaging core.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(column: &str, value: Value) -> Self {
        Filter::Eq(column.to_string(), value)
    }

    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And(mut parts) => {
                parts.push(other);
                Filter::And(parts)
            }
            first => Filter::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Filter) -> Self {
        match self {
            Filter::Or(mut parts) => {
                parts.push(other);
                Filter::Or(parts)
            }
            first => Filter::Or(vec![first, other]),
        }
    }

    pub fn matches(&self, record: &Value) -> bool {
        match self {
            Filter::Eq(column, expected) => record.get(column) == Some(expected),
            Filter::And(parts) => parts.iter().all(|f| f.matches(record)),
            Filter::Or(parts) => parts.iter().any(|f| f.matches(record)),
        }
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Insert a new row. Fails with `Conflict` if a unique column collides.
    async fn insert(&self, table: &str, record: Value) -> Result<Value, BackendError>;

    /// Insert, or replace the row whose `conflict_column` matches.
    async fn upsert(
        &self,
        table: &str,
        conflict_column: &str,
        record: Value,
    ) -> Result<Value, BackendError>;

    async fn query(&self, table: &str, filter: &Filter) -> Result<Vec<Value>, BackendError>;

    /// Merge `patch` into every matching row and return the updated rows.
    async fn update(
        &self,
        table: &str,
        filter: &Filter,
        patch: Value,
    ) -> Result<Vec<Value>, BackendError>;

    /// Subscribe to insert and update events on `table`.
    async fn subscribe(&self, table: &str) -> Result<RowEventStream, BackendError>;
}
