use async_trait::async_trait;
use thiserror::Error;

use bookworm_core::domain::order::{OrderId, OrderRecord};
use bookworm_core::domain::session::{Session, SessionUpdate};

pub mod memory;
pub mod order;
pub mod session;

pub use memory::{InMemoryOrderRepository, InMemorySessionStore};
pub use order::SqlOrderRepository;
pub use session::SqlSessionStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("rejected write: {0}")]
    Rejected(String),
}

/// Order lines, written one order at a time.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Persists every line of a single order in one transaction. Either all lines are
    /// visible afterwards or none are.
    async fn insert_order(&self, lines: &[OrderRecord]) -> Result<(), RepositoryError>;

    /// All lines of one order, by line number. Empty when the id is unknown.
    async fn find_order(&self, order_id: &OrderId) -> Result<Vec<OrderRecord>, RepositoryError>;

    /// Lines of the user's `limit` most recent orders, newest order first.
    async fn list_recent_for_user(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<OrderRecord>, RepositoryError>;
}

/// Per-user dialogue state.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, user_id: &str) -> Result<Option<Session>, RepositoryError>;

    /// Atomic read-modify-write keyed by user id. Creates the session on first use and
    /// returns the stored result.
    async fn apply(&self, user_id: &str, update: SessionUpdate)
        -> Result<Session, RepositoryError>;
}

/// Shared guard for both implementations: an order write must be non-empty and every
/// line must carry the same order id.
pub(crate) fn check_order_lines(lines: &[OrderRecord]) -> Result<&OrderId, RepositoryError> {
    let first = lines
        .first()
        .ok_or_else(|| RepositoryError::Rejected("order has no lines".to_string()))?;
    if lines.iter().any(|line| line.order_id != first.order_id) {
        return Err(RepositoryError::Rejected(format!(
            "order {} mixes lines from several orders",
            first.order_id
        )));
    }
    Ok(&first.order_id)
}
