use std::sync::{Arc, LazyLock};

use chrono::Utc;
use regex::Regex;
use tracing::info;

use bookworm_core::domain::order::{OrderId, OrderSummary};
use bookworm_core::domain::outcome::OutcomeEnvelope;
use bookworm_db::{OrderRepository, RepositoryError};

const NOT_FOUND: &str = "Order not found or unauthorized access.";

static ORDER_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bORD-[0-9]{8,17}(?:-[0-9a-f]{4,32})?\b").expect("order id pattern compiles")
});

/// Read side of orders, shared by every handler that answers order questions. Lookups are
/// scoped to the asking user: an order that belongs to someone else reads as not found.
pub struct OrderLookup {
    repository: Arc<dyn OrderRepository>,
    history_limit: u32,
}

impl OrderLookup {
    pub fn new(repository: Arc<dyn OrderRepository>, history_limit: u32) -> Self {
        Self { repository, history_limit }
    }

    pub async fn find_for_user(
        &self,
        order_id: &OrderId,
        user_id: &str,
    ) -> Result<Option<OrderSummary>, RepositoryError> {
        let lines = self.repository.find_order(order_id).await?;
        if lines.is_empty() || lines.iter().any(|line| line.user_id != user_id) {
            return Ok(None);
        }
        Ok(OrderSummary::group(&lines, Utc::now()).into_iter().next())
    }

    pub async fn recent_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<OrderSummary>, RepositoryError> {
        let lines = self.repository.list_recent_for_user(user_id, self.history_limit).await?;
        Ok(OrderSummary::group(&lines, Utc::now()))
    }

    /// A specific order when the message names one, otherwise the user's recent orders.
    pub async fn answer(
        &self,
        user_id: &str,
        message: &str,
    ) -> Result<OutcomeEnvelope, RepositoryError> {
        match extract_order_id(message) {
            Some(order_id) => {
                let found = self.find_for_user(&order_id, user_id).await?;
                info!(
                    event_name = "order.lookup.single",
                    user_id = %user_id,
                    order_id = %order_id,
                    found = found.is_some(),
                    "order lookup"
                );
                Ok(match found {
                    Some(summary) => OutcomeEnvelope::order_info(summary),
                    None => OutcomeEnvelope::error(NOT_FOUND, None),
                })
            }
            None => {
                let orders = self.recent_for_user(user_id).await?;
                info!(
                    event_name = "order.lookup.recent",
                    user_id = %user_id,
                    orders = orders.len(),
                    "recent orders lookup"
                );
                Ok(OutcomeEnvelope::order_list(orders))
            }
        }
    }
}

/// First order id in free text. A hand-typed `ord-…` prefix is upper-cased; the hex
/// suffix keeps its case.
pub fn extract_order_id(message: &str) -> Option<OrderId> {
    let found = ORDER_ID_RE.find(message)?.as_str();
    let digits = found.get(3..)?;
    Some(OrderId(format!("ORD{digits}")))
}
