use std::sync::Arc;
use std::time::Duration;

use chrono::{DurationRound, TimeDelta, Utc};
use thiserror::Error;
use tracing::{error, info};

use bookworm_core::domain::order::{OrderId, OrderRequest, OrderValidationError, PlacedOrder};
use bookworm_core::domain::outcome::{case_id, OutcomeEnvelope};
use bookworm_db::{OrderRepository, RepositoryError};

const PLACE_ORDER_FAILED: &str =
    "We couldn't place your order right now. Nothing was charged; please try again later.";

#[derive(Debug, Error)]
pub enum SagaError {
    #[error(transparent)]
    Validation(#[from] OrderValidationError),
    #[error("order write failed (case {case_id}): {source}")]
    Persistence {
        case_id: String,
        #[source]
        source: RepositoryError,
    },
    #[error("order write timed out (case {case_id})")]
    Timeout { case_id: String },
}

impl SagaError {
    /// Validation errors name the offending field; write failures only carry the case id.
    pub fn to_envelope(&self) -> OutcomeEnvelope {
        match self {
            Self::Validation(error) => OutcomeEnvelope::error(error.to_string(), None),
            Self::Persistence { case_id, .. } | Self::Timeout { case_id } => {
                OutcomeEnvelope::error(PLACE_ORDER_FAILED, Some(case_id.clone()))
            }
        }
    }
}

/// Validate, then write every line of the order in one transaction.
pub struct OrderSaga {
    repository: Arc<dyn OrderRepository>,
    lead_days: u32,
    write_timeout: Duration,
}

impl OrderSaga {
    pub fn new(
        repository: Arc<dyn OrderRepository>,
        lead_days: u32,
        write_timeout: Duration,
    ) -> Self {
        Self { repository, lead_days, write_timeout }
    }

    /// `acting_user` is the signed-in user for chat turns; the payload's buyer must match
    /// it. Nothing is written unless every check passes.
    pub async fn place_order(
        &self,
        request: &OrderRequest,
        acting_user: Option<&str>,
    ) -> Result<PlacedOrder, SagaError> {
        let order = request.validate()?;
        if acting_user.is_some_and(|user| user != order.buyer.user_id) {
            return Err(OrderValidationError::UserMismatch.into());
        }

        let now = Utc::now();
        let placed_at = now.duration_trunc(TimeDelta::milliseconds(1)).unwrap_or(now);
        let order_id = OrderId::generate(placed_at);
        let records = order.to_records(&order_id, placed_at, self.lead_days);
        let expected_delivery = records
            .first()
            .map(|record| record.expected_delivery)
            .unwrap_or(placed_at + TimeDelta::days(i64::from(self.lead_days)));

        match tokio::time::timeout(self.write_timeout, self.repository.insert_order(&records)).await
        {
            Ok(Ok(())) => {}
            Ok(Err(source)) => {
                let case_id = case_id("ERR", now);
                error!(
                    event_name = "order.saga.persist_failed",
                    case_id = %case_id,
                    order_id = %order_id,
                    error = %source,
                    "order write rolled back"
                );
                return Err(SagaError::Persistence { case_id, source });
            }
            Err(_) => {
                let case_id = case_id("ERR", now);
                error!(
                    event_name = "order.saga.persist_timeout",
                    case_id = %case_id,
                    order_id = %order_id,
                    "order write timed out"
                );
                return Err(SagaError::Timeout { case_id });
            }
        }

        let placed = PlacedOrder {
            order_id,
            total_cost: order.total_cost(),
            placed_at,
            expected_delivery,
        };
        info!(
            event_name = "order.saga.placed",
            order_id = %placed.order_id,
            user_id = %order.buyer.user_id,
            lines = records.len(),
            total_cost = %placed.total_cost,
            "order placed"
        );
        Ok(placed)
    }
}
