use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use bookworm_core::domain::order::OrderRequest;
use bookworm_core::domain::outcome::OutcomeEnvelope;
use bookworm_core::domain::routing::{HandlerKind, Intent, RoutingDecision};
use bookworm_core::domain::session::StickyDirective;

use super::{HandlerError, HandlerOutput, TurnHandler};
use crate::lookup::{extract_order_id, OrderLookup};
use crate::saga::OrderSaga;
use crate::turn::TurnContext;

const ORDER_DETAILS_NEEDED: &str = "I'd be happy to help you place an order! To complete your \
    purchase I need:\n\
    1. The books in your cart (title, price and quantity)\n\
    2. Your shipping address (street, city, state and zip code)\n\
    3. Your payment information (card number, expiry date as MM/YY and CVV)";
const UNREADABLE_ORDER: &str =
    "I couldn't read those order details. Please send the cart and buyer details again.";

const PAYLOAD_KEYS: &[&str] = &["order_data", "items", "cart_items", "user_details", "buyer"];
const TRACKING_HINTS: &[&str] =
    &["where is", "track", "status", "history", "arrive", "delivered", "delivery"];

/// Places orders sent as a structured payload and answers order questions that reach it
/// through the order-history phrases.
pub struct OrderHandler {
    saga: Arc<OrderSaga>,
    lookup: Arc<OrderLookup>,
}

impl OrderHandler {
    pub fn new(saga: Arc<OrderSaga>, lookup: Arc<OrderLookup>) -> Self {
        Self { saga, lookup }
    }

    async fn place(&self, turn: &TurnContext, payload: Value) -> HandlerOutput {
        let request = match serde_json::from_value::<OrderRequest>(payload) {
            Ok(request) => request,
            Err(error) => {
                warn!(
                    event_name = "order.payload.unreadable",
                    correlation_id = %turn.correlation_id,
                    error = %error,
                    "order payload did not deserialize"
                );
                return HandlerOutput::new(
                    OutcomeEnvelope::error(UNREADABLE_ORDER, None),
                    StickyDirective::Await(HandlerKind::Order),
                );
            }
        };

        match self.saga.place_order(&request, Some(&turn.user_id)).await {
            Ok(placed) => HandlerOutput::new(
                OutcomeEnvelope::order_confirmation(placed),
                StickyDirective::Release,
            ),
            Err(error) => {
                info!(
                    event_name = "order.placement.rejected",
                    correlation_id = %turn.correlation_id,
                    user_id = %turn.user_id,
                    error = %error,
                    "order not placed"
                );
                HandlerOutput::new(error.to_envelope(), StickyDirective::Await(HandlerKind::Order))
            }
        }
    }
}

#[async_trait]
impl TurnHandler for OrderHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Order
    }

    async fn process(
        &self,
        turn: &TurnContext,
        decision: &RoutingDecision,
    ) -> Result<HandlerOutput, HandlerError> {
        if let Some(payload) = order_payload(&turn.message) {
            return Ok(self.place(turn, payload).await);
        }

        if decision.intent == Intent::OrderQuery || is_order_question(&turn.message) {
            let envelope = self.lookup.answer(&turn.user_id, &turn.message).await?;
            return Ok(HandlerOutput::keep(envelope));
        }

        Ok(HandlerOutput::new(
            OutcomeEnvelope::clarification(ORDER_DETAILS_NEEDED),
            StickyDirective::Await(HandlerKind::Order),
        ))
    }
}

/// A message is an order payload when it is a JSON object carrying cart or buyer keys.
fn order_payload(message: &str) -> Option<Value> {
    let trimmed = message.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    let value: Value = serde_json::from_str(trimmed).ok()?;
    let object = value.as_object()?;
    PAYLOAD_KEYS.iter().any(|key| object.contains_key(*key)).then_some(value)
}

fn is_order_question(message: &str) -> bool {
    let normalized = message.to_lowercase();
    extract_order_id(message).is_some()
        || TRACKING_HINTS.iter().any(|hint| normalized.contains(hint))
}
