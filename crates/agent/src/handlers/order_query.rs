use std::sync::Arc;

use async_trait::async_trait;

use bookworm_core::domain::routing::{HandlerKind, RoutingDecision};

use super::{HandlerError, HandlerOutput, TurnHandler};
use crate::lookup::OrderLookup;
use crate::turn::TurnContext;

pub struct OrderQueryHandler {
    lookup: Arc<OrderLookup>,
}

impl OrderQueryHandler {
    pub fn new(lookup: Arc<OrderLookup>) -> Self {
        Self { lookup }
    }
}

#[async_trait]
impl TurnHandler for OrderQueryHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::OrderQuery
    }

    async fn process(
        &self,
        turn: &TurnContext,
        _decision: &RoutingDecision,
    ) -> Result<HandlerOutput, HandlerError> {
        let envelope = self.lookup.answer(&turn.user_id, &turn.message).await?;
        Ok(HandlerOutput::keep(envelope))
    }
}
