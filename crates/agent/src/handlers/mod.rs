use async_trait::async_trait;
use thiserror::Error;

use bookworm_core::domain::outcome::OutcomeEnvelope;
use bookworm_core::domain::routing::{HandlerKind, RoutingDecision};
use bookworm_core::domain::session::StickyDirective;
use bookworm_db::RepositoryError;

use crate::turn::TurnContext;

pub mod fraud;
pub mod order;
pub mod order_query;
pub mod recommendation;

pub use fraud::FraudHandler;
pub use order::OrderHandler;
pub use order_query::OrderQueryHandler;
pub use recommendation::RecommendationHandler;

/// What a handler hands back: the reply for the user and how the sticky routing state
/// should change. The handler itself never touches the session.
#[derive(Clone, Debug, PartialEq)]
pub struct HandlerOutput {
    pub envelope: OutcomeEnvelope,
    pub sticky: StickyDirective,
}

impl HandlerOutput {
    pub fn new(envelope: OutcomeEnvelope, sticky: StickyDirective) -> Self {
        Self { envelope, sticky }
    }

    pub fn keep(envelope: OutcomeEnvelope) -> Self {
        Self::new(envelope, StickyDirective::Keep)
    }
}

/// Failures a handler could not turn into a user-facing reply itself. The orchestrator
/// logs the detail and answers with a generic error envelope.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("persistence failure: {0}")]
    Persistence(#[from] RepositoryError),
    #[error("upstream unavailable: {0}")]
    Upstream(String),
    #[error("{0} timed out")]
    Timeout(&'static str),
}

#[async_trait]
pub trait TurnHandler: Send + Sync {
    fn kind(&self) -> HandlerKind;

    async fn process(
        &self,
        turn: &TurnContext,
        decision: &RoutingDecision,
    ) -> Result<HandlerOutput, HandlerError>;
}
