use std::sync::Arc;

use thiserror::Error;

use bookworm_core::domain::routing::HandlerKind;

use crate::handlers::TurnHandler;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no handler registered for `{0}`")]
    Missing(HandlerKind),
}

/// One handler per [`HandlerKind`]. Lookup is total: a registry only exists once every
/// slot is filled, so routing never has to handle an unknown target.
#[derive(Clone)]
pub struct HandlerRegistry {
    recommendation: Arc<dyn TurnHandler>,
    order: Arc<dyn TurnHandler>,
    order_query: Arc<dyn TurnHandler>,
    fraud: Arc<dyn TurnHandler>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    pub fn get(&self, kind: HandlerKind) -> &Arc<dyn TurnHandler> {
        match kind {
            HandlerKind::Recommendation => &self.recommendation,
            HandlerKind::Order => &self.order,
            HandlerKind::OrderQuery => &self.order_query,
            HandlerKind::Fraud => &self.fraud,
        }
    }
}

#[derive(Default)]
pub struct HandlerRegistryBuilder {
    recommendation: Option<Arc<dyn TurnHandler>>,
    order: Option<Arc<dyn TurnHandler>>,
    order_query: Option<Arc<dyn TurnHandler>>,
    fraud: Option<Arc<dyn TurnHandler>>,
}

impl HandlerRegistryBuilder {
    /// Places the handler in the slot named by its own [`TurnHandler::kind`]. A later
    /// registration for the same kind replaces the earlier one.
    pub fn register(mut self, handler: Arc<dyn TurnHandler>) -> Self {
        let slot = match handler.kind() {
            HandlerKind::Recommendation => &mut self.recommendation,
            HandlerKind::Order => &mut self.order,
            HandlerKind::OrderQuery => &mut self.order_query,
            HandlerKind::Fraud => &mut self.fraud,
        };
        *slot = Some(handler);
        self
    }

    pub fn build(self) -> Result<HandlerRegistry, RegistryError> {
        Ok(HandlerRegistry {
            recommendation: take(self.recommendation, HandlerKind::Recommendation)?,
            order: take(self.order, HandlerKind::Order)?,
            order_query: take(self.order_query, HandlerKind::OrderQuery)?,
            fraud: take(self.fraud, HandlerKind::Fraud)?,
        })
    }
}

fn take(
    handler: Option<Arc<dyn TurnHandler>>,
    slot: HandlerKind,
) -> Result<Arc<dyn TurnHandler>, RegistryError> {
    handler.ok_or(RegistryError::Missing(slot))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use bookworm_core::domain::outcome::OutcomeEnvelope;
    use bookworm_core::domain::routing::{HandlerKind, RoutingDecision};

    use super::{HandlerRegistry, RegistryError};
    use crate::handlers::{HandlerError, HandlerOutput, TurnHandler};
    use crate::turn::TurnContext;

    struct Named(HandlerKind);

    #[async_trait]
    impl TurnHandler for Named {
        fn kind(&self) -> HandlerKind {
            self.0
        }

        async fn process(
            &self,
            _turn: &TurnContext,
            _decision: &RoutingDecision,
        ) -> Result<HandlerOutput, HandlerError> {
            Ok(HandlerOutput::keep(OutcomeEnvelope::clarification(self.0.as_str())))
        }
    }

    #[test]
    fn every_kind_resolves_to_its_own_handler() {
        let registry = HandlerKind::ALL
            .into_iter()
            .fold(HandlerRegistry::builder(), |builder, kind| {
                builder.register(Arc::new(Named(kind)))
            })
            .build()
            .expect("complete registry");

        for kind in HandlerKind::ALL {
            assert_eq!(registry.get(kind).kind(), kind);
        }
    }

    #[test]
    fn incomplete_registry_is_rejected() {
        let result = HandlerRegistry::builder()
            .register(Arc::new(Named(HandlerKind::Recommendation)))
            .register(Arc::new(Named(HandlerKind::Order)))
            .build();

        assert_eq!(result.err(), Some(RegistryError::Missing(HandlerKind::OrderQuery)));
    }
}
