use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use bookworm_core::config::DialogueConfig;
use bookworm_core::domain::outcome::{case_id, OutcomeEnvelope};
use bookworm_core::domain::routing::{HandlerKind, Intent, RoutingDecision, RoutingMethod};
use bookworm_core::domain::session::{SessionUpdate, StickyDirective, Turn};
use bookworm_db::SessionStore;

use crate::classifier::IntentClassifier;
use crate::handlers::HandlerOutput;
use crate::registry::HandlerRegistry;
use crate::turn::{Attachments, TurnContext};

const TURN_FAILED: &str =
    "Sorry, something went wrong while handling your message. Please try again.";

/// Inbound turn as it arrives at the boundary.
#[derive(Clone, Debug, Deserialize)]
pub struct InboundTurn {
    #[serde(alias = "userId")]
    pub user_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub attachments: Option<Attachments>,
}

#[derive(Clone, Debug)]
pub struct DialogueSettings {
    pub greet_on_first_turn: bool,
    pub greeting_message: String,
    pub turn_timeout: Duration,
}

impl DialogueSettings {
    pub fn from_config(config: &DialogueConfig) -> Self {
        Self {
            greet_on_first_turn: config.greet_on_first_turn,
            greeting_message: config.greeting_message.clone(),
            turn_timeout: Duration::from_secs(config.turn_timeout_secs),
        }
    }
}

/// Top-level turn loop: load session, route, dispatch, record. Every turn ends in exactly
/// one envelope and, unless the session store itself is down, exactly one history entry.
pub struct DialogueOrchestrator {
    sessions: Arc<dyn SessionStore>,
    classifier: IntentClassifier,
    registry: HandlerRegistry,
    settings: DialogueSettings,
}

impl DialogueOrchestrator {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        classifier: IntentClassifier,
        registry: HandlerRegistry,
        settings: DialogueSettings,
    ) -> Self {
        Self { sessions, classifier, registry, settings }
    }

    pub async fn handle(&self, inbound: InboundTurn) -> OutcomeEnvelope {
        self.handle_turn(&inbound.user_id, &inbound.message, inbound.attachments).await
    }

    pub async fn handle_turn(
        &self,
        user_id: &str,
        message: &str,
        attachments: Option<Attachments>,
    ) -> OutcomeEnvelope {
        let correlation_id = Uuid::new_v4().to_string();
        let session = match self.sessions.load(user_id).await {
            Ok(session) => session,
            Err(source) => {
                let case = case_id("ERR", Utc::now());
                error!(
                    event_name = "dialogue.session.load_failed",
                    correlation_id = %correlation_id,
                    user_id = %user_id,
                    case_id = %case,
                    error = %source,
                    "session could not be loaded"
                );
                return OutcomeEnvelope::error(TURN_FAILED, Some(case));
            }
        };

        let turn = TurnContext::new(&correlation_id, user_id, message)
            .with_attachments(attachments)
            .with_session(session);

        if self.is_opening_turn(&turn) {
            let envelope = OutcomeEnvelope::greeting(self.settings.greeting_message.clone());
            info!(
                event_name = "dialogue.turn.greeted",
                correlation_id = %correlation_id,
                user_id = %user_id,
                "first turn answered with greeting"
            );
            let update = SessionUpdate {
                handled_by: Some(HandlerKind::Recommendation),
                decision: None,
                sticky: StickyDirective::Keep,
                turn: Turn::new(message, envelope.message.clone()),
            };
            self.record(&turn, update).await;
            return envelope;
        }

        let decision = self.route(&turn).await;
        info!(
            event_name = "dialogue.turn.routed",
            correlation_id = %correlation_id,
            user_id = %user_id,
            intent = decision.intent.as_str(),
            target = decision.target.as_str(),
            method = decision.method.as_str(),
            confidence = decision.confidence,
            "turn routed"
        );

        let output = self.dispatch(&turn, &decision).await;
        let update = SessionUpdate {
            handled_by: Some(decision.target),
            decision: Some(decision),
            sticky: output.sticky,
            turn: Turn::new(message, output.envelope.message.clone()),
        };
        self.record(&turn, update).await;

        info!(
            event_name = "dialogue.turn.completed",
            correlation_id = %correlation_id,
            user_id = %user_id,
            outcome = output.envelope.kind.as_str(),
            "turn completed"
        );
        output.envelope
    }

    /// A user's very first plain message gets the welcome script without classification.
    fn is_opening_turn(&self, turn: &TurnContext) -> bool {
        self.settings.greet_on_first_turn
            && turn.session.is_none()
            && turn.image().is_none()
            && !turn.message.trim().is_empty()
    }

    async fn route(&self, turn: &TurnContext) -> RoutingDecision {
        if turn.has_open_fraud_case() {
            return RoutingDecision::routed(
                Intent::Fraud,
                HandlerKind::Fraud,
                1.0,
                RoutingMethod::Sticky,
            );
        }

        let decision = self.classifier.classify(turn).await;
        let awaiting = turn.session.as_ref().and_then(|s| s.sticky.awaiting_clarification);
        match (decision.method, awaiting) {
            (RoutingMethod::Fallback, Some(handler)) => RoutingDecision::routed(
                intent_owned_by(handler),
                handler,
                decision.confidence,
                RoutingMethod::Sticky,
            ),
            _ => decision,
        }
    }

    async fn dispatch(&self, turn: &TurnContext, decision: &RoutingDecision) -> HandlerOutput {
        let handler = self.registry.get(decision.target);
        let failure = match tokio::time::timeout(
            self.settings.turn_timeout,
            handler.process(turn, decision),
        )
        .await
        {
            Ok(Ok(output)) => return output,
            Ok(Err(source)) => source.to_string(),
            Err(_) => format!("handler timed out after {:?}", self.settings.turn_timeout),
        };

        let case = case_id("ERR", Utc::now());
        error!(
            event_name = "dialogue.turn.failed",
            correlation_id = %turn.correlation_id,
            user_id = %turn.user_id,
            target = decision.target.as_str(),
            case_id = %case,
            error = %failure,
            "handler failed"
        );
        HandlerOutput::keep(OutcomeEnvelope::error(TURN_FAILED, Some(case)))
    }

    async fn record(&self, turn: &TurnContext, update: SessionUpdate) {
        if let Err(source) = self.sessions.apply(&turn.user_id, update).await {
            warn!(
                event_name = "dialogue.session.update_failed",
                correlation_id = %turn.correlation_id,
                user_id = %turn.user_id,
                error = %source,
                "session update dropped"
            );
        }
    }
}

fn intent_owned_by(handler: HandlerKind) -> Intent {
    match handler {
        HandlerKind::Recommendation => Intent::Recommendation,
        HandlerKind::Order => Intent::Order,
        HandlerKind::OrderQuery => Intent::OrderQuery,
        HandlerKind::Fraud => Intent::Fraud,
    }
}
