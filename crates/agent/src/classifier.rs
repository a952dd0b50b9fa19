use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use bookworm_core::config::{DialogueConfig, LlmConfig};
use bookworm_core::domain::routing::{HandlerKind, Intent, RoutingDecision, RoutingMethod};

use crate::llm::{complete_with_retry, extract_json_object, LlmClient, RetryPolicy};
use crate::turn::{transcript, TurnContext};

const GREETINGS: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "hiya",
    "howdy",
    "greetings",
    "hi there",
    "hello there",
    "hey there",
    "good morning",
    "good afternoon",
    "good evening",
];

const ORDER_HISTORY_PHRASES: &[&str] =
    &["order history", "my orders", "show orders", "order status"];

const ORDER_KEYWORDS: &[&str] =
    &["buy", "purchase", "order", "checkout", "cart", "ship", "shipping", "track", "tracking"];

const FRAUD_KEYWORDS: &[&str] = &[
    "fraud",
    "fraudulent",
    "scam",
    "unauthorized",
    "stolen",
    "chargeback",
    "damaged",
    "damage",
    "broken",
    "torn",
    "refund",
];

const RECOMMENDATION_KEYWORDS: &[&str] = &[
    "recommend",
    "recommendation",
    "recommendations",
    "suggest",
    "suggestion",
    "suggestions",
    "book",
    "books",
    "read",
    "reading",
    "novel",
    "novels",
    "author",
    "genre",
];

const KEYWORD_CONFIDENCE: f32 = 0.8;
const PRIORITY_CONFIDENCE: f32 = 0.95;

/// Decides which handler owns a turn. Rules are tried in a fixed order and the first
/// that matches wins; the delegate is only asked when no rule applies.
pub struct IntentClassifier {
    llm: Arc<dyn LlmClient>,
    retry: RetryPolicy,
    min_delegate_confidence: f32,
    history_window: usize,
}

impl IntentClassifier {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        retry: RetryPolicy,
        min_delegate_confidence: f32,
        history_window: usize,
    ) -> Self {
        Self { llm, retry, min_delegate_confidence, history_window }
    }

    pub fn from_config(
        llm: Arc<dyn LlmClient>,
        llm_config: &LlmConfig,
        dialogue: &DialogueConfig,
    ) -> Self {
        Self::new(
            llm,
            RetryPolicy::from_config(llm_config),
            dialogue.min_delegate_confidence,
            dialogue.history_window,
        )
    }

    /// Never fails: every path ends in a decision whose target is a registered handler.
    pub async fn classify(&self, turn: &TurnContext) -> RoutingDecision {
        if let Some(decision) = classify_by_rules(turn) {
            debug!(
                event_name = "classifier.rule.matched",
                correlation_id = %turn.correlation_id,
                intent = decision.intent.as_str(),
                method = decision.method.as_str(),
                "routing decided by rule"
            );
            return decision;
        }

        self.classify_delegated(turn).await
    }

    async fn classify_delegated(&self, turn: &TurnContext) -> RoutingDecision {
        let history = transcript(turn.recent_turns(self.history_window));
        let prompt = routing_prompt(&turn.message, &history);
        let reply = match complete_with_retry(
            self.llm.as_ref(),
            &prompt,
            &self.retry,
            parse_delegate_reply,
        )
        .await
        {
            Ok(reply) => reply,
            Err(error) => {
                warn!(
                    event_name = "classifier.delegate.failed",
                    correlation_id = %turn.correlation_id,
                    error = %error,
                    "delegated classification failed, using fallback route"
                );
                return RoutingDecision::fallback();
            }
        };

        let Some(intent) = reply.intent else {
            warn!(
                event_name = "classifier.delegate.unmapped",
                correlation_id = %turn.correlation_id,
                "delegate returned an unmapped intent"
            );
            return RoutingDecision::fallback();
        };
        if reply.confidence < self.min_delegate_confidence {
            debug!(
                event_name = "classifier.delegate.low_confidence",
                correlation_id = %turn.correlation_id,
                confidence = reply.confidence,
                "delegate decision below threshold"
            );
            return RoutingDecision::fallback();
        }

        // The routing hint only picks between handlers that already serve the intent.
        let target = match (intent, reply.target) {
            (Intent::OrderQuery, Some(HandlerKind::Order)) => HandlerKind::Order,
            _ => intent.default_handler(),
        };
        if reply.target.is_some_and(|hint| hint != target) {
            debug!(
                event_name = "classifier.delegate.routing_ignored",
                correlation_id = %turn.correlation_id,
                intent = %intent,
                "delegate routing disagrees with its intent"
            );
        }
        RoutingDecision::routed(intent, target, reply.confidence, RoutingMethod::Delegated)
    }
}

/// The deterministic part of classification: greeting, order-history phrases,
/// attachments, then keyword buckets. `None` when the delegate has to decide.
pub fn classify_by_rules(turn: &TurnContext) -> Option<RoutingDecision> {
    let normalized = normalize_text(&turn.message);

    if turn.last_decision().is_none() && is_greeting(&normalized) {
        return Some(RoutingDecision::routed(
            Intent::Greeting,
            HandlerKind::Recommendation,
            PRIORITY_CONFIDENCE,
            RoutingMethod::Sticky,
        ));
    }

    if ORDER_HISTORY_PHRASES.iter().any(|phrase| normalized.contains(phrase)) {
        return Some(RoutingDecision::routed(
            Intent::OrderQuery,
            HandlerKind::Order,
            PRIORITY_CONFIDENCE,
            RoutingMethod::Keyword,
        ));
    }

    if turn.image().is_some() {
        return Some(RoutingDecision::new(
            Intent::Fraud,
            PRIORITY_CONFIDENCE,
            RoutingMethod::Keyword,
        ));
    }

    let tokens = tokenize(&normalized);
    let buckets = [
        (Intent::Order, ORDER_KEYWORDS),
        (Intent::Fraud, FRAUD_KEYWORDS),
        (Intent::Recommendation, RECOMMENDATION_KEYWORDS),
    ];
    buckets
        .iter()
        .find(|(_, keywords)| tokens.iter().any(|token| keywords.contains(&token.as_str())))
        .map(|(intent, _)| {
            RoutingDecision::new(*intent, KEYWORD_CONFIDENCE, RoutingMethod::Keyword)
        })
}

#[derive(Debug, PartialEq)]
struct DelegateReply {
    intent: Option<Intent>,
    target: Option<HandlerKind>,
    confidence: f32,
}

/// A reply is well-formed when it is a JSON object with a string `intent`. Whether that
/// intent is one we know is decided afterwards.
fn parse_delegate_reply(raw: &str) -> Option<DelegateReply> {
    let value = extract_json_object(raw)?;
    let intent_label = value.get("intent")?.as_str()?;
    let confidence = match value.get("confidence") {
        Some(Value::Number(number)) => number.as_f64().unwrap_or(0.0) as f32,
        Some(Value::String(text)) => text.trim().parse::<f32>().unwrap_or(0.0),
        _ => 0.0,
    };
    let target = value.get("routing").and_then(Value::as_str).and_then(HandlerKind::from_label);

    Some(DelegateReply {
        intent: Intent::from_label(intent_label),
        target,
        confidence: if confidence.is_finite() { confidence.clamp(0.0, 1.0) } else { 0.0 },
    })
}

fn routing_prompt(message: &str, history: &str) -> String {
    let history = if history.is_empty() { "(no earlier messages)" } else { history };
    format!(
        "You route messages for an online bookstore assistant.\n\
         Handlers:\n\
         - RecommendationHandler: book suggestions, authors, genres, general chat\n\
         - OrderHandler: buying books, placing orders, carts\n\
         - OrderQueryHandler: status, tracking or history of existing orders\n\
         - FraudHandler: damaged deliveries, refunds, unauthorized charges, fraud\n\n\
         Conversation so far:\n{history}\n\n\
         Latest message: {message}\n\n\
         Reply with only a JSON object of the form \
         {{\"intent\": \"recommendation|order|order_query|fraud|unknown\", \
         \"confidence\": <number between 0 and 1>, \"routing\": \"<handler name>\"}}"
    )
}

fn is_greeting(normalized: &str) -> bool {
    let bare = normalized.trim_end_matches(|c: char| matches!(c, '!' | '.' | '?' | ',' | ' '));
    GREETINGS.contains(&bare)
}

fn normalize_text(text: &str) -> String {
    text.trim().to_lowercase()
}

fn tokenize(text: &str) -> Vec<String> {
    let mut sanitized = String::with_capacity(text.len());
    for character in text.chars() {
        if character.is_alphanumeric() || character == '\'' {
            sanitized.push(character);
        } else {
            sanitized.push(' ');
        }
    }
    sanitized.split_whitespace().map(|token| token.to_string()).collect()
}
