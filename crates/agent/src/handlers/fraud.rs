use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use regex::Regex;
use serde_json::Value;
use tracing::{info, warn};

use bookworm_core::domain::outcome::{case_id, ClaimAssessment, ClaimDecision, OutcomeEnvelope};
use bookworm_core::domain::routing::{HandlerKind, RoutingDecision};
use bookworm_core::domain::session::{ClaimKind, StickyDirective};

use super::{HandlerError, HandlerOutput, TurnHandler};
use crate::llm::{complete_with_retry, extract_json_object, LlmClient, RetryPolicy};
use crate::turn::TurnContext;

const RESOLUTION_PHRASES: &[&str] =
    &["resolved", "never mind", "nevermind", "cancel claim", "that's all", "thats all"];
const DAMAGE_HINTS: &[&str] =
    &["damaged", "damage", "broken", "torn", "ripped", "wet", "missing pages", "bent", "stained"];
const MIN_REPORT_WORDS: usize = 6;

const ASK_FOR_PHOTO: &str = "I'm sorry your book arrived damaged. Please upload a photo of the \
    damage (JPEG or PNG) so I can assess it.";
const ASK_FOR_DETAILS: &str = "I'm sorry to hear that. Please describe what happened: the \
    order ID if you have it, the date and amount of the charge, and anything else unusual you \
    noticed.";
const NEED_MORE_DETAIL: &str = "Could you share a bit more detail about the problem? The order \
    ID, the date of the charge and what looked wrong all help.";
const BAD_IMAGE: &str = "I couldn't read that image. Please upload the photo as a JPEG or PNG.";
const CASE_CLOSED: &str = "Understood, I've closed this case. Is there anything else I can help \
    you with?";

static IMAGE_DATA_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^data:image/(?P<mime>jpeg|jpg|png);base64,(?P<data>[A-Za-z0-9+/=\s]+)$")
        .expect("image data url pattern compiles")
});

/// Damage and fraud triage. Keeps the conversation pinned to itself until a case is
/// assessed or the user closes it explicitly.
pub struct FraudHandler {
    llm: Arc<dyn LlmClient>,
    retry: RetryPolicy,
}

/// Decoded image evidence. Only its shape reaches the delegate.
#[derive(Debug, PartialEq, Eq)]
struct ImageEvidence {
    mime: &'static str,
    bytes: usize,
}

#[derive(Debug, PartialEq)]
struct AssessmentReply {
    decision: Option<ClaimDecision>,
    confidence: f32,
    reason: Option<String>,
    damage_type: Option<String>,
    severity: Option<String>,
}

impl FraudHandler {
    pub fn new(llm: Arc<dyn LlmClient>, retry: RetryPolicy) -> Self {
        Self { llm, retry }
    }

    async fn assess_damage(&self, turn: &TurnContext, evidence: &ImageEvidence) -> HandlerOutput {
        let prompt = damage_prompt(&turn.message, evidence);
        let reply = complete_with_retry(self.llm.as_ref(), &prompt, &self.retry, parse_assessment)
            .await
            .map_err(|error| {
                warn!(
                    event_name = "fraud.damage.delegate_failed",
                    correlation_id = %turn.correlation_id,
                    error = %error,
                    "damage assessment defaulted"
                );
            })
            .ok();

        let now = Utc::now();
        let (decision, confidence, reason, damage_type, severity) = match reply {
            Some(reply) => (
                reply.decision.unwrap_or(ClaimDecision::Replace),
                reply.confidence,
                reply.reason.unwrap_or_else(|| default_damage_reason().to_string()),
                reply.damage_type,
                reply.severity,
            ),
            None => (ClaimDecision::Replace, 0.7, default_damage_reason().to_string(), None, None),
        };
        let assessment = ClaimAssessment {
            case_id: case_id("DMG", now),
            decision,
            confidence,
            reason,
            damage_type,
            severity,
            next_steps: decision.next_steps().to_string(),
            assessed_at: now,
        };
        self.close_case(turn, assessment)
    }

    async fn assess_fraud(&self, turn: &TurnContext) -> HandlerOutput {
        let history = turn
            .recent_turns(4)
            .iter()
            .map(|turn| turn.user.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = fraud_prompt(&turn.message, &history);
        let reply = complete_with_retry(self.llm.as_ref(), &prompt, &self.retry, parse_assessment)
            .await
            .map_err(|error| {
                warn!(
                    event_name = "fraud.claim.delegate_failed",
                    correlation_id = %turn.correlation_id,
                    error = %error,
                    "fraud assessment escalated"
                );
            })
            .ok();

        let (decision, confidence, reason) = match reply {
            Some(reply) => {
                let decision = match reply.decision {
                    Some(ClaimDecision::Replace) | None => ClaimDecision::Escalate,
                    Some(decision) => decision,
                };
                let reason = reply.reason.unwrap_or_else(|| default_fraud_reason().to_string());
                (decision, reply.confidence, reason)
            }
            None => (ClaimDecision::Escalate, 0.5, default_fraud_reason().to_string()),
        };

        let now = Utc::now();
        let assessment = ClaimAssessment {
            case_id: case_id("FRD", now),
            decision,
            confidence,
            reason,
            damage_type: None,
            severity: None,
            next_steps: decision.next_steps().to_string(),
            assessed_at: now,
        };
        self.close_case(turn, assessment)
    }

    fn close_case(&self, turn: &TurnContext, assessment: ClaimAssessment) -> HandlerOutput {
        info!(
            event_name = "fraud.case.assessed",
            correlation_id = %turn.correlation_id,
            user_id = %turn.user_id,
            case_id = %assessment.case_id,
            decision = ?assessment.decision,
            confidence = assessment.confidence,
            "claim assessed"
        );
        HandlerOutput::new(OutcomeEnvelope::assessment(assessment), StickyDirective::Release)
    }
}

#[async_trait]
impl TurnHandler for FraudHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Fraud
    }

    async fn process(
        &self,
        turn: &TurnContext,
        _decision: &RoutingDecision,
    ) -> Result<HandlerOutput, HandlerError> {
        if let Some(image) = turn.image() {
            return Ok(match decode_image(image) {
                Some(evidence) => self.assess_damage(turn, &evidence).await,
                None => HandlerOutput::new(
                    OutcomeEnvelope::error(BAD_IMAGE, None),
                    StickyDirective::AwaitClaim(ClaimKind::Damage),
                ),
            });
        }

        let normalized = turn.message.trim().to_lowercase();
        let open_claim = turn.open_claim();
        if open_claim.is_some() && is_resolution(&normalized) {
            info!(
                event_name = "fraud.case.closed_by_user",
                correlation_id = %turn.correlation_id,
                user_id = %turn.user_id,
                "claim closed without assessment"
            );
            return Ok(HandlerOutput::new(
                OutcomeEnvelope::clarification(CASE_CLOSED),
                StickyDirective::Release,
            ));
        }

        let output = match open_claim {
            Some(ClaimKind::Fraud) if is_detailed(&normalized) => self.assess_fraud(turn).await,
            Some(ClaimKind::Fraud) => HandlerOutput::new(
                OutcomeEnvelope::clarification(NEED_MORE_DETAIL),
                StickyDirective::AwaitClaim(ClaimKind::Fraud),
            ),
            Some(ClaimKind::Damage) => HandlerOutput::new(
                OutcomeEnvelope::clarification(ASK_FOR_PHOTO),
                StickyDirective::AwaitClaim(ClaimKind::Damage),
            ),
            None if mentions_damage(&normalized) => HandlerOutput::new(
                OutcomeEnvelope::clarification(ASK_FOR_PHOTO),
                StickyDirective::AwaitClaim(ClaimKind::Damage),
            ),
            None => HandlerOutput::new(
                OutcomeEnvelope::clarification(ASK_FOR_DETAILS),
                StickyDirective::AwaitClaim(ClaimKind::Fraud),
            ),
        };
        Ok(output)
    }
}

fn decode_image(data_url: &str) -> Option<ImageEvidence> {
    let captures = IMAGE_DATA_URL_RE.captures(data_url)?;
    let mime = match captures.name("mime")?.as_str() {
        "png" => "image/png",
        _ => "image/jpeg",
    };
    let encoded: String =
        captures.name("data")?.as_str().chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD.decode(encoded).ok()?;
    (!bytes.is_empty()).then_some(ImageEvidence { mime, bytes: bytes.len() })
}

fn is_resolution(normalized: &str) -> bool {
    RESOLUTION_PHRASES.iter().any(|phrase| normalized.contains(phrase))
}

fn mentions_damage(normalized: &str) -> bool {
    DAMAGE_HINTS.iter().any(|hint| normalized.contains(hint))
}

fn is_detailed(normalized: &str) -> bool {
    normalized.split_whitespace().count() >= MIN_REPORT_WORDS
}

fn default_damage_reason() -> &'static str {
    "Based on your photo, the item appears to have been damaged in transit."
}

fn default_fraud_reason() -> &'static str {
    "Your report needs a closer look by our fraud team."
}

/// Accepts `recommended_action` or `decision`; confidence may be a number or a string.
fn parse_assessment(raw: &str) -> Option<AssessmentReply> {
    let value = extract_json_object(raw)?;
    let label = value
        .get("recommended_action")
        .or_else(|| value.get("decision"))
        .and_then(Value::as_str)?;
    let confidence = match value.get("confidence") {
        Some(Value::Number(number)) => number.as_f64().unwrap_or(0.5) as f32,
        Some(Value::String(text)) => text.trim().parse::<f32>().unwrap_or(0.5),
        _ => 0.5,
    };
    let text = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string)
    };

    Some(AssessmentReply {
        decision: ClaimDecision::from_label(label),
        confidence: if confidence.is_finite() { confidence.clamp(0.0, 1.0) } else { 0.5 },
        reason: text("reason"),
        damage_type: text("damage_type"),
        severity: text("severity"),
    })
}

fn damage_prompt(message: &str, evidence: &ImageEvidence) -> String {
    format!(
        "You assess damage claims for an online bookstore.\n\
         The customer uploaded a {mime} photo ({bytes} bytes) and wrote: \"{message}\"\n\n\
         Reply with only a JSON object: {{\"damage_type\": \"...\", \
         \"severity\": \"minor|moderate|severe\", \
         \"recommended_action\": \"refund|replace|escalate\", \
         \"confidence\": <number between 0 and 1>, \"reason\": \"<one or two sentences>\"}}",
        mime = evidence.mime,
        bytes = evidence.bytes,
    )
}

fn fraud_prompt(message: &str, history: &str) -> String {
    format!(
        "You review fraud reports for an online bookstore.\n\
         Earlier messages from the customer:\n{history}\n\n\
         Latest report: \"{message}\"\n\n\
         Decide whether to refund, decline or escalate. Reply with only a JSON object: \
         {{\"decision\": \"refund|decline|escalate\", \
         \"confidence\": <number between 0 and 1>, \"reason\": \"<one or two sentences>\"}}"
    )
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;

    use bookworm_core::domain::outcome::{ClaimDecision, OutcomeKind, OutcomePayload};
    use bookworm_core::domain::routing::{HandlerKind, Intent, RoutingDecision, RoutingMethod};
    use bookworm_core::domain::session::{
        ClaimKind, Session, SessionUpdate, StickyDirective, Turn,
    };

    use super::{decode_image, parse_assessment, FraudHandler};
    use crate::handlers::TurnHandler;
    use crate::llm::{LlmClient, RetryPolicy};
    use crate::turn::{Attachments, TurnContext};

    const PNG: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

    struct FixedReply {
        reply: Option<&'static str>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl LlmClient for FixedReply {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.map(str::to_string).ok_or_else(|| anyhow!("delegate offline"))
        }
    }

    fn handler(reply: Option<&'static str>) -> (FraudHandler, Arc<FixedReply>) {
        let llm = Arc::new(FixedReply { reply, calls: AtomicU32::new(0) });
        let retry = RetryPolicy {
            max_retries: 0,
            base_delay_ms: 1,
            per_attempt_timeout: Duration::from_millis(200),
        };
        (FraudHandler::new(llm.clone(), retry), llm)
    }

    fn fraud_decision() -> RoutingDecision {
        RoutingDecision::new(Intent::Fraud, 0.95, RoutingMethod::Keyword)
    }

    fn session_with_claim(claim: ClaimKind) -> Session {
        let mut session = Session::new("user-1");
        session.apply(SessionUpdate {
            handled_by: Some(HandlerKind::Fraud),
            decision: Some(fraud_decision()),
            sticky: StickyDirective::AwaitClaim(claim),
            turn: Turn::new("I have a problem", "Tell me more"),
        });
        session
    }

    #[tokio::test]
    async fn photo_is_assessed_and_case_released() {
        let (handler, _) = handler(Some(
            r#"{"damage_type": "water", "severity": "moderate", "recommended_action": "refund",
                "confidence": 0.9, "reason": "Pages are water damaged."}"#,
        ));
        let turn = TurnContext::new("c", "user-1", "look at this")
            .with_attachments(Some(Attachments { image: Some(PNG.to_string()) }));

        let output = handler.process(&turn, &fraud_decision()).await.expect("process");

        assert_eq!(output.sticky, StickyDirective::Release);
        assert_eq!(output.envelope.kind, OutcomeKind::Assessment);
        assert!(output.envelope.case_id.as_deref().is_some_and(|id| id.starts_with("DMG-")));
        assert!(output.envelope.message.contains("Pages are water damaged."));
        let OutcomePayload::Assessment { assessment } = output.envelope.payload else {
            panic!("expected assessment payload");
        };
        assert_eq!(assessment.decision, ClaimDecision::Refund);
        assert_eq!(assessment.severity.as_deref(), Some("moderate"));
    }

    #[tokio::test]
    async fn damage_assessment_defaults_to_replace_when_delegate_fails() {
        let (handler, _) = handler(None);
        let turn = TurnContext::new("c", "user-1", "")
            .with_attachments(Some(Attachments { image: Some(PNG.to_string()) }));

        let output = handler.process(&turn, &fraud_decision()).await.expect("process");

        let OutcomePayload::Assessment { assessment } = output.envelope.payload else {
            panic!("expected assessment payload");
        };
        assert_eq!(assessment.decision, ClaimDecision::Replace);
        assert!((assessment.confidence - 0.7).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn unreadable_image_keeps_damage_case_open() {
        let (handler, llm) = handler(None);
        let gif = Attachments { image: Some("data:image/gif;base64,R0lGODlh".to_string()) };
        let turn = TurnContext::new("c", "user-1", "here").with_attachments(Some(gif));

        let output = handler.process(&turn, &fraud_decision()).await.expect("process");

        assert_eq!(output.envelope.kind, OutcomeKind::Error);
        assert_eq!(output.sticky, StickyDirective::AwaitClaim(ClaimKind::Damage));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fraud_report_asks_for_details_then_assesses() {
        let (handler, _) = handler(Some(
            r#"{"decision": "refund", "confidence": 0.8, "reason": "Charge does not match an order."}"#,
        ));

        let opening = TurnContext::new("c", "user-1", "there's a charge I don't recognise");
        let first = handler.process(&opening, &fraud_decision()).await.expect("first turn");
        assert_eq!(first.envelope.kind, OutcomeKind::Clarification);
        assert_eq!(first.sticky, StickyDirective::AwaitClaim(ClaimKind::Fraud));

        let details = TurnContext::new(
            "c",
            "user-1",
            "On March 3rd I was charged $54 twice for one order ORD-20240303101010000-abcd1234",
        )
        .with_session(Some(session_with_claim(ClaimKind::Fraud)));
        let second = handler.process(&details, &fraud_decision()).await.expect("second turn");

        assert_eq!(second.envelope.kind, OutcomeKind::Assessment);
        assert!(second.envelope.case_id.as_deref().is_some_and(|id| id.starts_with("FRD-")));
        assert_eq!(second.sticky, StickyDirective::Release);
    }

    #[tokio::test]
    async fn damage_text_asks_for_photo() {
        let (handler, llm) = handler(None);
        let turn = TurnContext::new("c", "user-1", "my book arrived with torn pages");

        let output = handler.process(&turn, &fraud_decision()).await.expect("process");

        assert_eq!(output.envelope.kind, OutcomeKind::Clarification);
        assert_eq!(output.sticky, StickyDirective::AwaitClaim(ClaimKind::Damage));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn only_resolution_phrase_closes_open_case() {
        let (handler, _) = handler(None);

        let unrelated = TurnContext::new("c", "user-1", "recommend me a thriller")
            .with_session(Some(session_with_claim(ClaimKind::Damage)));
        let output = handler.process(&unrelated, &fraud_decision()).await.expect("process");
        assert_eq!(output.sticky, StickyDirective::AwaitClaim(ClaimKind::Damage));

        let resolved = TurnContext::new("c", "user-1", "Never mind, it's resolved")
            .with_session(Some(session_with_claim(ClaimKind::Damage)));
        let output = handler.process(&resolved, &fraud_decision()).await.expect("process");
        assert_eq!(output.sticky, StickyDirective::Release);
    }

    #[test]
    fn image_data_urls_are_validated() {
        assert_eq!(decode_image(PNG).map(|evidence| evidence.mime), Some("image/png"));
        assert!(decode_image("data:image/jpeg;base64,not base64!!").is_none());
        assert!(decode_image("https://example.com/photo.jpg").is_none());
        assert!(decode_image("data:image/png;base64,").is_none());
    }

    #[test]
    fn assessment_reply_tolerates_loose_shapes() {
        let parsed = parse_assessment(r#"{"decision": "Deny", "confidence": "2"}"#).expect("parse");
        assert_eq!(parsed.decision, Some(ClaimDecision::Decline));
        assert_eq!(parsed.confidence, 1.0);
        assert!(parse_assessment(r#"{"reason": "no action"}"#).is_none());
    }
}
