use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::book::Recommendation;
use crate::domain::order::{OrderSummary, PlacedOrder};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Greeting,
    Recommendation,
    OrderConfirmation,
    OrderInfo,
    OrderList,
    Clarification,
    Assessment,
    Error,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::Recommendation => "recommendation",
            Self::OrderConfirmation => "order_confirmation",
            Self::OrderInfo => "order_info",
            Self::OrderList => "order_list",
            Self::Clarification => "clarification",
            Self::Assessment => "assessment",
            Self::Error => "error",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimDecision {
    Refund,
    Replace,
    Escalate,
    Decline,
}

impl ClaimDecision {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "refund" => Some(Self::Refund),
            "replace" | "replacement" => Some(Self::Replace),
            "escalate" | "escalation" => Some(Self::Escalate),
            "decline" | "deny" => Some(Self::Decline),
            _ => None,
        }
    }

    pub fn next_steps(&self) -> &'static str {
        match self {
            Self::Refund => {
                "Next steps:\n1. Your refund will be processed within 3-5 business days\n\
                 2. You'll receive a confirmation email with refund details\n\
                 3. Keep the damaged item or documentation for possible review"
            }
            Self::Replace => {
                "Next steps:\n1. A replacement will be shipped within 2 business days\n\
                 2. You'll receive tracking information via email\n\
                 3. Use the provided return label to send back the damaged item"
            }
            Self::Escalate => {
                "Next steps:\n1. Your case has been escalated to our specialist team\n\
                 2. A representative will contact you within 24 hours\n\
                 3. Please have any relevant documentation ready"
            }
            Self::Decline => {
                "Next steps:\n1. Review the detailed explanation provided\n\
                 2. If you disagree, you can appeal with additional documentation\n\
                 3. Contact your bank for more information about the transaction"
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClaimAssessment {
    pub case_id: String,
    pub decision: ClaimDecision,
    pub confidence: f32,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub damage_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    pub next_steps: String,
    pub assessed_at: DateTime<Utc>,
}

/// Structured body of an envelope; which variant appears is fixed by the envelope kind.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutcomePayload {
    Empty,
    Books { recommendations: Vec<Recommendation> },
    Placed { order: PlacedOrder },
    Order { order: OrderSummary },
    Orders { orders: Vec<OrderSummary> },
    Assessment { assessment: ClaimAssessment },
}

/// The single reply a turn produces.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OutcomeEnvelope {
    #[serde(rename = "type")]
    pub kind: OutcomeKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_id: Option<String>,
    #[serde(skip_serializing_if = "OutcomePayload::is_empty")]
    pub payload: OutcomePayload,
}

impl OutcomePayload {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

impl OutcomeEnvelope {
    fn new(kind: OutcomeKind, message: impl Into<String>, payload: OutcomePayload) -> Self {
        Self { kind, message: message.into(), case_id: None, payload }
    }

    pub fn greeting(message: impl Into<String>) -> Self {
        Self::new(OutcomeKind::Greeting, message, OutcomePayload::Empty)
    }

    pub fn recommendations(
        message: impl Into<String>,
        recommendations: Vec<Recommendation>,
    ) -> Self {
        Self::new(OutcomeKind::Recommendation, message, OutcomePayload::Books { recommendations })
    }

    pub fn order_confirmation(order: PlacedOrder) -> Self {
        let message = format!(
            "Order placed successfully! Your order ID is {}. Expected delivery: {}.",
            order.order_id,
            order.expected_delivery.format("%Y-%m-%d")
        );
        Self::new(OutcomeKind::OrderConfirmation, message, OutcomePayload::Placed { order })
    }

    pub fn order_info(order: OrderSummary) -> Self {
        let message = format!("Order {} is {}.", order.order_id, order.status.label());
        Self::new(OutcomeKind::OrderInfo, message, OutcomePayload::Order { order })
    }

    pub fn order_list(orders: Vec<OrderSummary>) -> Self {
        let message = if orders.is_empty() {
            "You have no orders yet.".to_string()
        } else {
            format!("Here are your {} most recent orders.", orders.len())
        };
        Self::new(OutcomeKind::OrderList, message, OutcomePayload::Orders { orders })
    }

    pub fn clarification(message: impl Into<String>) -> Self {
        Self::new(OutcomeKind::Clarification, message, OutcomePayload::Empty)
    }

    pub fn assessment(assessment: ClaimAssessment) -> Self {
        let message = format!(
            "{}\n\n{}\n\nYour case reference: {}",
            assessment.reason, assessment.next_steps, assessment.case_id
        );
        let case_id = assessment.case_id.clone();
        Self {
            case_id: Some(case_id),
            ..Self::new(OutcomeKind::Assessment, message, OutcomePayload::Assessment { assessment })
        }
    }

    /// Error envelopes carry a user-safe message and an optional case id, nothing else.
    pub fn error(message: impl Into<String>, case_id: Option<String>) -> Self {
        Self { case_id, ..Self::new(OutcomeKind::Error, message, OutcomePayload::Empty) }
    }

    pub fn is_error(&self) -> bool {
        self.kind == OutcomeKind::Error
    }
}

/// `<PREFIX>-<UTC yyyyMMddHHmmss>` case identifiers for claims and failed turns.
pub fn case_id(prefix: &str, at: DateTime<Utc>) -> String {
    format!("{prefix}-{}", at.format("%Y%m%d%H%M%S"))
}
