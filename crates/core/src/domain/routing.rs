use std::fmt;

use serde::{Deserialize, Serialize};

/// What the user is trying to do on this turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Recommendation,
    Order,
    OrderQuery,
    Fraud,
    Unknown,
    Greeting,
}

/// The closed set of handlers a turn can be dispatched to. The classifier and the
/// registry share this type, so a routing value can never name a missing handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    Recommendation,
    Order,
    OrderQuery,
    Fraud,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMethod {
    Keyword,
    Sticky,
    Delegated,
    Fallback,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub intent: Intent,
    pub confidence: f32,
    pub target: HandlerKind,
    pub method: RoutingMethod,
}

impl Intent {
    pub const ALL: [Intent; 6] = [
        Intent::Recommendation,
        Intent::Order,
        Intent::OrderQuery,
        Intent::Fraud,
        Intent::Unknown,
        Intent::Greeting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recommendation => "recommendation",
            Self::Order => "order",
            Self::OrderQuery => "order_query",
            Self::Fraud => "fraud",
            Self::Unknown => "unknown",
            Self::Greeting => "greeting",
        }
    }

    /// Parses a label produced by an untrusted source. Returns `None` for anything
    /// outside the closed set.
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = normalize_label(label);
        match normalized.as_str() {
            "recommendation" | "recommend" | "recommendations" => Some(Self::Recommendation),
            "order" | "purchase" => Some(Self::Order),
            "order_query" | "orderquery" | "tracking" | "order_status" => Some(Self::OrderQuery),
            "fraud" | "damage" => Some(Self::Fraud),
            "unknown" => Some(Self::Unknown),
            "greeting" => Some(Self::Greeting),
            _ => None,
        }
    }

    /// Total mapping from intent to the handler that owns it.
    pub fn default_handler(&self) -> HandlerKind {
        match self {
            Self::Recommendation | Self::Greeting | Self::Unknown => HandlerKind::Recommendation,
            Self::Order => HandlerKind::Order,
            Self::OrderQuery => HandlerKind::OrderQuery,
            Self::Fraud => HandlerKind::Fraud,
        }
    }
}

impl HandlerKind {
    pub const ALL: [HandlerKind; 4] = [
        HandlerKind::Recommendation,
        HandlerKind::Order,
        HandlerKind::OrderQuery,
        HandlerKind::Fraud,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recommendation => "recommendation",
            Self::Order => "order",
            Self::OrderQuery => "order_query",
            Self::Fraud => "fraud",
        }
    }

    /// Accepts both the snake_case name and the `FooHandler` / `FooAgent` spellings a
    /// completion model tends to echo back from the prompt.
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = normalize_label(label);
        let stripped = normalized
            .strip_suffix("handler")
            .or_else(|| normalized.strip_suffix("agent"))
            .unwrap_or(normalized.as_str())
            .trim_end_matches('_');
        match stripped {
            "recommendation" => Some(Self::Recommendation),
            "order" => Some(Self::Order),
            "order_query" | "orderquery" | "tracking" => Some(Self::OrderQuery),
            "fraud" => Some(Self::Fraud),
            _ => None,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RoutingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keyword => "keyword",
            Self::Sticky => "sticky",
            Self::Delegated => "delegated",
            Self::Fallback => "fallback",
        }
    }
}

impl RoutingDecision {
    /// Builds a decision routed to the intent's own handler. Confidence is clamped to
    /// `[0, 1]`; a non-finite value becomes zero.
    pub fn new(intent: Intent, confidence: f32, method: RoutingMethod) -> Self {
        Self::routed(intent, intent.default_handler(), confidence, method)
    }

    pub fn routed(
        intent: Intent,
        target: HandlerKind,
        confidence: f32,
        method: RoutingMethod,
    ) -> Self {
        let confidence = if confidence.is_finite() { confidence.clamp(0.0, 1.0) } else { 0.0 };
        Self { intent, confidence, target, method }
    }

    pub fn fallback() -> Self {
        Self::new(Intent::Unknown, 0.5, RoutingMethod::Fallback)
    }
}

fn normalize_label(label: &str) -> String {
    label
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'')
        .to_ascii_lowercase()
        .replace([' ', '-'], "_")
}
