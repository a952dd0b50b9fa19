use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::routing::{HandlerKind, RoutingDecision};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// One inbound message and the reply it produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub user: Message,
    pub assistant: Message,
    pub at: DateTime<Utc>,
}

impl Turn {
    pub fn new(user_content: impl Into<String>, assistant_content: impl Into<String>) -> Self {
        Self {
            user: Message { role: Role::User, content: user_content.into() },
            assistant: Message { role: Role::Assistant, content: assistant_content.into() },
            at: Utc::now(),
        }
    }
}

/// Kind of open damage/fraud case a conversation is stuck on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimKind {
    Damage,
    Fraud,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StickyContext {
    pub previous_handler: Option<HandlerKind>,
    pub awaiting_clarification: Option<HandlerKind>,
    pub open_claim: Option<ClaimKind>,
    pub last_decision: Option<RoutingDecision>,
}

impl StickyContext {
    pub fn has_open_fraud_case(&self) -> bool {
        self.awaiting_clarification == Some(HandlerKind::Fraud)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub active_handler: Option<HandlerKind>,
    pub sticky: StickyContext,
    pub history: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a handler asks the orchestrator to do with the sticky routing state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StickyDirective {
    #[default]
    Keep,
    Await(HandlerKind),
    AwaitClaim(ClaimKind),
    Release,
}

/// The only way a session changes. Built by the orchestrator once per turn and applied
/// by the session store inside its read-modify-write.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionUpdate {
    pub handled_by: Option<HandlerKind>,
    pub decision: Option<RoutingDecision>,
    pub sticky: StickyDirective,
    pub turn: Turn,
}

impl Session {
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            active_handler: None,
            sticky: StickyContext::default(),
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply(&mut self, update: SessionUpdate) {
        if let Some(handler) = update.handled_by {
            self.sticky.previous_handler = self.active_handler;
            self.active_handler = Some(handler);
        }
        if let Some(decision) = update.decision {
            self.sticky.last_decision = Some(decision);
        }

        match update.sticky {
            StickyDirective::Keep => {}
            StickyDirective::Await(handler) => {
                self.sticky.awaiting_clarification = Some(handler);
                if handler != HandlerKind::Fraud {
                    self.sticky.open_claim = None;
                }
            }
            StickyDirective::AwaitClaim(claim) => {
                self.sticky.awaiting_clarification = Some(HandlerKind::Fraud);
                self.sticky.open_claim = Some(claim);
            }
            StickyDirective::Release => {
                self.sticky.awaiting_clarification = None;
                self.sticky.open_claim = None;
            }
        }

        self.history.push(update.turn);
        self.updated_at = Utc::now();
    }

    /// The last `window` turns, oldest first.
    pub fn recent_turns(&self, window: usize) -> &[Turn] {
        let start = self.history.len().saturating_sub(window);
        &self.history[start..]
    }
}
