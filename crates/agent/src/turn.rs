use serde::Deserialize;

use bookworm_core::domain::routing::RoutingDecision;
use bookworm_core::domain::session::{ClaimKind, Session, Turn};

/// Optional evidence sent alongside a message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct Attachments {
    /// `data:image/<type>;base64,<payload>`
    #[serde(default)]
    pub image: Option<String>,
}

impl Attachments {
    pub fn image(&self) -> Option<&str> {
        self.image.as_deref().map(str::trim).filter(|image| !image.is_empty())
    }
}

/// Immutable view of one inbound turn. Handlers read it; only the orchestrator turns
/// their output into a session change.
#[derive(Clone, Debug)]
pub struct TurnContext {
    pub correlation_id: String,
    pub user_id: String,
    pub message: String,
    pub attachments: Option<Attachments>,
    /// Session as stored before this turn; `None` on a user's first turn.
    pub session: Option<Session>,
}

impl TurnContext {
    pub fn new(
        correlation_id: impl Into<String>,
        user_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            user_id: user_id.into(),
            message: message.into(),
            attachments: None,
            session: None,
        }
    }

    pub fn with_attachments(mut self, attachments: Option<Attachments>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_session(mut self, session: Option<Session>) -> Self {
        self.session = session;
        self
    }

    pub fn image(&self) -> Option<&str> {
        self.attachments.as_ref().and_then(Attachments::image)
    }

    pub fn last_decision(&self) -> Option<&RoutingDecision> {
        self.session.as_ref().and_then(|session| session.sticky.last_decision.as_ref())
    }

    pub fn open_claim(&self) -> Option<ClaimKind> {
        self.session.as_ref().and_then(|session| session.sticky.open_claim)
    }

    pub fn has_open_fraud_case(&self) -> bool {
        self.session.as_ref().is_some_and(|session| session.sticky.has_open_fraud_case())
    }

    pub fn recent_turns(&self, window: usize) -> &[Turn] {
        match &self.session {
            Some(session) => session.recent_turns(window),
            None => &[],
        }
    }
}

/// Prompt-ready transcript of the last `window` turns.
pub fn transcript(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|turn| format!("User: {}\nAssistant: {}", turn.user.content, turn.assistant.content))
        .collect::<Vec<_>>()
        .join("\n")
}
