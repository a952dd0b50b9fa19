//! Dialogue engine for the BookWorm assistant.
//!
//! A turn flows through the crate in one direction:
//! 1. **Routing** (`classifier`) - keyword and context rules first, the completion delegate
//!    only when no rule applies, a fixed fallback when the delegate cannot be trusted
//! 2. **Dispatch** (`registry`, `handlers`) - one handler per [`HandlerKind`], looked up
//!    through a registry that cannot be built with a slot missing
//! 3. **Side effects** (`saga`, `lookup`, `catalog`) - order placement, order queries and
//!    book metadata
//! 4. **Bookkeeping** (`orchestrator`) - a single session update per turn
//!
//! The completion delegate (`llm`) is untrusted: every reply is parsed defensively under a
//! bounded retry policy, and every caller owns a fallback path.
//!
//! [`HandlerKind`]: bookworm_core::domain::routing::HandlerKind

pub mod catalog;
pub mod classifier;
pub mod handlers;
pub mod llm;
pub mod lookup;
pub mod orchestrator;
pub mod registry;
pub mod saga;
pub mod turn;

pub use catalog::{BookCatalog, GoogleBooksCatalog};
pub use classifier::IntentClassifier;
pub use handlers::{
    FraudHandler, HandlerError, HandlerOutput, OrderHandler, OrderQueryHandler,
    RecommendationHandler, TurnHandler,
};
pub use llm::{DelegateError, LlmClient, OpenAiCompatibleClient, RetryPolicy};
pub use lookup::OrderLookup;
pub use orchestrator::{DialogueOrchestrator, DialogueSettings, InboundTurn};
pub use registry::{HandlerRegistry, RegistryError};
pub use saga::{OrderSaga, SagaError};
pub use turn::{Attachments, TurnContext};
