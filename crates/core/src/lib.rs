pub mod config;
pub mod domain;
pub mod errors;

pub use domain::book::{normalize_title, BookMetadata, Recommendation, SuggestedTitle};
pub use domain::order::{
    Address, CartItem, FieldCategory, OrderId, OrderRecord, OrderRequest, OrderStatus,
    OrderSummary, OrderValidationError, PlacedOrder, ValidatedOrder,
};
pub use domain::outcome::{
    case_id, ClaimAssessment, ClaimDecision, OutcomeEnvelope, OutcomeKind, OutcomePayload,
};
pub use domain::routing::{HandlerKind, Intent, RoutingDecision, RoutingMethod};
pub use domain::session::{
    ClaimKind, Message, Role, Session, SessionUpdate, StickyContext, StickyDirective, Turn,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
