//! JSON API.
//!
//! - `POST /chat`        - one dialogue turn, answered with an outcome envelope
//! - `POST /place-order` - order placement outside the dialogue

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use bookworm_agent::{DialogueOrchestrator, InboundTurn, OrderSaga, SagaError};
use bookworm_core::domain::order::OrderRequest;
use bookworm_core::domain::outcome::OutcomeEnvelope;
use bookworm_core::errors::{ApplicationError, DomainError, InterfaceError};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct ApiState {
    orchestrator: Arc<DialogueOrchestrator>,
    saga: Arc<OrderSaga>,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct ApiError {
    pub error: &'static str,
    pub correlation_id: String,
}

impl From<InterfaceError> for ApiError {
    fn from(value: InterfaceError) -> Self {
        Self { error: value.user_message(), correlation_id: value.correlation_id().to_string() }
    }
}

pub fn router(orchestrator: Arc<DialogueOrchestrator>, saga: Arc<OrderSaga>) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/place-order", post(place_order))
        .with_state(ApiState { orchestrator, saga })
}

pub async fn chat(
    State(state): State<ApiState>,
    Json(inbound): Json<InboundTurn>,
) -> Result<Json<OutcomeEnvelope>, (StatusCode, Json<ApiError>)> {
    let has_image = inbound.attachments.as_ref().and_then(|a| a.image()).is_some();
    let problem = if inbound.user_id.trim().is_empty() {
        Some("user_id is required")
    } else if inbound.message.trim().is_empty() && !has_image {
        Some("a message or an image attachment is required")
    } else {
        None
    };

    if let Some(problem) = problem {
        let interface = ApplicationError::from(DomainError::InvariantViolation(problem.to_string()))
            .into_interface(Uuid::new_v4().to_string());
        warn!(
            event_name = "api.chat.rejected",
            correlation_id = %interface.correlation_id(),
            reason = problem,
            "chat request rejected"
        );
        return Err((StatusCode::BAD_REQUEST, Json(interface.into())));
    }

    Ok(Json(state.orchestrator.handle(inbound).await))
}

pub async fn place_order(
    State(state): State<ApiState>,
    Json(request): Json<OrderRequest>,
) -> (StatusCode, Json<OutcomeEnvelope>) {
    match state.saga.place_order(&request, None).await {
        Ok(placed) => {
            info!(
                event_name = "api.order.placed",
                order_id = %placed.order_id,
                "order placed through api"
            );
            (StatusCode::OK, Json(OutcomeEnvelope::order_confirmation(placed)))
        }
        Err(error @ SagaError::Validation(_)) => {
            (StatusCode::UNPROCESSABLE_ENTITY, Json(error.to_envelope()))
        }
        Err(error) => (StatusCode::SERVICE_UNAVAILABLE, Json(error.to_envelope())),
    }
}
