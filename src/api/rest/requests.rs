use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use uuid::Uuid;

use crate::api::rest::auth::AuthenticatedCourier;
use crate::engine::queue::publish_request_created;
use crate::error::AppError;
use crate::models::delivery::Delivery;
use crate::models::request::{DeliveryRequest, NewDeliveryRequest};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/requests", post(create_request))
        .route("/requests/:id", get(get_request))
        .route("/requests/:id/cancel", post(cancel_request))
        .route("/requests/:id/accept", post(accept_request))
}

/// Persists a pending request, then hands it to the dispatch loop. The
/// caller gets the stored request back without waiting for the round.
async fn create_request(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewDeliveryRequest>,
) -> Result<Json<DeliveryRequest>, AppError> {
    if !payload.origin.is_valid() || !payload.destination.is_valid() {
        return Err(AppError::BadRequest("origin and destination must be valid coordinates".to_string()));
    }
    if payload.courier_fee_cents < 0 {
        return Err(AppError::BadRequest("courier_fee_cents cannot be negative".to_string()));
    }

    let request = DeliveryRequest::pending(payload);
    state.store.insert_request(request.clone()).await?;
    publish_request_created(&state, request.id).await?;

    Ok(Json(request))
}

async fn get_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeliveryRequest>, AppError> {
    let request = state
        .store
        .request(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("request {} not found", id)))?;

    Ok(Json(request))
}

async fn cancel_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeliveryRequest>, AppError> {
    Ok(Json(state.coordinator.cancel_request(id).await?))
}

async fn accept_request(
    State(state): State<Arc<AppState>>,
    courier: AuthenticatedCourier,
    Path(id): Path<Uuid>,
) -> Result<Json<Delivery>, AppError> {
    let delivery = state
        .coordinator
        .accept_request(id, courier.courier_id)
        .await?;

    Ok(Json(delivery))
}
