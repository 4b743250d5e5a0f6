use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::delivery::{Delivery, DeliveryStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/deliveries", get(list_deliveries))
        .route("/deliveries/:id", get(get_delivery))
        .route("/deliveries/:id/finish", post(finish_delivery))
        .route("/deliveries/:id/cancel", post(cancel_delivery))
}

async fn list_deliveries(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Delivery>>, AppError> {
    Ok(Json(state.store.list_deliveries().await?))
}

async fn get_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Delivery>, AppError> {
    let delivery = state
        .store
        .delivery(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("delivery {} not found", id)))?;

    Ok(Json(delivery))
}

async fn finish_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Delivery>, AppError> {
    Ok(Json(
        state
            .coordinator
            .close_delivery(id, DeliveryStatus::Finished)
            .await?,
    ))
}

async fn cancel_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Delivery>, AppError> {
    Ok(Json(
        state
            .coordinator
            .close_delivery(id, DeliveryStatus::Cancelled)
            .await?,
    ))
}
