use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::courier::GeoPoint;
use crate::models::request::{Address, Requester};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/requesters", post(create_requester))
        .route("/requesters/:id", get(get_requester))
}

#[derive(Deserialize)]
pub struct CreateRequesterRequest {
    pub name: String,
    pub phone: String,
    pub address: Address,
    #[serde(default)]
    pub position: Option<GeoPoint>,
}

async fn create_requester(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateRequesterRequest>,
) -> Result<Json<Requester>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }
    if payload.position.is_some_and(|p| !p.is_valid()) {
        return Err(AppError::BadRequest("position is not a valid coordinate".to_string()));
    }

    let requester = Requester {
        id: Uuid::new_v4(),
        name: payload.name,
        phone: payload.phone,
        address: payload.address,
        position: payload.position,
    };
    state.store.insert_requester(requester.clone()).await?;

    Ok(Json(requester))
}

async fn get_requester(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Requester>, AppError> {
    let requester = state
        .store
        .requester(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("requester {} not found", id)))?;

    Ok(Json(requester))
}
