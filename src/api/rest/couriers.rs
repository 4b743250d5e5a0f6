use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::courier::{Availability, Courier, GeoPoint};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/couriers", post(create_courier).get(list_couriers))
        .route("/couriers/:id/availability", patch(update_availability))
        .route("/couriers/:id/position", patch(report_position))
        .route("/couriers/:id/tokens", post(issue_token))
}

#[derive(Deserialize)]
pub struct CreateCourierRequest {
    pub name: String,
    #[serde(default)]
    pub position: Option<GeoPoint>,
    #[serde(default)]
    pub availability: Option<Availability>,
}

#[derive(Deserialize)]
pub struct UpdateAvailabilityRequest {
    pub availability: Availability,
}

#[derive(Deserialize)]
pub struct ReportPositionRequest {
    pub position: GeoPoint,
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub courier_id: Uuid,
    pub token: String,
}

fn settable(availability: Availability) -> Result<Availability, AppError> {
    if availability == Availability::Busy {
        return Err(AppError::BadRequest(
            "busy is set by accepting a request, not directly".to_string(),
        ));
    }
    Ok(availability)
}

fn valid_position(position: GeoPoint) -> Result<GeoPoint, AppError> {
    if !position.is_valid() {
        return Err(AppError::BadRequest("position is not a valid coordinate".to_string()));
    }
    Ok(position)
}

async fn create_courier(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateCourierRequest>,
) -> Result<Json<Courier>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }

    let position = payload.position.map(valid_position).transpose()?;
    let availability = settable(payload.availability.unwrap_or(Availability::Offline))?;

    let courier = Courier::new(payload.name, position, availability);
    state.store.insert_courier(courier.clone()).await?;

    Ok(Json(courier))
}

async fn list_couriers(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Courier>>, AppError> {
    Ok(Json(state.store.list_couriers().await?))
}

async fn update_availability(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateAvailabilityRequest>,
) -> Result<Json<Courier>, AppError> {
    let availability = settable(payload.availability)?;
    let courier = state.store.set_availability(id, availability).await?;

    Ok(Json(courier))
}

async fn report_position(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReportPositionRequest>,
) -> Result<Json<Courier>, AppError> {
    let position = valid_position(payload.position)?;
    let courier = state.store.report_position(id, position, Utc::now()).await?;

    Ok(Json(courier))
}

async fn issue_token(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TokenResponse>, AppError> {
    if state.store.courier(id).await?.is_none() {
        return Err(AppError::NotFound(format!("courier {} not found", id)));
    }

    let token = state.tokens.issue(id);
    Ok(Json(TokenResponse {
        courier_id: id,
        token,
    }))
}
