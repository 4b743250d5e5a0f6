use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::api::rest::auth::AuthenticatedCourier;
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/session/logout", post(logout))
}

#[derive(Serialize)]
pub struct LogoutResponse {
    pub courier_id: Uuid,
    pub closed_connections: usize,
}

/// Revokes the presented token and closes every live socket of the courier.
async fn logout(
    State(state): State<Arc<AppState>>,
    courier: AuthenticatedCourier,
) -> Result<Json<LogoutResponse>, AppError> {
    state.tokens.revoke(&courier.token);
    let closed_connections = state.registry.disconnect_courier(courier.courier_id);

    info!(courier_id = %courier.courier_id, closed_connections, "courier logged out");

    Ok(Json(LogoutResponse {
        courier_id: courier.courier_id,
        closed_connections,
    }))
}
