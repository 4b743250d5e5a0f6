use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::realtime::auth::bearer_token;
use crate::realtime::CourierAuthenticator;
use crate::state::AppState;

/// A courier resolved from `Authorization: Bearer <token>`.
pub struct AuthenticatedCourier {
    pub courier_id: Uuid,
    pub token: String,
}

pub fn header_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthenticatedCourier {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = header_token(&parts.headers)
            .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))?;

        let courier_id = state
            .tokens
            .authenticate(token)
            .ok_or_else(|| AppError::Unauthorized("invalid credential".to_string()))?;

        Ok(Self {
            courier_id,
            token: token.to_string(),
        })
    }
}
