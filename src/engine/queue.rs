use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

/// Emitted once a pending request is durably stored. Delivery is
/// at-least-once, so the handler must tolerate duplicates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RequestCreated {
    pub request_id: Uuid,
}

pub async fn publish_request_created(state: &AppState, request_id: Uuid) -> Result<(), AppError> {
    state.metrics.events_in_queue.inc();

    if let Err(err) = state.event_tx.send(RequestCreated { request_id }).await {
        state.metrics.events_in_queue.dec();
        return Err(AppError::Internal(format!("event queue send failed: {err}")));
    }

    Ok(())
}
