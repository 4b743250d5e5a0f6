//! Persistence for requests, couriers and deliveries.
//!
//! [`AssignmentStore::assign`] is the only operation with cross-record
//! atomicity requirements: it checks that the request is pending and the
//! courier online, then flips both and records the delivery, all or nothing.
//! Every implementation must make that check-then-write indivisible with
//! respect to concurrent calls.

pub mod memory;
pub mod schema;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::courier::{Availability, Courier, GeoPoint};
use crate::models::delivery::{Delivery, DeliveryStatus};
use crate::models::request::{DeliveryRequest, RequestStatus, Requester};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StoreConflict {
    #[error("request no longer available: already {0}")]
    RequestUnavailable(RequestStatus),

    #[error("courier not eligible: currently {0}")]
    CourierNotEligible(Availability),

    #[error("courier has an active delivery")]
    CourierBusy,

    #[error("delivery is already {0}")]
    DeliveryClosed(DeliveryStatus),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("{entity} {id} already exists")]
    Duplicate { entity: &'static str, id: Uuid },

    #[error(transparent)]
    Conflict(#[from] StoreConflict),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("malformed row: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        StoreError::NotFound { entity, id }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StoreCounts {
    pub requesters: usize,
    pub couriers: usize,
    pub requests: usize,
    pub deliveries: usize,
}

#[async_trait]
pub trait AssignmentStore: Send + Sync {
    async fn insert_requester(&self, requester: Requester) -> StoreResult<()>;

    async fn requester(&self, id: Uuid) -> StoreResult<Option<Requester>>;

    async fn insert_courier(&self, courier: Courier) -> StoreResult<()>;

    async fn courier(&self, id: Uuid) -> StoreResult<Option<Courier>>;

    async fn list_couriers(&self) -> StoreResult<Vec<Courier>>;

    /// Couriers that are online and have reported a position.
    async fn online_couriers(&self) -> StoreResult<Vec<Courier>>;

    /// Profile-side availability change. Refused while the courier is busy,
    /// since only closing its delivery may release it.
    async fn set_availability(&self, id: Uuid, availability: Availability) -> StoreResult<Courier>;

    async fn report_position(
        &self,
        id: Uuid,
        position: GeoPoint,
        at: DateTime<Utc>,
    ) -> StoreResult<Courier>;

    async fn insert_request(&self, request: DeliveryRequest) -> StoreResult<()>;

    async fn request(&self, id: Uuid) -> StoreResult<Option<DeliveryRequest>>;

    /// pending -> cancelled, conditionally.
    async fn cancel_request(&self, id: Uuid) -> StoreResult<DeliveryRequest>;

    /// The assignment transaction: pending request + online courier become
    /// assigned + busy, and a delivery carrying the request's courier fee is
    /// created. Fails with [`StoreConflict`] without writing anything when
    /// either precondition does not hold.
    async fn assign(&self, request_id: Uuid, courier_id: Uuid) -> StoreResult<Delivery>;

    /// in_progress -> `outcome`, releasing the courier back to online.
    async fn close_delivery(&self, id: Uuid, outcome: DeliveryStatus) -> StoreResult<Delivery>;

    async fn delivery(&self, id: Uuid) -> StoreResult<Option<Delivery>>;

    async fn list_deliveries(&self) -> StoreResult<Vec<Delivery>>;

    async fn counts(&self) -> StoreResult<StoreCounts>;
}
