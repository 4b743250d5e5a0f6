use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::haversine_km;
use crate::models::courier::GeoPoint;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub number: String,
    pub district: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    #[serde(default)]
    pub complement: Option<String>,
}

/// The company that created a request. Owned by the profile service; the
/// dispatch core only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requester {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub address: Address,
    pub position: Option<GeoPoint>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Assigned,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Assigned => "assigned",
            RequestStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "assigned" => Ok(RequestStatus::Assigned),
            "cancelled" => Ok(RequestStatus::Cancelled),
            other => Err(format!("unknown request status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRequest {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub origin: GeoPoint,
    pub destination: GeoPoint,
    pub destination_address: Address,
    pub distance_km: f64,
    /// Amount owed to the courier, in cents.
    pub courier_fee_cents: i64,
    pub carries_item: bool,
    pub requires_return: bool,
    pub notes: Option<String>,
    pub status: RequestStatus,
    pub assigned_courier: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied by the request-creation side; everything else is derived.
#[derive(Debug, Clone, Deserialize)]
pub struct NewDeliveryRequest {
    pub requester_id: Uuid,
    pub origin: GeoPoint,
    pub destination: GeoPoint,
    pub destination_address: Address,
    pub courier_fee_cents: i64,
    #[serde(default)]
    pub carries_item: bool,
    #[serde(default)]
    pub requires_return: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

impl DeliveryRequest {
    pub fn pending(new: NewDeliveryRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            requester_id: new.requester_id,
            origin: new.origin,
            destination: new.destination,
            distance_km: haversine_km(&new.origin, &new.destination),
            destination_address: new.destination_address,
            courier_fee_cents: new.courier_fee_cents,
            carries_item: new.carries_item,
            requires_return: new.requires_return,
            notes: new.notes.filter(|n| !n.trim().is_empty()),
            status: RequestStatus::Pending,
            assigned_courier: None,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{Address, DeliveryRequest, NewDeliveryRequest, RequestStatus};
    use crate::models::courier::GeoPoint;

    #[test]
    fn pending_request_computes_trip_distance() {
        let request = DeliveryRequest::pending(NewDeliveryRequest {
            requester_id: Uuid::new_v4(),
            origin: GeoPoint { lat: -18.588, lng: -46.517 },
            destination: GeoPoint { lat: -18.60, lng: -46.50 },
            destination_address: Address::default(),
            courier_fee_cents: 1500,
            carries_item: true,
            requires_return: false,
            notes: Some("   ".to_string()),
        });

        assert_eq!(request.status, RequestStatus::Pending);
        assert!(request.assigned_courier.is_none());
        assert!(request.distance_km > 2.0 && request.distance_km < 2.5);
        assert!(request.notes.is_none());
    }
}
