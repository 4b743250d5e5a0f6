use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::courier::GeoPoint;
use crate::models::request::{Address, DeliveryRequest, Requester};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequesterProfile {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub address: Address,
    pub position: GeoPoint,
}

/// Snapshot pushed to candidate couriers. Never carries data about other
/// couriers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestOffer {
    pub request_id: Uuid,
    pub courier_fee_cents: i64,
    pub distance_km: f64,
    pub carries_item: bool,
    pub requires_return: bool,
    pub notes: Option<String>,
    pub destination: GeoPoint,
    pub destination_address: Address,
    pub requester: RequesterProfile,
}

impl RequestOffer {
    /// `requester_position` is passed separately because a requester without
    /// coordinates cannot produce an offer at all.
    pub fn new(request: &DeliveryRequest, requester: &Requester, requester_position: GeoPoint) -> Self {
        Self {
            request_id: request.id,
            courier_fee_cents: request.courier_fee_cents,
            distance_km: request.distance_km,
            carries_item: request.carries_item,
            requires_return: request.requires_return,
            notes: request.notes.clone(),
            destination: request.destination,
            destination_address: request.destination_address.clone(),
            requester: RequesterProfile {
                id: requester.id,
                name: requester.name.clone(),
                phone: requester.phone.clone(),
                address: requester.address.clone(),
                position: requester_position,
            },
        }
    }
}

/// Messages the server pushes down a courier channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PushMessage {
    NewRequest(RequestOffer),
}

#[cfg(test)]
mod tests {
    use serde_json::Value;
    use uuid::Uuid;

    use super::{PushMessage, RequestOffer};
    use crate::models::courier::GeoPoint;
    use crate::models::request::{Address, DeliveryRequest, NewDeliveryRequest, Requester};

    #[test]
    fn new_request_push_is_tagged() {
        let requester = Requester {
            id: Uuid::new_v4(),
            name: "Padaria Central".to_string(),
            phone: "+55 34 3822-0000".to_string(),
            address: Address::default(),
            position: None,
        };
        let request = DeliveryRequest::pending(NewDeliveryRequest {
            requester_id: requester.id,
            origin: GeoPoint { lat: -18.588, lng: -46.517 },
            destination: GeoPoint { lat: -18.6, lng: -46.5 },
            destination_address: Address::default(),
            courier_fee_cents: 900,
            carries_item: false,
            requires_return: true,
            notes: Some("ring twice".to_string()),
        });
        let position = GeoPoint { lat: -18.588, lng: -46.517 };

        let message = PushMessage::NewRequest(RequestOffer::new(&request, &requester, position));
        let json: Value = serde_json::to_value(&message).unwrap();

        assert_eq!(json["type"], "new_request");
        assert_eq!(json["data"]["request_id"], request.id.to_string());
        assert_eq!(json["data"]["courier_fee_cents"], 900);
        assert_eq!(json["data"]["requires_return"], true);
        assert_eq!(json["data"]["requester"]["name"], "Padaria Central");
        assert_eq!(json["data"]["requester"]["position"]["lat"], -18.588);
    }
}
