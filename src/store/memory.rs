use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::models::courier::{Availability, Courier, GeoPoint};
use crate::models::delivery::{Delivery, DeliveryStatus};
use crate::models::request::{DeliveryRequest, RequestStatus, Requester};
use crate::store::{AssignmentStore, StoreConflict, StoreCounts, StoreError, StoreResult};

/// In-process store. Multi-record writes hold `DashMap` entry guards for the
/// whole check-then-write and always lock in the order
/// request -> courier -> delivery, so they cannot deadlock each other.
/// No guard is held across an `.await`.
#[derive(Default)]
pub struct MemoryStore {
    requesters: DashMap<Uuid, Requester>,
    couriers: DashMap<Uuid, Courier>,
    requests: DashMap<Uuid, DeliveryRequest>,
    deliveries: DashMap<Uuid, Delivery>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn insert_new<T>(map: &DashMap<Uuid, T>, entity: &'static str, id: Uuid, value: T) -> StoreResult<()> {
    match map.entry(id) {
        Entry::Occupied(_) => Err(StoreError::Duplicate { entity, id }),
        Entry::Vacant(slot) => {
            slot.insert(value);
            Ok(())
        }
    }
}

#[async_trait]
impl AssignmentStore for MemoryStore {
    async fn insert_requester(&self, requester: Requester) -> StoreResult<()> {
        insert_new(&self.requesters, "requester", requester.id, requester)
    }

    async fn requester(&self, id: Uuid) -> StoreResult<Option<Requester>> {
        Ok(self.requesters.get(&id).map(|entry| entry.value().clone()))
    }

    async fn insert_courier(&self, courier: Courier) -> StoreResult<()> {
        insert_new(&self.couriers, "courier", courier.id, courier)
    }

    async fn courier(&self, id: Uuid) -> StoreResult<Option<Courier>> {
        Ok(self.couriers.get(&id).map(|entry| entry.value().clone()))
    }

    async fn list_couriers(&self) -> StoreResult<Vec<Courier>> {
        Ok(self
            .couriers
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn online_couriers(&self) -> StoreResult<Vec<Courier>> {
        Ok(self
            .couriers
            .iter()
            .filter(|entry| {
                let courier = entry.value();
                courier.availability == Availability::Online && courier.position.is_some()
            })
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn set_availability(&self, id: Uuid, availability: Availability) -> StoreResult<Courier> {
        let mut courier = self
            .couriers
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("courier", id))?;

        if courier.availability == Availability::Busy {
            return Err(StoreConflict::CourierBusy.into());
        }

        courier.availability = availability;
        courier.updated_at = Utc::now();
        Ok(courier.clone())
    }

    async fn report_position(
        &self,
        id: Uuid,
        position: GeoPoint,
        at: DateTime<Utc>,
    ) -> StoreResult<Courier> {
        let mut courier = self
            .couriers
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("courier", id))?;

        courier.position = Some(position);
        courier.position_updated_at = Some(at);
        courier.updated_at = Utc::now();
        Ok(courier.clone())
    }

    async fn insert_request(&self, request: DeliveryRequest) -> StoreResult<()> {
        if !self.requesters.contains_key(&request.requester_id) {
            return Err(StoreError::not_found("requester", request.requester_id));
        }
        insert_new(&self.requests, "request", request.id, request)
    }

    async fn request(&self, id: Uuid) -> StoreResult<Option<DeliveryRequest>> {
        Ok(self.requests.get(&id).map(|entry| entry.value().clone()))
    }

    async fn cancel_request(&self, id: Uuid) -> StoreResult<DeliveryRequest> {
        let mut request = self
            .requests
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("request", id))?;

        if request.status != RequestStatus::Pending {
            return Err(StoreConflict::RequestUnavailable(request.status).into());
        }

        request.status = RequestStatus::Cancelled;
        Ok(request.clone())
    }

    async fn assign(&self, request_id: Uuid, courier_id: Uuid) -> StoreResult<Delivery> {
        let mut request = self
            .requests
            .get_mut(&request_id)
            .ok_or_else(|| StoreError::not_found("request", request_id))?;

        if request.status != RequestStatus::Pending {
            return Err(StoreConflict::RequestUnavailable(request.status).into());
        }

        let mut courier = self
            .couriers
            .get_mut(&courier_id)
            .ok_or_else(|| StoreError::not_found("courier", courier_id))?;

        if courier.availability != Availability::Online {
            return Err(StoreConflict::CourierNotEligible(courier.availability).into());
        }

        let delivery = Delivery::start(request_id, courier_id, request.courier_fee_cents);

        request.status = RequestStatus::Assigned;
        request.assigned_courier = Some(courier_id);
        courier.availability = Availability::Busy;
        courier.updated_at = Utc::now();
        self.deliveries.insert(delivery.id, delivery.clone());

        Ok(delivery)
    }

    async fn close_delivery(&self, id: Uuid, outcome: DeliveryStatus) -> StoreResult<Delivery> {
        let courier_id = self
            .deliveries
            .get(&id)
            .map(|entry| entry.courier_id)
            .ok_or_else(|| StoreError::not_found("delivery", id))?;

        let mut courier = self
            .couriers
            .get_mut(&courier_id)
            .ok_or_else(|| StoreError::not_found("courier", courier_id))?;
        let mut delivery = self
            .deliveries
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("delivery", id))?;

        if delivery.status.is_terminal() {
            return Err(StoreConflict::DeliveryClosed(delivery.status).into());
        }

        let now = Utc::now();
        delivery.status = outcome;
        delivery.closed_at = Some(now);
        courier.availability = Availability::Online;
        courier.updated_at = now;

        Ok(delivery.clone())
    }

    async fn delivery(&self, id: Uuid) -> StoreResult<Option<Delivery>> {
        Ok(self.deliveries.get(&id).map(|entry| entry.value().clone()))
    }

    async fn list_deliveries(&self) -> StoreResult<Vec<Delivery>> {
        Ok(self
            .deliveries
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn counts(&self) -> StoreResult<StoreCounts> {
        Ok(StoreCounts {
            requesters: self.requesters.len(),
            couriers: self.couriers.len(),
            requests: self.requests.len(),
            deliveries: self.deliveries.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::MemoryStore;
    use crate::models::courier::{Availability, Courier, GeoPoint};
    use crate::models::delivery::DeliveryStatus;
    use crate::models::request::{
        Address, DeliveryRequest, NewDeliveryRequest, RequestStatus, Requester,
    };
    use crate::store::{AssignmentStore, StoreConflict, StoreError};

    const ORIGIN: GeoPoint = GeoPoint {
        lat: -18.588,
        lng: -46.517,
    };

    async fn seeded() -> (MemoryStore, DeliveryRequest) {
        let store = MemoryStore::new();
        let requester = Requester {
            id: Uuid::new_v4(),
            name: "Farmacia Boa Saude".to_string(),
            phone: "3499990000".to_string(),
            address: Address::default(),
            position: Some(ORIGIN),
        };
        store.insert_requester(requester.clone()).await.unwrap();

        let request = DeliveryRequest::pending(NewDeliveryRequest {
            requester_id: requester.id,
            origin: ORIGIN,
            destination: GeoPoint {
                lat: -18.6,
                lng: -46.5,
            },
            destination_address: Address::default(),
            courier_fee_cents: 1250,
            carries_item: true,
            requires_return: false,
            notes: None,
        });
        store.insert_request(request.clone()).await.unwrap();
        (store, request)
    }

    async fn courier(store: &MemoryStore, availability: Availability) -> Courier {
        let courier = Courier::new("courier".to_string(), Some(ORIGIN), availability);
        store.insert_courier(courier.clone()).await.unwrap();
        courier
    }

    #[tokio::test]
    async fn assign_moves_all_three_records() {
        let (store, request) = seeded().await;
        let courier = courier(&store, Availability::Online).await;

        let delivery = store.assign(request.id, courier.id).await.unwrap();

        assert_eq!(delivery.status, DeliveryStatus::InProgress);
        assert_eq!(delivery.value_cents, 1250);
        let request = store.request(request.id).await.unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Assigned);
        assert_eq!(request.assigned_courier, Some(courier.id));
        let courier = store.courier(courier.id).await.unwrap().unwrap();
        assert_eq!(courier.availability, Availability::Busy);
    }

    #[tokio::test]
    async fn offline_courier_cannot_claim_and_nothing_changes() {
        let (store, request) = seeded().await;
        let courier = courier(&store, Availability::Offline).await;

        let err = store.assign(request.id, courier.id).await.unwrap_err();

        assert!(matches!(
            err,
            StoreError::Conflict(StoreConflict::CourierNotEligible(Availability::Offline))
        ));
        let request = store.request(request.id).await.unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Pending);
        assert!(store.list_deliveries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_request_cannot_be_claimed() {
        let (store, request) = seeded().await;
        let courier = courier(&store, Availability::Online).await;
        store.cancel_request(request.id).await.unwrap();

        let err = store.assign(request.id, courier.id).await.unwrap_err();

        assert!(matches!(
            err,
            StoreError::Conflict(StoreConflict::RequestUnavailable(RequestStatus::Cancelled))
        ));
        let courier = store.courier(courier.id).await.unwrap().unwrap();
        assert_eq!(courier.availability, Availability::Online);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_claims_produce_a_single_delivery() {
        let (store, request) = seeded().await;
        let store = Arc::new(store);
        let mut couriers = Vec::new();
        for _ in 0..16 {
            couriers.push(courier(&store, Availability::Online).await);
        }

        let mut handles = Vec::new();
        for courier in &couriers {
            let store = store.clone();
            let courier_id = courier.id;
            handles.push(tokio::spawn(async move { store.assign(request.id, courier_id).await }));
        }

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(err) => assert!(matches!(err, StoreError::Conflict(_))),
            }
        }

        assert_eq!(winners, 1);
        assert_eq!(store.list_deliveries().await.unwrap().len(), 1);
        let busy = store
            .list_couriers()
            .await
            .unwrap()
            .into_iter()
            .filter(|c| c.availability == Availability::Busy)
            .count();
        assert_eq!(busy, 1);
    }

    #[tokio::test]
    async fn closing_a_delivery_releases_the_courier_once() {
        let (store, request) = seeded().await;
        let courier = courier(&store, Availability::Online).await;
        let delivery = store.assign(request.id, courier.id).await.unwrap();

        assert!(matches!(
            store.set_availability(courier.id, Availability::Offline).await,
            Err(StoreError::Conflict(StoreConflict::CourierBusy))
        ));

        let closed = store
            .close_delivery(delivery.id, DeliveryStatus::Finished)
            .await
            .unwrap();
        assert_eq!(closed.status, DeliveryStatus::Finished);
        assert!(closed.closed_at.is_some());
        let courier_now = store.courier(courier.id).await.unwrap().unwrap();
        assert_eq!(courier_now.availability, Availability::Online);

        let again = store
            .close_delivery(delivery.id, DeliveryStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(
            again,
            StoreError::Conflict(StoreConflict::DeliveryClosed(DeliveryStatus::Finished))
        ));
    }

    #[tokio::test]
    async fn online_couriers_skips_unknown_positions() {
        let store = MemoryStore::new();
        courier(&store, Availability::Online).await;
        let blind = Courier::new("no fix".to_string(), None, Availability::Online);
        store.insert_courier(blind).await.unwrap();
        courier(&store, Availability::Busy).await;

        assert_eq!(store.online_couriers().await.unwrap().len(), 1);
    }
}
