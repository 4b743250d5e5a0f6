use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::offer::{PushMessage, RequestOffer};
use crate::realtime::{ConnectionRegistry, Payload};

#[derive(Clone)]
pub struct Notifier {
    registry: Arc<ConnectionRegistry>,
}

impl Notifier {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Pushes the same offer to every candidate and returns how many channels
    /// took it. Fire-and-forget: a broken channel only costs its own courier.
    pub fn notify(&self, candidate_ids: &[Uuid], offer: &RequestOffer) -> Result<usize, AppError> {
        let json = serde_json::to_string(&PushMessage::NewRequest(offer.clone()))
            .map_err(|err| AppError::Internal(format!("failed to serialize offer: {err}")))?;
        let payload: Payload = json.into();

        let report = self.registry.broadcast_to_set(candidate_ids, &payload);
        debug!(
            request_id = %offer.request_id,
            reached = report.reached,
            failed = report.failed,
            unconnected = report.unconnected,
            "offer fanned out"
        );

        Ok(report.reached)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::Value;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::Notifier;
    use crate::models::courier::GeoPoint;
    use crate::models::offer::{RequestOffer, RequesterProfile};
    use crate::models::request::Address;
    use crate::realtime::ConnectionRegistry;

    fn offer() -> RequestOffer {
        RequestOffer {
            request_id: Uuid::new_v4(),
            courier_fee_cents: 700,
            distance_km: 2.1,
            carries_item: true,
            requires_return: false,
            notes: None,
            destination: GeoPoint {
                lat: -18.6,
                lng: -46.5,
            },
            destination_address: Address::default(),
            requester: RequesterProfile {
                id: Uuid::new_v4(),
                name: "Mercado Sol".to_string(),
                phone: "34 3821-1111".to_string(),
                address: Address::default(),
                position: GeoPoint {
                    lat: -18.588,
                    lng: -46.517,
                },
            },
        }
    }

    #[tokio::test]
    async fn broken_channel_does_not_stop_the_round() {
        let registry = Arc::new(ConnectionRegistry::new(8));
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let (_a_reg, mut a_rx) = registry.connect(a);
        let (broken_tx, broken_rx) = mpsc::channel(8);
        registry.register(b, broken_tx);
        drop(broken_rx);
        let (_c_reg, mut c_rx) = registry.connect(c);

        let offer = offer();
        let reached = Notifier::new(registry).notify(&[a, b, c], &offer).unwrap();

        assert_eq!(reached, 2);
        for rx in [&mut a_rx, &mut c_rx] {
            let message: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
            assert_eq!(message["type"], "new_request");
            assert_eq!(message["data"]["request_id"], offer.request_id.to_string());
        }
    }

    #[test]
    fn unconnected_candidates_are_skipped() {
        let registry = Arc::new(ConnectionRegistry::new(8));
        let reached = Notifier::new(registry)
            .notify(&[Uuid::new_v4(), Uuid::new_v4()], &offer())
            .unwrap();
        assert_eq!(reached, 0);
    }
}
