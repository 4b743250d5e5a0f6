use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use courier_dispatch::api::rest::router;
use courier_dispatch::config::DispatchSettings;
use courier_dispatch::engine::coordinator::run_dispatch_loop;
use courier_dispatch::engine::queue::publish_request_created;
use courier_dispatch::models::courier::{Availability, Courier, GeoPoint};
use courier_dispatch::models::request::{Address, DeliveryRequest, NewDeliveryRequest, Requester};
use courier_dispatch::state::AppState;
use futures::StreamExt;
use serde_json::Value;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

const PICKUP: GeoPoint = GeoPoint {
    lat: -18.588,
    lng: -46.517,
};

async fn spawn_server() -> (SocketAddr, Arc<AppState>) {
    let (state, events) = AppState::in_memory(DispatchSettings::default());
    let state = Arc::new(state);
    tokio::spawn(run_dispatch_loop(state.coordinator.clone(), events));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

async fn online_courier(state: &AppState) -> (Courier, String) {
    let position = GeoPoint {
        lat: PICKUP.lat + 0.01,
        lng: PICKUP.lng,
    };
    let courier = Courier::new("Kaio".to_string(), Some(position), Availability::Online);
    state.store.insert_courier(courier.clone()).await.unwrap();
    let token = state.tokens.issue(courier.id);
    (courier, token)
}

async fn wait_until_connected(state: &AppState, courier_id: Uuid) {
    for _ in 0..50 {
        if state.registry.is_connected(courier_id) {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("courier {courier_id} never registered");
}

#[tokio::test]
async fn connected_courier_receives_offer() {
    let (addr, state) = spawn_server().await;
    let (courier, token) = online_courier(&state).await;

    let (mut socket, _) = connect_async(format!("ws://{addr}/ws?token={token}"))
        .await
        .unwrap();
    wait_until_connected(&state, courier.id).await;

    let requester = Requester {
        id: Uuid::new_v4(),
        name: "Acougue Sao Jose".to_string(),
        phone: "3438145566".to_string(),
        address: Address::default(),
        position: Some(PICKUP),
    };
    state.store.insert_requester(requester.clone()).await.unwrap();
    let request = DeliveryRequest::pending(NewDeliveryRequest {
        requester_id: requester.id,
        origin: PICKUP,
        destination: GeoPoint {
            lat: -18.61,
            lng: -46.52,
        },
        destination_address: Address::default(),
        courier_fee_cents: 1100,
        carries_item: false,
        requires_return: false,
        notes: Some("portao azul".to_string()),
    });
    state.store.insert_request(request.clone()).await.unwrap();
    publish_request_created(&state, request.id).await.unwrap();

    let message = timeout(Duration::from_secs(5), socket.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let Message::Text(text) = message else {
        panic!("expected a text frame, got {message:?}");
    };
    let offer: Value = serde_json::from_str(&text).unwrap();

    assert_eq!(offer["type"], "new_request");
    assert_eq!(offer["data"]["request_id"], request.id.to_string());
    assert_eq!(offer["data"]["notes"], "portao azul");
    assert_eq!(offer["data"]["requester"]["name"], "Acougue Sao Jose");
    assert_eq!(state.metrics.live_connections.get(), 1);
}

#[tokio::test]
async fn unknown_token_is_refused() {
    let (addr, _state) = spawn_server().await;

    let result = connect_async(format!("ws://{addr}/ws?token=nope")).await;

    assert!(result.is_err());
}

#[tokio::test]
async fn logout_closes_the_socket() {
    let (addr, state) = spawn_server().await;
    let (courier, token) = online_courier(&state).await;

    let (mut socket, _) = connect_async(format!("ws://{addr}/ws?token={token}"))
        .await
        .unwrap();
    wait_until_connected(&state, courier.id).await;

    assert_eq!(state.registry.disconnect_courier(courier.id), 1);

    let next = timeout(Duration::from_secs(5), socket.next()).await.unwrap();
    assert!(matches!(next, None | Some(Ok(Message::Close(_))) | Some(Err(_))));
}
