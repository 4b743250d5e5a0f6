use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

/// Serialized message, shared by every channel it fans out to.
pub type Payload = Arc<str>;

pub type ConnectionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The courier has no live channel on this instance.
    NoConnection,
    /// `failed` channels were closed or full; closed ones have been dropped.
    Delivered { reached: usize, failed: usize },
}

impl SendOutcome {
    pub fn reached(&self) -> usize {
        match self {
            SendOutcome::NoConnection => 0,
            SendOutcome::Delivered { reached, .. } => *reached,
        }
    }
}

/// Totals of one [`ConnectionRegistry::broadcast_to_set`] call, in channels
/// except `unconnected`, which counts couriers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub reached: usize,
    pub failed: usize,
    pub unconnected: usize,
}

struct Channel {
    id: ConnectionId,
    tx: mpsc::Sender<Payload>,
}

/// Live courier channels for this process. A courier may hold several
/// channels at once (one per device) and every send fans out to all of them.
pub struct ConnectionRegistry {
    channels: DashMap<Uuid, Vec<Channel>>,
    next_id: AtomicU64,
    buffer_size: usize,
}

impl ConnectionRegistry {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            channels: DashMap::new(),
            next_id: AtomicU64::new(1),
            buffer_size: buffer_size.max(1),
        }
    }

    pub fn register(&self, courier_id: Uuid, tx: mpsc::Sender<Payload>) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.channels
            .entry(courier_id)
            .or_default()
            .push(Channel { id, tx });
        debug!(%courier_id, connection_id = id, "channel registered");
        id
    }

    pub fn unregister(&self, courier_id: Uuid, connection_id: ConnectionId) {
        if let Some(mut channels) = self.channels.get_mut(&courier_id) {
            channels.retain(|channel| channel.id != connection_id);
        }
        self.channels
            .remove_if(&courier_id, |_, channels| channels.is_empty());
        debug!(%courier_id, connection_id, "channel unregistered");
    }

    /// Opens a channel for `courier_id`. Dropping the returned
    /// [`Registration`] removes it again.
    pub fn connect(self: &Arc<Self>, courier_id: Uuid) -> (Registration, mpsc::Receiver<Payload>) {
        let (tx, rx) = mpsc::channel(self.buffer_size);
        let connection_id = self.register(courier_id, tx);
        let registration = Registration {
            registry: Arc::clone(self),
            courier_id,
            connection_id,
        };
        (registration, rx)
    }

    /// Drops every channel of a courier; their receivers observe closure.
    pub fn disconnect_courier(&self, courier_id: Uuid) -> usize {
        self.channels
            .remove(&courier_id)
            .map(|(_, channels)| channels.len())
            .unwrap_or(0)
    }

    pub fn send(&self, courier_id: Uuid, payload: &Payload) -> SendOutcome {
        let outcome = {
            let Some(mut channels) = self.channels.get_mut(&courier_id) else {
                return SendOutcome::NoConnection;
            };

            let mut reached = 0;
            let mut failed = 0;
            channels.retain(|channel| match channel.tx.try_send(Arc::clone(payload)) {
                Ok(()) => {
                    reached += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    failed += 1;
                    warn!(%courier_id, connection_id = channel.id, "channel buffer full; message dropped");
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    failed += 1;
                    debug!(%courier_id, connection_id = channel.id, "pruning closed channel");
                    false
                }
            });

            if reached == 0 && failed == 0 {
                SendOutcome::NoConnection
            } else {
                SendOutcome::Delivered { reached, failed }
            }
        };

        self.channels
            .remove_if(&courier_id, |_, channels| channels.is_empty());
        outcome
    }

    /// Sends `payload` to every courier of the set. One courier's broken
    /// channel never stops the others.
    pub fn broadcast_to_set(&self, courier_ids: &[Uuid], payload: &Payload) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for &courier_id in courier_ids {
            match self.send(courier_id, payload) {
                SendOutcome::NoConnection => {
                    debug!(%courier_id, "candidate has no live channel");
                    report.unconnected += 1;
                }
                SendOutcome::Delivered { reached, failed } => {
                    if failed > 0 {
                        debug!(%courier_id, failed, "payload not delivered to some channels");
                    }
                    report.reached += reached;
                    report.failed += failed;
                }
            }
        }
        report
    }

    pub fn is_connected(&self, courier_id: Uuid) -> bool {
        self.channels.contains_key(&courier_id)
    }

    pub fn connection_count(&self) -> usize {
        self.channels.iter().map(|entry| entry.value().len()).sum()
    }
}

/// Keeps a channel registered for as long as it lives.
pub struct Registration {
    registry: Arc<ConnectionRegistry>,
    courier_id: Uuid,
    connection_id: ConnectionId,
}

impl Registration {
    pub fn courier_id(&self) -> Uuid {
        self.courier_id
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(self.courier_id, self.connection_id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::{BroadcastReport, ConnectionRegistry, Payload, SendOutcome};

    fn payload(text: &str) -> Payload {
        Arc::from(text)
    }

    #[tokio::test]
    async fn send_fans_out_to_every_device() {
        let registry = Arc::new(ConnectionRegistry::new(4));
        let courier = Uuid::new_v4();
        let (_phone, mut phone_rx) = registry.connect(courier);
        let (_tablet, mut tablet_rx) = registry.connect(courier);

        let outcome = registry.send(courier, &payload("hello"));

        assert_eq!(outcome, SendOutcome::Delivered { reached: 2, failed: 0 });
        assert_eq!(&*phone_rx.recv().await.unwrap(), "hello");
        assert_eq!(&*tablet_rx.recv().await.unwrap(), "hello");
    }

    #[test]
    fn unknown_courier_has_no_connection() {
        let registry = ConnectionRegistry::new(4);
        assert_eq!(registry.send(Uuid::new_v4(), &payload("x")), SendOutcome::NoConnection);
    }

    #[test]
    fn dropping_registration_leaves_no_entry() {
        let registry = Arc::new(ConnectionRegistry::new(4));
        let courier = Uuid::new_v4();
        let (registration, _rx) = registry.connect(courier);
        assert!(registry.is_connected(courier));

        drop(registration);

        assert!(!registry.is_connected(courier));
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn closed_receivers_are_pruned_on_send() {
        let registry = ConnectionRegistry::new(4);
        let courier = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(4);
        registry.register(courier, tx);
        drop(rx);

        let outcome = registry.send(courier, &payload("x"));

        assert_eq!(outcome, SendOutcome::Delivered { reached: 0, failed: 1 });
        assert!(!registry.is_connected(courier));
    }

    #[test]
    fn full_buffer_counts_as_failure_but_keeps_channel() {
        let registry = ConnectionRegistry::new(1);
        let courier = Uuid::new_v4();
        let (tx, _rx) = mpsc::channel(1);
        registry.register(courier, tx);

        assert_eq!(registry.send(courier, &payload("a")).reached(), 1);
        assert_eq!(
            registry.send(courier, &payload("b")),
            SendOutcome::Delivered { reached: 0, failed: 1 }
        );
        assert!(registry.is_connected(courier));
    }

    #[tokio::test]
    async fn disconnect_courier_closes_all_receivers() {
        let registry = Arc::new(ConnectionRegistry::new(4));
        let courier = Uuid::new_v4();
        let (_a, mut rx_a) = registry.connect(courier);
        let (_b, mut rx_b) = registry.connect(courier);

        assert_eq!(registry.disconnect_courier(courier), 2);
        assert!(rx_a.recv().await.is_none());
        assert!(rx_b.recv().await.is_none());
    }

    #[test]
    fn broadcast_reports_each_kind_of_outcome() {
        let registry = Arc::new(ConnectionRegistry::new(4));
        let online = Uuid::new_v4();
        let absent = Uuid::new_v4();
        let gone = Uuid::new_v4();
        let (_phone, _phone_rx) = registry.connect(online);
        let (_tablet, _tablet_rx) = registry.connect(online);
        let (tx, rx) = mpsc::channel(4);
        registry.register(gone, tx);
        drop(rx);

        let report = registry.broadcast_to_set(&[online, absent, gone], &payload("x"));

        assert_eq!(
            report,
            BroadcastReport {
                reached: 2,
                failed: 1,
                unconnected: 1
            }
        );
        assert!(!registry.is_connected(gone));
    }
}
