use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::DispatchSettings;
use crate::engine::coordinator::DispatchCoordinator;
use crate::engine::queue::RequestCreated;
use crate::observability::metrics::Metrics;
use crate::realtime::{ConnectionRegistry, TokenTable};
use crate::store::{AssignmentStore, MemoryStore};

pub struct AppState {
    pub store: Arc<dyn AssignmentStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub tokens: Arc<TokenTable>,
    pub coordinator: DispatchCoordinator,
    pub event_tx: mpsc::Sender<RequestCreated>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(
        store: Arc<dyn AssignmentStore>,
        settings: DispatchSettings,
        event_queue_size: usize,
        channel_buffer_size: usize,
    ) -> (Self, mpsc::Receiver<RequestCreated>) {
        let (event_tx, event_rx) = mpsc::channel(event_queue_size.max(1));
        let registry = Arc::new(ConnectionRegistry::new(channel_buffer_size));
        let metrics = Metrics::new();
        let coordinator =
            DispatchCoordinator::new(store.clone(), registry.clone(), metrics.clone(), settings);

        (
            Self {
                store,
                registry,
                tokens: Arc::new(TokenTable::new()),
                coordinator,
                event_tx,
                metrics,
            },
            event_rx,
        )
    }

    pub fn in_memory(settings: DispatchSettings) -> (Self, mpsc::Receiver<RequestCreated>) {
        Self::new(Arc::new(MemoryStore::new()), settings, 1024, 32)
    }
}
