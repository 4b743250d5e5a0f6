use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::DispatchSettings;
use crate::engine::bounded_read;
use crate::engine::matcher::ProximityMatcher;
use crate::engine::notifier::Notifier;
use crate::engine::queue::RequestCreated;
use crate::error::AppError;
use crate::models::delivery::{Delivery, DeliveryStatus};
use crate::models::offer::RequestOffer;
use crate::models::request::{DeliveryRequest, RequestStatus};
use crate::observability::metrics::Metrics;
use crate::realtime::ConnectionRegistry;
use crate::store::{AssignmentStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Notified { candidates: usize, reached: usize },
    /// Terminal for the round; nothing re-queues the request.
    NoCandidates,
    /// The request already left pending, typically a redelivered event.
    Skipped(RequestStatus),
}

impl DispatchOutcome {
    fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Notified { .. } => "notified",
            DispatchOutcome::NoCandidates => "no_candidates",
            DispatchOutcome::Skipped(_) => "skipped",
        }
    }
}

#[derive(Clone)]
pub struct DispatchCoordinator {
    store: Arc<dyn AssignmentStore>,
    matcher: ProximityMatcher,
    notifier: Notifier,
    metrics: Metrics,
    settings: DispatchSettings,
}

impl DispatchCoordinator {
    pub fn new(
        store: Arc<dyn AssignmentStore>,
        registry: Arc<ConnectionRegistry>,
        metrics: Metrics,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            matcher: ProximityMatcher::new(store.clone(), settings.store_timeout),
            notifier: Notifier::new(registry),
            store,
            metrics,
            settings,
        }
    }

    /// One dispatch round as driven by the event loop: errors are logged and
    /// counted here because nobody is waiting on the result.
    #[instrument(skip_all, fields(request_id = %request_id))]
    pub async fn dispatch(&self, request_id: Uuid) -> Option<DispatchOutcome> {
        match self.on_request_created(request_id).await {
            Ok(outcome) => {
                self.metrics
                    .dispatch_rounds_total
                    .with_label_values(&[outcome.label()])
                    .inc();
                Some(outcome)
            }
            Err(err) => {
                self.metrics
                    .dispatch_rounds_total
                    .with_label_values(&["error"])
                    .inc();
                error!(error = %err, "dispatch round abandoned");
                None
            }
        }
    }

    /// Match-then-notify for a freshly created request. Never writes to the
    /// request or any courier, so replaying it is harmless.
    pub async fn on_request_created(&self, request_id: Uuid) -> Result<DispatchOutcome, AppError> {
        let timeout = self.settings.store_timeout;

        let request = bounded_read("request lookup", timeout, self.store.request(request_id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("request {request_id} not found")))?;

        if request.status != RequestStatus::Pending {
            info!(status = %request.status, "request no longer pending; skipping round");
            return Ok(DispatchOutcome::Skipped(request.status));
        }

        let requester = bounded_read(
            "requester lookup",
            timeout,
            self.store.requester(request.requester_id),
        )
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!("requester {} not found", request.requester_id))
        })?;

        let Some(requester_position) = requester.position else {
            return Err(AppError::UpstreamUnavailable(format!(
                "requester {} has no coordinates",
                requester.id
            )));
        };

        let candidates = self
            .matcher
            .find_candidates(
                request.origin,
                self.settings.radius_meters,
                self.settings.candidate_limit,
            )
            .await?;

        if candidates.is_empty() {
            warn!(
                radius_meters = self.settings.radius_meters,
                "no eligible couriers near pickup"
            );
            return Ok(DispatchOutcome::NoCandidates);
        }

        let courier_ids: Vec<Uuid> = candidates.iter().map(|c| c.courier_id).collect();
        let offer = RequestOffer::new(&request, &requester, requester_position);
        let reached = self.notifier.notify(&courier_ids, &offer)?;
        self.metrics.offers_pushed_total.inc_by(reached as u64);

        info!(
            candidates = courier_ids.len(),
            reached,
            nearest_meters = candidates[0].distance_meters,
            "offer pushed to candidates"
        );

        if let Some(ttl) = self.settings.offer_ttl {
            self.schedule_expiry(request_id, ttl);
        }

        Ok(DispatchOutcome::Notified {
            candidates: courier_ids.len(),
            reached,
        })
    }

    /// The assignment transaction. Conflict and NotFound are returned as-is;
    /// any other store failure becomes a `SystemFault` with a correlation id.
    pub async fn accept_request(&self, request_id: Uuid, courier_id: Uuid) -> Result<Delivery, AppError> {
        let start = Instant::now();
        let result = self.store.assign(request_id, courier_id).await;
        let elapsed = start.elapsed().as_secs_f64();

        match result {
            Ok(delivery) => {
                self.metrics.record_accept("success", elapsed);
                info!(
                    %request_id,
                    %courier_id,
                    delivery_id = %delivery.id,
                    value_cents = delivery.value_cents,
                    "request assigned"
                );
                Ok(delivery)
            }
            Err(StoreError::Conflict(conflict)) => {
                self.metrics.record_accept("conflict", elapsed);
                info!(%request_id, %courier_id, reason = %conflict, "accept rejected");
                Err(conflict.into())
            }
            Err(err @ StoreError::NotFound { .. }) => {
                self.metrics.record_accept("not_found", elapsed);
                info!(%request_id, %courier_id, error = %err, "accept for unknown record");
                Err(err.into())
            }
            Err(err) => {
                self.metrics.record_accept("fault", elapsed);
                let correlation_id = Uuid::new_v4();
                error!(
                    %correlation_id,
                    %request_id,
                    %courier_id,
                    error = %err,
                    "assignment transaction failed and was rolled back"
                );
                Err(AppError::SystemFault { correlation_id })
            }
        }
    }

    pub async fn cancel_request(&self, request_id: Uuid) -> Result<DeliveryRequest, AppError> {
        let request = self.store.cancel_request(request_id).await?;
        info!(%request_id, "request cancelled");
        Ok(request)
    }

    pub async fn close_delivery(
        &self,
        delivery_id: Uuid,
        outcome: DeliveryStatus,
    ) -> Result<Delivery, AppError> {
        if !outcome.is_terminal() {
            return Err(AppError::BadRequest(format!(
                "{outcome} is not a closing status"
            )));
        }

        let delivery = self.store.close_delivery(delivery_id, outcome).await?;
        info!(
            %delivery_id,
            courier_id = %delivery.courier_id,
            status = %delivery.status,
            "delivery closed; courier back online"
        );
        Ok(delivery)
    }

    fn schedule_expiry(&self, request_id: Uuid, ttl: Duration) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            sleep(ttl).await;
            match store.cancel_request(request_id).await {
                Ok(_) => info!(%request_id, "offer window elapsed; request cancelled"),
                Err(StoreError::Conflict(_)) => {
                    debug!(%request_id, "offer window elapsed after request left pending")
                }
                Err(err) => warn!(%request_id, error = %err, "failed to expire request"),
            }
        });
    }
}

pub async fn run_dispatch_loop(
    coordinator: DispatchCoordinator,
    mut events: mpsc::Receiver<RequestCreated>,
) {
    info!("dispatch loop started");

    while let Some(event) = events.recv().await {
        coordinator.metrics.events_in_queue.dec();

        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            coordinator.dispatch(event.request_id).await;
        });
    }

    warn!("dispatch loop stopped: event queue closed");
}
