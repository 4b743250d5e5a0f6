use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::engine::bounded_read;
use crate::error::AppError;
use crate::geo::haversine_meters;
use crate::models::courier::{Availability, Courier, GeoPoint};
use crate::store::AssignmentStore;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Candidate {
    pub courier_id: Uuid,
    pub distance_meters: f64,
}

#[derive(Clone)]
pub struct ProximityMatcher {
    store: Arc<dyn AssignmentStore>,
    timeout: Duration,
}

impl ProximityMatcher {
    pub fn new(store: Arc<dyn AssignmentStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Online couriers with a known position within `radius_meters` of
    /// `origin`, nearest first. An empty result is not an error.
    pub async fn find_candidates(
        &self,
        origin: GeoPoint,
        radius_meters: f64,
        limit: usize,
    ) -> Result<Vec<Candidate>, AppError> {
        if !(radius_meters.is_finite() && radius_meters > 0.0) {
            return Err(AppError::BadRequest("radius must be > 0".to_string()));
        }
        if limit == 0 {
            return Err(AppError::BadRequest("limit must be > 0".to_string()));
        }
        if !origin.is_valid() {
            return Err(AppError::BadRequest("origin is not a valid coordinate".to_string()));
        }

        let couriers = bounded_read(
            "courier directory",
            self.timeout,
            self.store.online_couriers(),
        )
        .await?;

        Ok(rank_candidates(&origin, &couriers, radius_meters, limit))
    }
}

/// Ties on distance are broken by courier id so rounds are reproducible.
pub fn rank_candidates(
    origin: &GeoPoint,
    couriers: &[Courier],
    radius_meters: f64,
    limit: usize,
) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = couriers
        .iter()
        .filter(|courier| courier.availability == Availability::Online)
        .filter_map(|courier| {
            let position = courier.position?;
            let distance_meters = haversine_meters(origin, &position);
            (distance_meters <= radius_meters).then_some(Candidate {
                courier_id: courier.id,
                distance_meters,
            })
        })
        .collect();

    candidates.sort_by(|a, b| {
        a.distance_meters
            .total_cmp(&b.distance_meters)
            .then_with(|| a.courier_id.cmp(&b.courier_id))
    });
    candidates.truncate(limit);
    candidates
}
