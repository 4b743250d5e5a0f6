use crate::models::courier::GeoPoint;

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Great-circle distance on a spherical Earth. Candidate radii are in meters,
/// so this is the primary unit.
pub fn haversine_meters(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let (phi_a, phi_b) = (a.lat.to_radians(), b.lat.to_radians());
    let half_d_phi = (phi_b - phi_a) / 2.0;
    let half_d_lambda = (b.lng - a.lng).to_radians() / 2.0;

    let h = half_d_phi.sin().powi(2) + phi_a.cos() * phi_b.cos() * half_d_lambda.sin().powi(2);

    // Rounding can push `h` a hair past 1.0 for antipodal points.
    2.0 * EARTH_RADIUS_METERS * h.min(1.0).sqrt().asin()
}

/// Trip distance stored on a request.
pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    haversine_meters(a, b) / 1_000.0
}
