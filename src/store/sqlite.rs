use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::courier::{Availability, Courier, GeoPoint};
use crate::models::delivery::{Delivery, DeliveryStatus};
use crate::models::request::{DeliveryRequest, RequestStatus, Requester};
use crate::store::schema;
use crate::store::{AssignmentStore, StoreConflict, StoreCounts, StoreError, StoreResult};

/// sqlx-backed store. Conditional transitions are compare-and-swap
/// `UPDATE ... WHERE status = ...` statements; the one that touches two
/// records runs inside a transaction whose first statement is a write, so
/// the write lock is taken before anything is read.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// `timeout` bounds both pool acquisition and waiting on sqlite's write lock.
    pub async fn connect(url: &str, max_connections: u32, timeout: Duration) -> StoreResult<Self> {
        if url.contains(":memory:") {
            return Self::in_memory().await;
        }

        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(timeout)
            .connect_with(options)
            .await?;

        schema::migrate(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn in_memory() -> StoreResult<Self> {
        // Every connection to :memory: opens a separate database, so the pool
        // is pinned to a single connection that never expires.
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        schema::migrate(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl AssignmentStore for SqliteStore {
    async fn insert_requester(&self, requester: Requester) -> StoreResult<()> {
        sqlx::query(
            r#"
INSERT INTO requesters (id, name, phone, address, lat, lng)
VALUES (?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(requester.id.to_string())
        .bind(&requester.name)
        .bind(&requester.phone)
        .bind(to_json(&requester.address)?)
        .bind(requester.position.map(|p| p.lat))
        .bind(requester.position.map(|p| p.lng))
        .execute(&self.pool)
        .await
        .map_err(|err| insert_error(err, "requester", requester.id))?;

        Ok(())
    }

    async fn requester(&self, id: Uuid) -> StoreResult<Option<Requester>> {
        let row = sqlx::query("SELECT * FROM requesters WHERE id = ?;")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_requester).transpose()
    }

    async fn insert_courier(&self, courier: Courier) -> StoreResult<()> {
        sqlx::query(
            r#"
INSERT INTO couriers (id, name, lat, lng, availability, position_updated_at, updated_at)
VALUES (?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(courier.id.to_string())
        .bind(&courier.name)
        .bind(courier.position.map(|p| p.lat))
        .bind(courier.position.map(|p| p.lng))
        .bind(courier.availability.as_str())
        .bind(courier.position_updated_at)
        .bind(courier.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|err| insert_error(err, "courier", courier.id))?;

        Ok(())
    }

    async fn courier(&self, id: Uuid) -> StoreResult<Option<Courier>> {
        let row = sqlx::query("SELECT * FROM couriers WHERE id = ?;")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_courier).transpose()
    }

    async fn list_couriers(&self) -> StoreResult<Vec<Courier>> {
        let rows = sqlx::query("SELECT * FROM couriers;")
            .fetch_all(&self.pool)
            .await?;

        Ok(skip_malformed(&rows, row_to_courier))
    }

    async fn online_couriers(&self) -> StoreResult<Vec<Courier>> {
        let rows = sqlx::query(
            r#"
SELECT * FROM couriers
WHERE availability = 'online' AND lat IS NOT NULL AND lng IS NOT NULL;
"#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(skip_malformed(&rows, row_to_courier))
    }

    async fn set_availability(&self, id: Uuid, availability: Availability) -> StoreResult<Courier> {
        let row = sqlx::query(
            r#"
UPDATE couriers SET availability = ?, updated_at = ?
WHERE id = ? AND availability != 'busy'
RETURNING *;
"#,
        )
        .bind(availability.as_str())
        .bind(Utc::now())
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_courier(&row),
            None if self.courier(id).await?.is_some() => Err(StoreConflict::CourierBusy.into()),
            None => Err(StoreError::not_found("courier", id)),
        }
    }

    async fn report_position(
        &self,
        id: Uuid,
        position: GeoPoint,
        at: DateTime<Utc>,
    ) -> StoreResult<Courier> {
        let row = sqlx::query(
            r#"
UPDATE couriers SET lat = ?, lng = ?, position_updated_at = ?, updated_at = ?
WHERE id = ?
RETURNING *;
"#,
        )
        .bind(position.lat)
        .bind(position.lng)
        .bind(at)
        .bind(Utc::now())
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_courier(&row),
            None => Err(StoreError::not_found("courier", id)),
        }
    }

    async fn insert_request(&self, request: DeliveryRequest) -> StoreResult<()> {
        if self.requester(request.requester_id).await?.is_none() {
            return Err(StoreError::not_found("requester", request.requester_id));
        }

        sqlx::query(
            r#"
INSERT INTO requests (
  id, requester_id, origin_lat, origin_lng, destination_lat, destination_lng,
  destination_address, distance_km, courier_fee_cents, carries_item, requires_return,
  notes, status, assigned_courier, created_at
)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(request.id.to_string())
        .bind(request.requester_id.to_string())
        .bind(request.origin.lat)
        .bind(request.origin.lng)
        .bind(request.destination.lat)
        .bind(request.destination.lng)
        .bind(to_json(&request.destination_address)?)
        .bind(request.distance_km)
        .bind(request.courier_fee_cents)
        .bind(request.carries_item)
        .bind(request.requires_return)
        .bind(&request.notes)
        .bind(request.status.as_str())
        .bind(request.assigned_courier.map(|id| id.to_string()))
        .bind(request.created_at)
        .execute(&self.pool)
        .await
        .map_err(|err| insert_error(err, "request", request.id))?;

        Ok(())
    }

    async fn request(&self, id: Uuid) -> StoreResult<Option<DeliveryRequest>> {
        let row = sqlx::query("SELECT * FROM requests WHERE id = ?;")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_request).transpose()
    }

    async fn cancel_request(&self, id: Uuid) -> StoreResult<DeliveryRequest> {
        let row = sqlx::query(
            r#"
UPDATE requests SET status = 'cancelled'
WHERE id = ? AND status = 'pending'
RETURNING *;
"#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_request(&row),
            None => match self.request(id).await? {
                Some(request) => Err(StoreConflict::RequestUnavailable(request.status).into()),
                None => Err(StoreError::not_found("request", id)),
            },
        }
    }

    async fn assign(&self, request_id: Uuid, courier_id: Uuid) -> StoreResult<Delivery> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let engaged = sqlx::query(
            r#"
UPDATE couriers SET availability = 'busy', updated_at = ?
WHERE id = ? AND availability = 'online';
"#,
        )
        .bind(now)
        .bind(courier_id.to_string())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if engaged == 0 {
            let err = explain_unclaimed(&mut tx, request_id, courier_id).await?;
            tx.rollback().await?;
            return Err(err);
        }

        let fee: Option<i64> = sqlx::query_scalar(
            r#"
UPDATE requests SET status = 'assigned', assigned_courier = ?
WHERE id = ? AND status = 'pending'
RETURNING courier_fee_cents;
"#,
        )
        .bind(courier_id.to_string())
        .bind(request_id.to_string())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(fee) = fee else {
            let err = explain_unclaimed(&mut tx, request_id, courier_id).await?;
            tx.rollback().await?;
            return Err(err);
        };

        let delivery = Delivery::start(request_id, courier_id, fee);
        sqlx::query(
            r#"
INSERT INTO deliveries (id, request_id, courier_id, status, value_cents, created_at, closed_at)
VALUES (?, ?, ?, ?, ?, ?, NULL);
"#,
        )
        .bind(delivery.id.to_string())
        .bind(request_id.to_string())
        .bind(courier_id.to_string())
        .bind(delivery.status.as_str())
        .bind(delivery.value_cents)
        .bind(delivery.created_at)
        .execute(&mut *tx)
        .await?;

        // An early return through `?` drops `tx`, which rolls it back.
        tx.commit().await?;
        Ok(delivery)
    }

    async fn close_delivery(&self, id: Uuid, outcome: DeliveryStatus) -> StoreResult<Delivery> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let courier_id: Option<String> = sqlx::query_scalar(
            r#"
UPDATE deliveries SET status = ?, closed_at = ?
WHERE id = ? AND status = 'in_progress'
RETURNING courier_id;
"#,
        )
        .bind(outcome.as_str())
        .bind(now)
        .bind(id.to_string())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(courier_id) = courier_id else {
            let status: Option<String> =
                sqlx::query_scalar("SELECT status FROM deliveries WHERE id = ?;")
                    .bind(id.to_string())
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;
            return match status {
                Some(raw) => Err(StoreConflict::DeliveryClosed(parse_col(&raw)?).into()),
                None => Err(StoreError::not_found("delivery", id)),
            };
        };

        sqlx::query("UPDATE couriers SET availability = 'online', updated_at = ? WHERE id = ?;")
            .bind(now)
            .bind(&courier_id)
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query("SELECT * FROM deliveries WHERE id = ?;")
            .bind(id.to_string())
            .fetch_one(&mut *tx)
            .await?;
        let delivery = row_to_delivery(&row)?;

        tx.commit().await?;
        Ok(delivery)
    }

    async fn delivery(&self, id: Uuid) -> StoreResult<Option<Delivery>> {
        let row = sqlx::query("SELECT * FROM deliveries WHERE id = ?;")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_delivery).transpose()
    }

    async fn list_deliveries(&self) -> StoreResult<Vec<Delivery>> {
        let rows = sqlx::query("SELECT * FROM deliveries ORDER BY created_at;")
            .fetch_all(&self.pool)
            .await?;

        Ok(skip_malformed(&rows, row_to_delivery))
    }

    async fn counts(&self) -> StoreResult<StoreCounts> {
        let row = sqlx::query(
            r#"
SELECT
  (SELECT COUNT(*) FROM requesters) AS requesters,
  (SELECT COUNT(*) FROM couriers) AS couriers,
  (SELECT COUNT(*) FROM requests) AS requests,
  (SELECT COUNT(*) FROM deliveries) AS deliveries;
"#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreCounts {
            requesters: count_col(&row, "requesters")?,
            couriers: count_col(&row, "couriers")?,
            requests: count_col(&row, "requests")?,
            deliveries: count_col(&row, "deliveries")?,
        })
    }
}

/// Works out why an assignment CAS matched no row. The request is checked
/// first so a taken request reads as "already assigned" regardless of the
/// caller's own state.
async fn explain_unclaimed(
    conn: &mut SqliteConnection,
    request_id: Uuid,
    courier_id: Uuid,
) -> StoreResult<StoreError> {
    let status: Option<String> = sqlx::query_scalar("SELECT status FROM requests WHERE id = ?;")
        .bind(request_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    match status {
        None => return Ok(StoreError::not_found("request", request_id)),
        Some(raw) => {
            let status: RequestStatus = parse_col(&raw)?;
            if status != RequestStatus::Pending {
                return Ok(StoreConflict::RequestUnavailable(status).into());
            }
        }
    }

    let availability: Option<String> =
        sqlx::query_scalar("SELECT availability FROM couriers WHERE id = ?;")
            .bind(courier_id.to_string())
            .fetch_optional(&mut *conn)
            .await?;

    match availability {
        None => Ok(StoreError::not_found("courier", courier_id)),
        Some(raw) => Ok(StoreConflict::CourierNotEligible(parse_col(&raw)?).into()),
    }
}

/* =========================
Row mapping
========================= */

fn row_to_requester(r: &SqliteRow) -> StoreResult<Requester> {
    Ok(Requester {
        id: uuid_col(r, "id")?,
        name: r.try_get("name")?,
        phone: r.try_get("phone")?,
        address: json_col(r, "address")?,
        position: position(r.try_get("lat")?, r.try_get("lng")?),
    })
}

fn row_to_courier(r: &SqliteRow) -> StoreResult<Courier> {
    Ok(Courier {
        id: uuid_col(r, "id")?,
        name: r.try_get("name")?,
        position: position(r.try_get("lat")?, r.try_get("lng")?),
        availability: parse_col(&r.try_get::<String, _>("availability")?)?,
        position_updated_at: r.try_get("position_updated_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}

fn row_to_request(r: &SqliteRow) -> StoreResult<DeliveryRequest> {
    let assigned: Option<String> = r.try_get("assigned_courier")?;

    Ok(DeliveryRequest {
        id: uuid_col(r, "id")?,
        requester_id: uuid_col(r, "requester_id")?,
        origin: GeoPoint {
            lat: r.try_get("origin_lat")?,
            lng: r.try_get("origin_lng")?,
        },
        destination: GeoPoint {
            lat: r.try_get("destination_lat")?,
            lng: r.try_get("destination_lng")?,
        },
        destination_address: json_col(r, "destination_address")?,
        distance_km: r.try_get("distance_km")?,
        courier_fee_cents: r.try_get("courier_fee_cents")?,
        carries_item: r.try_get("carries_item")?,
        requires_return: r.try_get("requires_return")?,
        notes: r.try_get("notes")?,
        status: parse_col(&r.try_get::<String, _>("status")?)?,
        assigned_courier: assigned.as_deref().map(parse_uuid).transpose()?,
        created_at: r.try_get("created_at")?,
    })
}

fn row_to_delivery(r: &SqliteRow) -> StoreResult<Delivery> {
    Ok(Delivery {
        id: uuid_col(r, "id")?,
        request_id: uuid_col(r, "request_id")?,
        courier_id: uuid_col(r, "courier_id")?,
        status: parse_col(&r.try_get::<String, _>("status")?)?,
        value_cents: r.try_get("value_cents")?,
        created_at: r.try_get("created_at")?,
        closed_at: r.try_get("closed_at")?,
    })
}

fn skip_malformed<T>(rows: &[SqliteRow], map: fn(&SqliteRow) -> StoreResult<T>) -> Vec<T> {
    rows.iter()
        .filter_map(|row| match map(row) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(error = %err, "skipping malformed row");
                None
            }
        })
        .collect()
}

fn position(lat: Option<f64>, lng: Option<f64>) -> Option<GeoPoint> {
    match (lat, lng) {
        (Some(lat), Some(lng)) => Some(GeoPoint { lat, lng }),
        _ => None,
    }
}

fn parse_uuid(raw: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(raw).map_err(|err| StoreError::Corrupt(format!("invalid uuid {raw:?}: {err}")))
}

fn uuid_col(r: &SqliteRow, column: &str) -> StoreResult<Uuid> {
    parse_uuid(&r.try_get::<String, _>(column)?)
}

fn parse_col<T>(raw: &str) -> StoreResult<T>
where
    T: FromStr<Err = String>,
{
    raw.parse().map_err(StoreError::Corrupt)
}

fn json_col<T: DeserializeOwned>(r: &SqliteRow, column: &str) -> StoreResult<T> {
    let raw: String = r.try_get(column)?;
    serde_json::from_str(&raw).map_err(|err| StoreError::Corrupt(format!("{column}: {err}")))
}

fn to_json<T: Serialize>(value: &T) -> StoreResult<String> {
    serde_json::to_string(value).map_err(|err| StoreError::Corrupt(err.to_string()))
}

fn count_col(r: &SqliteRow, column: &str) -> StoreResult<usize> {
    let count: i64 = r.try_get(column)?;
    usize::try_from(count).map_err(|err| StoreError::Corrupt(format!("{column}: {err}")))
}

fn insert_error(err: sqlx::Error, entity: &'static str, id: Uuid) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate { entity, id },
        _ => StoreError::Database(err),
    }
}
