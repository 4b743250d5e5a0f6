use sqlx::SqlitePool;

pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS requesters (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  phone TEXT NOT NULL,
  address TEXT NOT NULL,
  lat REAL,
  lng REAL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS couriers (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  lat REAL,
  lng REAL,
  availability TEXT NOT NULL CHECK (availability IN ('offline', 'online', 'busy')),
  position_updated_at TEXT,
  updated_at TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS requests (
  id TEXT PRIMARY KEY,
  requester_id TEXT NOT NULL REFERENCES requesters(id),
  origin_lat REAL NOT NULL,
  origin_lng REAL NOT NULL,
  destination_lat REAL NOT NULL,
  destination_lng REAL NOT NULL,
  destination_address TEXT NOT NULL,
  distance_km REAL NOT NULL,
  courier_fee_cents BIGINT NOT NULL,
  carries_item INTEGER NOT NULL CHECK (carries_item IN (0, 1)),
  requires_return INTEGER NOT NULL CHECK (requires_return IN (0, 1)),
  notes TEXT,
  status TEXT NOT NULL CHECK (status IN ('pending', 'assigned', 'cancelled')),
  assigned_courier TEXT REFERENCES couriers(id),
  created_at TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS deliveries (
  id TEXT PRIMARY KEY,
  request_id TEXT NOT NULL UNIQUE REFERENCES requests(id),
  courier_id TEXT NOT NULL REFERENCES couriers(id),
  status TEXT NOT NULL CHECK (status IN ('in_progress', 'finished', 'cancelled')),
  value_cents BIGINT NOT NULL,
  created_at TEXT NOT NULL,
  closed_at TEXT
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_deliveries_active_courier ON deliveries(courier_id) WHERE status = 'in_progress';"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_couriers_availability ON couriers(availability);"#)
        .execute(pool)
        .await?;

    Ok(())
}
