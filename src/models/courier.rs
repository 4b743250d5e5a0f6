use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Offline,
    Online,
    Busy,
}

impl Availability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Availability::Offline => "offline",
            Availability::Online => "online",
            Availability::Busy => "busy",
        }
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Availability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "offline" => Ok(Availability::Offline),
            "online" => Ok(Availability::Online),
            "busy" => Ok(Availability::Busy),
            other => Err(format!("unknown availability: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Courier {
    pub id: Uuid,
    pub name: String,
    /// Unknown until the courier app reports its first fix.
    pub position: Option<GeoPoint>,
    pub availability: Availability,
    pub position_updated_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Courier {
    pub fn new(name: String, position: Option<GeoPoint>, availability: Availability) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            position,
            availability,
            position_updated_at: position.map(|_| now),
            updated_at: now,
        }
    }
}
