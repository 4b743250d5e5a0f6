use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    InProgress,
    Finished,
    Cancelled,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::InProgress => "in_progress",
            DeliveryStatus::Finished => "finished",
            DeliveryStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryStatus::InProgress)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(DeliveryStatus::InProgress),
            "finished" => Ok(DeliveryStatus::Finished),
            "cancelled" => Ok(DeliveryStatus::Cancelled),
            other => Err(format!("unknown delivery status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub id: Uuid,
    pub request_id: Uuid,
    pub courier_id: Uuid,
    pub status: DeliveryStatus,
    pub value_cents: i64,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Delivery {
    pub fn start(request_id: Uuid, courier_id: Uuid, value_cents: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_id,
            courier_id,
            status: DeliveryStatus::InProgress,
            value_cents,
            created_at: Utc::now(),
            closed_at: None,
        }
    }
}
