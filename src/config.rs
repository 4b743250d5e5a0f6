use std::env;
use std::time::Duration;

use crate::error::AppError;
use crate::observability::logging::LogFormat;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub event_queue_size: usize,
    pub channel_buffer_size: usize,
    /// `None` keeps everything in process memory.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub dispatch: DispatchSettings,
}

/// Knobs of a dispatch round and of the store calls it makes.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub radius_meters: f64,
    pub candidate_limit: usize,
    pub store_timeout: Duration,
    /// Pending requests are cancelled this long after their offers went out.
    pub offer_ttl: Option<Duration>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            radius_meters: 10_000.0,
            candidate_limit: 10,
            store_timeout: Duration::from_millis(2_000),
            offer_ttl: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let log_format = match env::var("LOG_FORMAT") {
            Ok(raw) => raw
                .parse::<LogFormat>()
                .map_err(|err| AppError::Internal(format!("invalid LOG_FORMAT: {err}")))?,
            Err(_) => LogFormat::Compact,
        };

        let offer_ttl = match env::var("OFFER_TTL_SECS") {
            Ok(raw) => Some(Duration::from_secs(parse_value("OFFER_TTL_SECS", &raw)?)),
            Err(_) => None,
        };

        let dispatch = DispatchSettings {
            radius_meters: parse_or_default("MATCH_RADIUS_METERS", 10_000.0)?,
            candidate_limit: parse_or_default("MATCH_LIMIT", 10)?,
            store_timeout: Duration::from_millis(parse_or_default("STORE_TIMEOUT_MS", 2_000)?),
            offer_ttl,
        };

        if !(dispatch.radius_meters.is_finite() && dispatch.radius_meters > 0.0) {
            return Err(AppError::Internal("MATCH_RADIUS_METERS must be > 0".to_string()));
        }
        if dispatch.candidate_limit == 0 {
            return Err(AppError::Internal("MATCH_LIMIT must be > 0".to_string()));
        }

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format,
            event_queue_size: parse_or_default("EVENT_QUEUE_SIZE", 1024)?,
            channel_buffer_size: parse_or_default("CHANNEL_BUFFER_SIZE", 32)?,
            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.trim().is_empty()),
            database_max_connections: parse_or_default("DATABASE_MAX_CONNECTIONS", 8)?,
            dispatch,
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|err| AppError::Internal(format!("invalid {key}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::{parse_value, DispatchSettings};

    #[test]
    fn parse_value_reports_the_offending_key() {
        let err = parse_value::<u16>("HTTP_PORT", "eighty").unwrap_err();
        assert!(err.to_string().contains("HTTP_PORT"));
        assert_eq!(parse_value::<u16>("HTTP_PORT", " 8080 ").unwrap(), 8080);
    }

    #[test]
    fn default_dispatch_settings_are_bounded() {
        let settings = DispatchSettings::default();
        assert!(settings.radius_meters > 0.0);
        assert_eq!(settings.candidate_limit, 10);
        assert!(settings.offer_ttl.is_none());
    }
}
