use std::env;
use std::time::Duration;

use crate::engine::supervisor::TrackingSettings;
use crate::error::AppError;
use crate::route::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub event_buffer_size: usize,
    pub tick_interval_ms: u64,
    pub min_delivery_secs: u64,
    pub route_retry_attempts: u32,
    pub route_retry_pause_ms: u64,
    pub fallback_route_segments: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let log_format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("compact") | Err(_) => LogFormat::Compact,
            Ok(other) => {
                return Err(AppError::Internal(format!(
                    "invalid LOG_FORMAT: {other}, expected compact/json"
                )));
            }
        };

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            tick_interval_ms: parse_or_default("TICK_INTERVAL_MS", 100)?,
            min_delivery_secs: parse_or_default("MIN_DELIVERY_SECS", 300)?,
            route_retry_attempts: parse_or_default("ROUTE_RETRY_ATTEMPTS", 3)?,
            route_retry_pause_ms: parse_or_default("ROUTE_RETRY_PAUSE_MS", 2000)?,
            fallback_route_segments: parse_or_default("FALLBACK_ROUTE_SEGMENTS", 50)?,
        })
    }

    pub fn tracking_settings(&self) -> TrackingSettings {
        TrackingSettings {
            tick_interval: Duration::from_millis(self.tick_interval_ms.max(1)),
            min_delivery_duration: Duration::from_secs(self.min_delivery_secs),
            retry: RetryPolicy {
                max_attempts: self.route_retry_attempts.max(1),
                pause: Duration::from_millis(self.route_retry_pause_ms),
                fallback_segments: self.fallback_route_segments.max(1),
            },
        }
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
