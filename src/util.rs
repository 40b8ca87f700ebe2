use std::any::Any;

use chrono::{DateTime, TimeDelta, Utc};

const BEACON_CONFIG: &str = "BEACON_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "./beacon.json";

pub fn get_config_path() -> String {
    std::env::var(BEACON_CONFIG).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}

const WEATHER_API_KEY: &str = "WEATHER_API_KEY";

pub fn get_weather_api_key() -> Option<String> {
    std::env::var(WEATHER_API_KEY).ok().filter(|key| !key.is_empty())
}

const SMTP_PASSWORD: &str = "SMTP_PASSWORD";

pub fn get_smtp_password() -> Option<String> {
    std::env::var(SMTP_PASSWORD).ok()
}

/// `std` durations beyond chrono's range saturate instead of failing
pub fn to_delta(duration: std::time::Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// Text of a caught panic payload
pub fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Helper to convert a timestamp to Unix milliseconds for storage
pub fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

/// Helper to convert stored Unix milliseconds back to a timestamp
pub fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::UNIX_EPOCH)
}
