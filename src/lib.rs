pub mod actors;
pub mod clients;
pub mod config;
pub mod monitors;
pub mod notifications;
pub mod storage;
pub mod util;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clients::probe::ProbeError;

/// Observed reachability of a monitored address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessState {
    Online,
    Offline,
}

impl LivenessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LivenessState::Online => "online",
            LivenessState::Offline => "offline",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "online" => Some(LivenessState::Online),
            "offline" => Some(LivenessState::Offline),
            _ => None,
        }
    }
}

impl fmt::Display for LivenessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one liveness probe
///
/// A probe that could not be carried out (timeout, transport error) still yields a
/// result: it counts as `Offline`, with the failure kept in `error`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub address: String,
    pub reachable: bool,
    pub raw_output: String,
    pub error: Option<ProbeError>,
    pub probed_at: DateTime<Utc>,
}

impl ProbeResult {
    pub fn state(&self) -> LivenessState {
        if self.reachable && self.error.is_none() {
            LivenessState::Online
        } else {
            LivenessState::Offline
        }
    }

    /// Diagnostic text for notifications, falling back to the probe error
    pub fn diagnostic(&self) -> String {
        match &self.error {
            Some(err) if self.raw_output.is_empty() => err.to_string(),
            Some(err) => format!("{}\n{}", self.raw_output, err),
            None => self.raw_output.clone(),
        }
    }
}

/// OpenWeatherMap style condition code (e.g. 500 light rain, 800 clear sky)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionCode(pub u16);

impl ConditionCode {
    pub const CLEAR_SKY: ConditionCode = ConditionCode(800);

    /// Thunderstorm, drizzle and rain groups
    pub fn is_rain(&self) -> bool {
        matches!(self.0 / 100, 2 | 3 | 5)
    }

    pub fn is_clear(&self) -> bool {
        *self == Self::CLEAR_SKY
    }
}

/// Current conditions for a location, as returned by a weather lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    /// Location name as resolved by the provider
    pub location: String,

    /// Air temperature (°C)
    pub temperature: f64,

    /// Perceived temperature (°C)
    pub feels_like: f64,

    /// Relative humidity (%)
    pub humidity: u8,

    /// Wind speed (m/s)
    pub wind_speed: f64,

    pub condition: ConditionCode,

    pub description: String,

    /// UV index, absent when the provider could not supply one
    pub uv_index: Option<f64>,
}
