//! Notification messages
//!
//! Every message the engine can send is one variant of [`Notification`], carrying
//! exactly the fields its text needs. Adding a field to a template therefore means
//! adding it to the variant, and every producer is checked by the compiler.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::LivenessState;
use crate::monitors::recommendations::WeatherReport;

/// Kind of a notification, as exposed to transports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ManualProbe,
    Offline,
    Online,
    StillReachable,
    WeatherCheck,
    DailyWeather,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ManualProbe => "manual_probe",
            EventKind::Offline => "offline",
            EventKind::Online => "online",
            EventKind::StillReachable => "still_reachable",
            EventKind::WeatherCheck => "weather_check",
            EventKind::DailyWeather => "daily_weather",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Acknowledgement of a probe requested by the account
    ManualProbe {
        address: String,
        state: LivenessState,
        diagnostic: String,
    },

    /// Address stopped answering
    WentOffline { address: String, diagnostic: String },

    /// Address answers again
    BackOnline { address: String, diagnostic: String },

    /// Hourly status while an address stays online
    StillReachable {
        address: String,
        diagnostic: String,
        probed_at: DateTime<Utc>,
    },

    /// Result of an on-demand weather check
    WeatherCheck { report: WeatherReport },

    /// Scheduled morning report
    DailyWeather { report: WeatherReport },
}

impl Notification {
    pub fn kind(&self) -> EventKind {
        match self {
            Notification::ManualProbe { .. } => EventKind::ManualProbe,
            Notification::WentOffline { .. } => EventKind::Offline,
            Notification::BackOnline { .. } => EventKind::Online,
            Notification::StillReachable { .. } => EventKind::StillReachable,
            Notification::WeatherCheck { .. } => EventKind::WeatherCheck,
            Notification::DailyWeather { .. } => EventKind::DailyWeather,
        }
    }

    /// Flat parameter map for transports that forward structured data
    pub fn params(&self) -> BTreeMap<&'static str, String> {
        let mut params = BTreeMap::new();

        match self {
            Notification::ManualProbe {
                address,
                state,
                diagnostic,
            } => {
                params.insert("address", address.clone());
                params.insert("state", state.to_string());
                params.insert("diagnostic", diagnostic.clone());
            }
            Notification::WentOffline {
                address,
                diagnostic,
            }
            | Notification::BackOnline {
                address,
                diagnostic,
            } => {
                params.insert("address", address.clone());
                params.insert("diagnostic", diagnostic.clone());
            }
            Notification::StillReachable {
                address,
                diagnostic,
                probed_at,
            } => {
                params.insert("address", address.clone());
                params.insert("diagnostic", diagnostic.clone());
                params.insert("probed_at", probed_at.to_rfc3339());
            }
            Notification::WeatherCheck { report } | Notification::DailyWeather { report } => {
                let snapshot = &report.snapshot;
                params.insert("location", snapshot.location.clone());
                params.insert("temperature", format!("{:.1}", snapshot.temperature));
                params.insert("feels_like", format!("{:.1}", snapshot.feels_like));
                params.insert("humidity", snapshot.humidity.to_string());
                params.insert("wind_speed", format!("{:.1}", snapshot.wind_speed));
                params.insert("condition", snapshot.condition.0.to_string());
                params.insert("description", snapshot.description.clone());
                params.insert(
                    "uv_index",
                    snapshot
                        .uv_index
                        .map(|uv| format!("{uv:.1}"))
                        .unwrap_or_default(),
                );
                params.insert(
                    "recommendations",
                    report
                        .recommendations
                        .iter()
                        .map(|r| r.text())
                        .collect::<Vec<_>>()
                        .join("; "),
                );
            }
        }

        params
    }

    pub fn subject(&self) -> String {
        match self {
            Notification::ManualProbe { address, state, .. } => {
                format!("[beacon] Probe of {address}: {state}")
            }
            Notification::WentOffline { address, .. } => {
                format!("[beacon] {address} is OFFLINE")
            }
            Notification::BackOnline { address, .. } => {
                format!("[beacon] {address} is back ONLINE")
            }
            Notification::StillReachable { address, .. } => {
                format!("[beacon] {address} is reachable")
            }
            Notification::WeatherCheck { report } => {
                format!("[beacon] Weather in {}", report.snapshot.location)
            }
            Notification::DailyWeather { report } => {
                format!("[beacon] Daily weather for {}", report.snapshot.location)
            }
        }
    }

    pub fn body(&self) -> String {
        match self {
            Notification::ManualProbe {
                address,
                state,
                diagnostic,
            } => {
                let outcome = match state {
                    LivenessState::Online => "answered",
                    LivenessState::Offline => "did not answer",
                };
                format!("Your probe of {address} {outcome}.\n\n{diagnostic}")
            }
            Notification::WentOffline {
                address,
                diagnostic,
            } => {
                format!("{address} stopped responding and is now offline.\n\n{diagnostic}")
            }
            Notification::BackOnline {
                address,
                diagnostic,
            } => {
                format!("{address} is responding again and is now online.\n\n{diagnostic}")
            }
            Notification::StillReachable {
                address,
                diagnostic,
                probed_at,
            } => format!(
                "{address} is still online (last probe {}).\n\n{diagnostic}",
                probed_at.format("%Y-%m-%d %H:%M UTC")
            ),
            Notification::WeatherCheck { report } | Notification::DailyWeather { report } => {
                render_weather(report)
            }
        }
    }
}

fn render_weather(report: &WeatherReport) -> String {
    let snapshot = &report.snapshot;
    let mut body = String::new();

    let _ = writeln!(body, "Weather in {}: {}", snapshot.location, snapshot.description);
    let _ = writeln!(
        body,
        "Temperature: {:.1}°C (feels like {:.1}°C)",
        snapshot.temperature, snapshot.feels_like
    );
    let _ = writeln!(body, "Humidity: {}%", snapshot.humidity);
    let _ = writeln!(body, "Wind: {:.1} m/s", snapshot.wind_speed);
    if let Some(uv) = snapshot.uv_index {
        let _ = writeln!(body, "UV index: {uv:.1}");
    }

    body.push_str("\nRecommendations:\n");
    for recommendation in &report.recommendations {
        let _ = writeln!(body, "- {}", recommendation.text());
    }

    body
}
