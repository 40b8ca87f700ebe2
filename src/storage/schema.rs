//! Records persisted by the monitor store
//!
//! Accounts and their capabilities belong to the marketplace side of the system; the
//! monitors only read the recipient address, role and subscription state off them.
//! Timestamps are always UTC and stored as Unix milliseconds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::LivenessState;

pub type AccountId = i64;
pub type MonitorId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,

    /// Recipient address for notifications
    pub email: String,

    /// Marketplace role (`client`, `customer`, `admin`)
    pub role: String,

    pub is_active: bool,
}

/// Purchasable capabilities that gate monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    PingMonitoring,
    WeatherTracking,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::PingMonitoring => "ping_monitoring",
            Capability::WeatherTracking => "weather_tracking",
        }
    }
}

/// One tracked (account, address) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessMonitor {
    pub id: MonitorId,
    pub account_id: AccountId,

    /// IP literal or hostname
    pub address: String,

    /// State observed by the last probe
    pub state: LivenessState,

    pub last_probe_at: DateTime<Utc>,

    pub last_notified_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

/// Values for a monitor created from a first manual probe
#[derive(Debug, Clone)]
pub struct NewLivenessMonitor {
    pub account_id: AccountId,
    pub address: String,
    pub state: LivenessState,
    pub probed_at: DateTime<Utc>,
    pub notified_at: Option<DateTime<Utc>>,
}

/// One tracked (account, location) pair
///
/// The location string is opaque: two spellings of one place are two monitors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeatherMonitor {
    pub id: MonitorId,
    pub account_id: AccountId,
    pub location: String,
    /// Last weather lookup, on demand or daily
    pub last_check_at: Option<DateTime<Utc>>,
    pub last_notified_at: Option<DateTime<Utc>>,
    /// Last daily sweep that handled this monitor; on-demand checks leave it alone
    pub last_report_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// History entry for one manual probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeRecord {
    pub account_id: AccountId,
    pub address: String,
    pub reachable: bool,
    pub raw_output: String,
    pub error: Option<String>,
    pub probed_at: DateTime<Utc>,
}
