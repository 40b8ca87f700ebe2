use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveTime;
use serde::{Deserialize, Deserializer};
use tracing::{trace, warn};

/// Storage backend configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database (default for most deployments)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./beacon.db")
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    /// Storage configuration (optional - defaults to SQLite)
    pub storage: Option<StorageConfig>,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub liveness: LivenessConfig,

    #[serde(default)]
    pub weather: WeatherConfig,

    #[serde(default)]
    pub notifier: NotifierConfig,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_liveness_interval")]
    pub liveness_interval_secs: u64,

    /// Local wall-clock time of the daily weather report
    #[serde(
        default = "default_report_time",
        deserialize_with = "deserialize_report_time"
    )]
    pub daily_report_time: NaiveTime,

    /// Upper bound of resources processed concurrently within one sweep
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            liveness_interval_secs: default_liveness_interval(),
            daily_report_time: default_report_time(),
            max_concurrency: default_max_concurrency(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMethod {
    /// Spawn the system `ping` binary
    #[default]
    System,
    /// Raw ICMP socket (needs CAP_NET_RAW or an unprivileged ping group)
    Icmp,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct LivenessConfig {
    #[serde(default)]
    pub method: ProbeMethod,

    #[serde(default = "default_call_timeout")]
    pub probe_timeout_secs: u64,

    /// Echo requests per system ping
    #[serde(default = "default_ping_count")]
    pub ping_count: u8,

    /// Minimum gap between two "still reachable" notifications
    #[serde(default = "default_throttle_window")]
    pub throttle_window_secs: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            method: ProbeMethod::default(),
            probe_timeout_secs: default_call_timeout(),
            ping_count: default_ping_count(),
            throttle_window_secs: default_throttle_window(),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct WeatherConfig {
    #[serde(default = "default_weather_url")]
    pub api_url: String,

    /// Falls back to the WEATHER_API_KEY environment variable
    pub api_key: Option<String>,

    #[serde(default = "default_call_timeout")]
    pub lookup_timeout_secs: u64,

    /// A monitor checked more recently than this is left out of the daily sweep
    #[serde(default = "default_min_report_gap")]
    pub min_report_gap_secs: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_url: default_weather_url(),
            api_key: None,
            lookup_timeout_secs: default_call_timeout(),
            min_report_gap_secs: default_min_report_gap(),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct NotifierConfig {
    #[serde(flatten)]
    pub transport: TransportConfig,

    #[serde(default = "default_call_timeout")]
    pub timeout_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::Log,
            timeout_secs: default_call_timeout(),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Only log rendered messages
    Log,
    Webhook(Webhook),
    Smtp(Smtp),
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Webhook {
    pub url: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Smtp {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: Option<String>,
    /// Falls back to the SMTP_PASSWORD environment variable
    pub password: Option<String>,
    pub from: String,
    #[serde(default)]
    pub tls: SmtpTls,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpTls {
    None,
    #[default]
    Starttls,
    Tls,
}

fn default_liveness_interval() -> u64 {
    300
}

fn default_report_time() -> NaiveTime {
    NaiveTime::from_hms_opt(7, 0, 0).unwrap_or(NaiveTime::MIN)
}

fn default_max_concurrency() -> usize {
    8
}

fn default_shutdown_grace() -> u64 {
    30
}

fn default_call_timeout() -> u64 {
    10
}

fn default_ping_count() -> u8 {
    3
}

fn default_throttle_window() -> u64 {
    3600
}

fn default_weather_url() -> String {
    "https://api.openweathermap.org".to_string()
}

fn default_min_report_gap() -> u64 {
    1800
}

fn default_smtp_port() -> u16 {
    587
}

fn deserialize_report_time<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_report_time(&raw).map_err(serde::de::Error::custom)
}

/// Parse `HH:MM` or `HH:MM:SS`
pub fn parse_report_time(raw: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|e| format!("invalid report time '{raw}': {e}"))
}

/// Scheduler settings after validation
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub liveness_interval: Duration,
    pub daily_report_time: NaiveTime,
    pub shutdown_grace: Duration,
}

/// Settings of the liveness sweep and manual probes
#[derive(Debug, Clone)]
pub struct LivenessSettings {
    pub sweep_interval: Duration,
    pub throttle_window: Duration,
    pub probe_timeout: Duration,
    pub notify_timeout: Duration,
    pub max_concurrency: usize,
}

impl Default for LivenessSettings {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(default_liveness_interval()),
            throttle_window: Duration::from_secs(default_throttle_window()),
            probe_timeout: Duration::from_secs(default_call_timeout()),
            notify_timeout: Duration::from_secs(default_call_timeout()),
            max_concurrency: default_max_concurrency(),
        }
    }
}

/// Settings of the daily weather sweep and on-demand checks
#[derive(Debug, Clone)]
pub struct WeatherSettings {
    pub lookup_timeout: Duration,
    pub notify_timeout: Duration,
    pub min_report_gap: Duration,
    pub max_concurrency: usize,
}

impl Default for WeatherSettings {
    fn default() -> Self {
        Self {
            lookup_timeout: Duration::from_secs(default_call_timeout()),
            notify_timeout: Duration::from_secs(default_call_timeout()),
            min_report_gap: Duration::from_secs(default_min_report_gap()),
            max_concurrency: default_max_concurrency(),
        }
    }
}

/// Configuration with defaults applied and limits enforced
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub storage: StorageConfig,
    pub scheduler: SchedulerSettings,
    pub liveness: LivenessSettings,
    pub weather: WeatherSettings,
    pub probe_method: ProbeMethod,
    pub ping_count: u8,
    pub weather_api_url: String,
    pub weather_api_key: Option<String>,
    pub transport: TransportConfig,
}

impl Config {
    pub fn resolve(&self) -> anyhow::Result<ResolvedConfig> {
        let scheduler = &self.scheduler;

        if scheduler.liveness_interval_secs == 0 {
            anyhow::bail!("scheduler.liveness_interval_secs must be greater than zero");
        }
        if scheduler.max_concurrency == 0 {
            anyhow::bail!("scheduler.max_concurrency must be at least 1");
        }
        if self.liveness.probe_timeout_secs == 0
            || self.weather.lookup_timeout_secs == 0
            || self.notifier.timeout_secs == 0
        {
            anyhow::bail!("call timeouts must be greater than zero");
        }
        if self.liveness.ping_count == 0 {
            anyhow::bail!("liveness.ping_count must be at least 1");
        }

        let interval = scheduler.liveness_interval_secs;
        let lookup_timeout = clamp_to_interval(
            "weather.lookup_timeout_secs",
            self.weather.lookup_timeout_secs,
            interval,
        );
        let notify_timeout =
            clamp_to_interval("notifier.timeout_secs", self.notifier.timeout_secs, interval);

        let weather_api_key = self
            .weather
            .api_key
            .clone()
            .or_else(crate::util::get_weather_api_key);

        let transport = match &self.notifier.transport {
            TransportConfig::Smtp(smtp) if smtp.password.is_none() => {
                let mut smtp = smtp.clone();
                smtp.password = crate::util::get_smtp_password();
                TransportConfig::Smtp(smtp)
            }
            other => other.clone(),
        };

        Ok(ResolvedConfig {
            storage: self.storage.clone().unwrap_or_default(),
            scheduler: SchedulerSettings {
                liveness_interval: Duration::from_secs(interval),
                daily_report_time: scheduler.daily_report_time,
                shutdown_grace: Duration::from_secs(scheduler.shutdown_grace_secs),
            },
            liveness: LivenessSettings {
                sweep_interval: Duration::from_secs(interval),
                throttle_window: Duration::from_secs(self.liveness.throttle_window_secs),
                probe_timeout: Duration::from_secs(self.liveness.probe_timeout_secs),
                notify_timeout: Duration::from_secs(notify_timeout),
                max_concurrency: scheduler.max_concurrency,
            },
            weather: WeatherSettings {
                lookup_timeout: Duration::from_secs(lookup_timeout),
                notify_timeout: Duration::from_secs(notify_timeout),
                min_report_gap: Duration::from_secs(self.weather.min_report_gap_secs),
                max_concurrency: scheduler.max_concurrency,
            },
            probe_method: self.liveness.method,
            ping_count: self.liveness.ping_count,
            weather_api_url: self.weather.api_url.trim_end_matches('/').to_string(),
            weather_api_key,
            transport,
        })
    }
}

fn clamp_to_interval(name: &str, value: u64, interval: u64) -> u64 {
    if value > interval {
        warn!("{name} ({value}s) exceeds the sweep interval, clamping to {interval}s");
        interval
    } else {
        value
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
