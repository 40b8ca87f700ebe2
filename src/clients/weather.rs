//! Weather lookups against the OpenWeatherMap HTTP API

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, instrument, trace};

use crate::{ConditionCode, WeatherSnapshot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeatherError {
    /// The provider does not know the location
    NotFound(String),

    /// Connection, HTTP or decoding failure
    Transport(String),

    /// The lookup did not finish within its timeout
    Timeout,
}

impl fmt::Display for WeatherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeatherError::NotFound(location) => write!(f, "location not found: {}", location),
            WeatherError::Transport(msg) => write!(f, "weather lookup failed: {}", msg),
            WeatherError::Timeout => write!(f, "weather lookup timed out"),
        }
    }
}

impl std::error::Error for WeatherError {}

#[async_trait]
pub trait WeatherClient: Send + Sync {
    /// Look up current conditions for `location`, giving up after `timeout`
    async fn lookup(&self, location: &str, timeout: Duration)
    -> Result<WeatherSnapshot, WeatherError>;
}

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    name: String,
    coord: Coordinates,
    weather: Vec<Condition>,
    main: MainReadings,
    wind: Wind,
}

#[derive(Debug, Deserialize)]
struct Coordinates {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Deserialize)]
struct Condition {
    id: u16,
    description: String,
}

#[derive(Debug, Deserialize)]
struct MainReadings {
    temp: f64,
    feels_like: f64,
    humidity: u8,
}

#[derive(Debug, Deserialize)]
struct Wind {
    speed: f64,
}

#[derive(Debug, Deserialize)]
struct OneCall {
    current: OneCallCurrent,
}

#[derive(Debug, Deserialize)]
struct OneCallCurrent {
    uvi: f64,
}

/// Client for the OpenWeatherMap current weather and one-call endpoints
#[derive(Debug, Clone)]
pub struct OpenWeatherClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenWeatherClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    async fn current(
        &self,
        location: &str,
        timeout: Duration,
    ) -> Result<CurrentWeather, WeatherError> {
        let url = format!("{}/data/2.5/weather", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("q", location), ("units", "metric"), ("appid", self.api_key.as_str())])
            .timeout(timeout)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => return Err(WeatherError::NotFound(location.to_string())),
            status => {
                return Err(WeatherError::Transport(format!("HTTP error: {status}")));
            }
        }

        response
            .json::<CurrentWeather>()
            .await
            .map_err(map_reqwest_error)
    }

    /// UV index is only offered by the one-call endpoint
    async fn uv_index(&self, coord: &Coordinates, timeout: Duration) -> Result<f64, WeatherError> {
        let url = format!("{}/data/3.0/onecall", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("lat", coord.lat.to_string()),
                ("lon", coord.lon.to_string()),
                ("exclude", "minutely,hourly,daily,alerts".to_string()),
                ("appid", self.api_key.clone()),
            ])
            .timeout(timeout)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if !response.status().is_success() {
            return Err(WeatherError::Transport(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let body = response
            .json::<OneCall>()
            .await
            .map_err(map_reqwest_error)?;

        Ok(body.current.uvi)
    }
}

fn map_reqwest_error(err: reqwest::Error) -> WeatherError {
    if err.is_timeout() {
        WeatherError::Timeout
    } else {
        WeatherError::Transport(err.to_string())
    }
}

#[async_trait]
impl WeatherClient for OpenWeatherClient {
    #[instrument(skip(self))]
    async fn lookup(
        &self,
        location: &str,
        timeout: Duration,
    ) -> Result<WeatherSnapshot, WeatherError> {
        let started = tokio::time::Instant::now();
        let current = self.current(location, timeout).await?;

        let condition = current.weather.first().ok_or_else(|| {
            WeatherError::Transport("response contained no weather condition".to_string())
        })?;

        let remaining = timeout.saturating_sub(started.elapsed());
        let uv_index = if remaining.is_zero() {
            None
        } else {
            match self.uv_index(&current.coord, remaining).await {
                Ok(uvi) => Some(uvi),
                Err(e) => {
                    debug!("UV index unavailable for {location}: {e}");
                    None
                }
            }
        };

        trace!("resolved {location} to {}", current.name);

        Ok(WeatherSnapshot {
            location: current.name,
            temperature: current.main.temp,
            feels_like: current.main.feels_like,
            humidity: current.main.humidity,
            wind_speed: current.wind.speed,
            condition: ConditionCode(condition.id),
            description: condition.description.clone(),
            uv_index,
        })
    }
}
