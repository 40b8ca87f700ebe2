//! Clients for the external systems the monitors consult
//!
//! - **probe**: liveness checks of a network address (system `ping` or raw ICMP)
//! - **weather**: current conditions for a location name (OpenWeatherMap)
//!
//! Both are traits so the managers can be driven by scripted clients in tests.

pub mod probe;
pub mod weather;

pub use probe::{ProbeClient, ProbeError, ProbeReply};
pub use weather::{WeatherClient, WeatherError};
