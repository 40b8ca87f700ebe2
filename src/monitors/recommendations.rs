use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::WeatherSnapshot;

static RAIN_DESCRIPTION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)\b(rain|drizzle|shower)").ok());

/// Advice attached to a weather report
///
/// Variants are declared in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    /// UV index above 2
    SunProtection,
    /// Below 10°C
    WarmClothing,
    /// Above 25°C
    SunHat,
    /// Rain, drizzle or thunderstorm
    Umbrella,
    /// Clear sky
    Sunglasses,
    /// Wind above 5 m/s
    Windbreaker,
    /// Below 0°C
    GlovesAndLipBalm,
    /// Nothing else applies
    NoSpecial,
}

impl Recommendation {
    pub fn text(&self) -> &'static str {
        match self {
            Recommendation::SunProtection => "Apply sunscreen, the UV index is elevated",
            Recommendation::WarmClothing => "Dress warmly",
            Recommendation::SunHat => "Wear a sun hat",
            Recommendation::Umbrella => "Take an umbrella",
            Recommendation::Sunglasses => "Bring sunglasses",
            Recommendation::Windbreaker => "Wear a windbreaker",
            Recommendation::GlovesAndLipBalm => "Wear gloves and use lip balm",
            Recommendation::NoSpecial => "No special recommendations",
        }
    }
}

fn indicates_rain(snapshot: &WeatherSnapshot) -> bool {
    snapshot.condition.is_rain()
        || RAIN_DESCRIPTION
            .as_ref()
            .is_some_and(|re| re.is_match(&snapshot.description))
}

/// Recommendations for `snapshot`, in display order; never empty
///
/// A missing UV index counts as 0.
pub fn recommend(snapshot: &WeatherSnapshot) -> Vec<Recommendation> {
    let temperature = snapshot.temperature;

    let checks = [
        (
            snapshot.uv_index.unwrap_or_default() > 2.0,
            Recommendation::SunProtection,
        ),
        (temperature < 10.0, Recommendation::WarmClothing),
        (temperature > 25.0, Recommendation::SunHat),
        (indicates_rain(snapshot), Recommendation::Umbrella),
        (snapshot.condition.is_clear(), Recommendation::Sunglasses),
        (snapshot.wind_speed > 5.0, Recommendation::Windbreaker),
        (temperature < 0.0, Recommendation::GlovesAndLipBalm),
    ];

    let recommendations: Vec<_> = checks
        .into_iter()
        .filter_map(|(holds, recommendation)| holds.then_some(recommendation))
        .collect();

    if recommendations.is_empty() {
        vec![Recommendation::NoSpecial]
    } else {
        recommendations
    }
}

/// A weather snapshot together with the advice derived from it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherReport {
    pub snapshot: WeatherSnapshot,
    pub recommendations: Vec<Recommendation>,
}

impl WeatherReport {
    pub fn new(snapshot: WeatherSnapshot) -> Self {
        Self {
            recommendations: recommend(&snapshot),
            snapshot,
        }
    }
}
