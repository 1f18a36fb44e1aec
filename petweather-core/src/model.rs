use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::{ProviderError, ProviderId};

/// A validated latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lon: f64) -> Result<Self, ProviderError> {
        if !lat.is_finite() || !lon.is_finite() {
            return Err(ProviderError::InvalidCoordinates { lat, lon });
        }
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(ProviderError::InvalidCoordinates { lat, lon });
        }
        Ok(Self { lat, lon })
    }
}

impl std::fmt::Display for Coordinates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4},{:.4}", self.lat, self.lon)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PrecipitationType {
    #[default]
    None,
    Rain,
    Snow,
    Sleet,
    Hail,
    FreezingRain,
}

impl PrecipitationType {
    /// Lenient parse of the free-form strings vendors return ("rain", "Snow", "freezingrain", ...).
    pub fn from_vendor(value: &str) -> Self {
        let lower = value.trim().to_lowercase().replace(['_', ' ', '-'], "");
        match lower.as_str() {
            "rain" | "drizzle" | "showers" => Self::Rain,
            "snow" => Self::Snow,
            "sleet" | "icepellets" => Self::Sleet,
            "hail" => Self::Hail,
            "freezingrain" | "freezingdrizzle" | "ice" => Self::FreezingRain,
            _ => Self::None,
        }
    }
}

/// How much of the record came from real measurements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataConfidence {
    #[default]
    Full,
    /// Keyless fallback data: fewer fields, coarser values.
    Reduced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    #[default]
    Minor,
    Moderate,
    Severe,
    Extreme,
}

impl AlertSeverity {
    /// Anything unrecognised is treated as minor.
    pub fn from_vendor(value: &str) -> Self {
        let lower = value.to_lowercase();
        if lower.contains("extreme") {
            Self::Extreme
        } else if lower.contains("severe") {
            Self::Severe
        } else if lower.contains("moderate") {
            Self::Moderate
        } else {
            Self::Minor
        }
    }
}

/// An official weather warning active at the record's location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherAlert {
    pub event: String,
    pub severity: AlertSeverity,
    pub headline: Option<String>,
    pub description: Option<String>,
    pub starts: Option<DateTime<Utc>>,
    pub ends: Option<DateTime<Utc>>,
}

impl WeatherAlert {
    pub fn is_heat_warning(&self) -> bool {
        self.event.to_lowercase().contains("heat")
    }

    pub fn is_cold_warning(&self) -> bool {
        const COLD: [&str; 7] =
            ["cold", "freeze", "frost", "wind chill", "winter", "blizzard", "ice storm"];
        let event = self.event.to_lowercase();
        COLD.iter().any(|k| event.contains(k))
    }
}

/// Parse an RFC 3339 timestamp from a vendor payload, dropping anything malformed.
pub(crate) fn parse_rfc3339(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok()).map(|t| t.with_timezone(&Utc))
}

/// Canonical weather record every adapter maps into.
///
/// Units are fixed regardless of the source: Celsius, km/h, mm, km and
/// percentages in `0..=100`. Values are kept unrounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    pub provider: ProviderId,
    pub coordinates: Coordinates,
    pub location_name: Option<String>,
    pub condition: String,

    pub temperature_c: f64,
    pub feels_like_c: f64,
    pub humidity_pct: f64,

    pub wind_speed_kmh: f64,
    pub wind_direction_deg: Option<f64>,
    pub wind_gust_kmh: Option<f64>,

    pub precipitation_mm: f64,
    pub precipitation_type: PrecipitationType,
    pub precipitation_probability_pct: Option<f64>,

    pub uv_index: Option<f64>,
    pub cloud_cover_pct: Option<f64>,
    pub visibility_km: Option<f64>,
    /// Air quality on the 1 (good) to 5 (hazardous) scale.
    pub air_quality_index: Option<u8>,

    /// Active warnings; empty when the provider has none or does not report them.
    #[serde(default)]
    pub alerts: Vec<WeatherAlert>,

    pub confidence: DataConfidence,
    pub observation_time: DateTime<Utc>,
}

impl WeatherRecord {
    /// Checks that every numeric field is finite and inside its documented range.
    pub fn validate(&self) -> Result<(), String> {
        fn finite(name: &str, v: f64) -> Result<(), String> {
            if v.is_finite() { Ok(()) } else { Err(format!("{name} is not finite")) }
        }
        fn pct(name: &str, v: f64) -> Result<(), String> {
            finite(name, v)?;
            if (0.0..=100.0).contains(&v) {
                Ok(())
            } else {
                Err(format!("{name} out of range: {v}"))
            }
        }
        fn non_negative(name: &str, v: f64) -> Result<(), String> {
            finite(name, v)?;
            if v >= 0.0 { Ok(()) } else { Err(format!("{name} is negative: {v}")) }
        }

        finite("temperature_c", self.temperature_c)?;
        finite("feels_like_c", self.feels_like_c)?;
        if !(-100.0..=70.0).contains(&self.temperature_c) {
            return Err(format!("temperature_c out of range: {}", self.temperature_c));
        }
        pct("humidity_pct", self.humidity_pct)?;
        non_negative("wind_speed_kmh", self.wind_speed_kmh)?;
        non_negative("precipitation_mm", self.precipitation_mm)?;

        if let Some(v) = self.wind_direction_deg {
            finite("wind_direction_deg", v)?;
            if !(0.0..=360.0).contains(&v) {
                return Err(format!("wind_direction_deg out of range: {v}"));
            }
        }
        if let Some(v) = self.wind_gust_kmh {
            non_negative("wind_gust_kmh", v)?;
        }
        if let Some(v) = self.precipitation_probability_pct {
            pct("precipitation_probability_pct", v)?;
        }
        if let Some(v) = self.uv_index {
            non_negative("uv_index", v)?;
        }
        if let Some(v) = self.cloud_cover_pct {
            pct("cloud_cover_pct", v)?;
        }
        if let Some(v) = self.visibility_km {
            non_negative("visibility_km", v)?;
        }
        if let Some(aqi) = self.air_quality_index {
            if !(1..=5).contains(&aqi) {
                return Err(format!("air_quality_index out of range: {aqi}"));
            }
        }
        Ok(())
    }

    pub fn is_plausible(&self) -> bool {
        self.validate().is_ok()
    }
}

#[cfg(test)]
pub(crate) fn sample_record(provider: ProviderId) -> WeatherRecord {
    WeatherRecord {
        provider,
        coordinates: Coordinates { lat: 52.52, lon: 13.405 },
        location_name: Some("Berlin".to_string()),
        condition: "Clear".to_string(),
        temperature_c: 22.0,
        feels_like_c: 22.0,
        humidity_pct: 45.0,
        wind_speed_kmh: 8.0,
        wind_direction_deg: Some(180.0),
        wind_gust_kmh: None,
        precipitation_mm: 0.0,
        precipitation_type: PrecipitationType::None,
        precipitation_probability_pct: Some(0.0),
        uv_index: Some(4.0),
        cloud_cover_pct: Some(10.0),
        visibility_km: Some(10.0),
        air_quality_index: Some(1),
        alerts: Vec::new(),
        confidence: DataConfidence::Full,
        observation_time: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap_or_default(),
    }
}
