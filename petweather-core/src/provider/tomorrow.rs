use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::{
    model::{Coordinates, DataConfidence, PrecipitationType, WeatherRecord},
    provider::{ProviderError, ProviderId, get_json, trim_base},
    units::{clamp_pct, mps_to_kmh},
};

use super::WeatherProvider;

const FIELDS: &[&str] = &[
    "temperature",
    "temperatureApparent",
    "humidity",
    "windSpeed",
    "windDirection",
    "windGust",
    "precipitationIntensity",
    "precipitationType",
    "precipitationProbability",
    "visibility",
    "cloudCover",
    "weatherCode",
    "uvIndex",
];

/// Tomorrow.io timelines API, realtime step.
#[derive(Debug, Clone)]
pub struct TomorrowIoProvider {
    api_key: String,
    base_url: String,
    http: Client,
}

impl TomorrowIoProvider {
    pub fn new(api_key: String, base_url: String, http: Client) -> Self {
        Self { api_key, base_url, http }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TmValues {
    temperature: f64,
    temperature_apparent: Option<f64>,
    humidity: f64,
    wind_speed: f64,
    wind_direction: Option<f64>,
    wind_gust: Option<f64>,
    precipitation_intensity: Option<f64>,
    precipitation_type: Option<u8>,
    precipitation_probability: Option<f64>,
    visibility: Option<f64>,
    cloud_cover: Option<f64>,
    weather_code: Option<u32>,
    uv_index: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TmInterval {
    start_time: Option<DateTime<Utc>>,
    values: TmValues,
}

#[derive(Debug, Deserialize)]
struct TmTimeline {
    intervals: Vec<TmInterval>,
}

#[derive(Debug, Deserialize)]
struct TmData {
    timelines: Vec<TmTimeline>,
}

#[derive(Debug, Deserialize)]
struct TmResponse {
    data: TmData,
}

/// Tomorrow.io precipitation type codes: 0 N/A, 1 rain, 2 snow, 3 freezing rain, 4 ice pellets.
fn precipitation_type(code: Option<u8>) -> PrecipitationType {
    match code {
        Some(1) => PrecipitationType::Rain,
        Some(2) => PrecipitationType::Snow,
        Some(3) => PrecipitationType::FreezingRain,
        Some(4) => PrecipitationType::Sleet,
        _ => PrecipitationType::None,
    }
}

fn condition_from_code(code: u32) -> &'static str {
    match code {
        1000 => "Clear",
        1100 => "Mostly Clear",
        1101 => "Partly Cloudy",
        1102 => "Mostly Cloudy",
        1001 => "Cloudy",
        2000 | 2100 => "Fog",
        4000 => "Drizzle",
        4001 => "Rain",
        4200 => "Light Rain",
        4201 => "Heavy Rain",
        5000 | 5100 => "Snow",
        5001 => "Flurries",
        5101 => "Heavy Snow",
        6000 | 6001 | 6200 | 6201 => "Freezing Rain",
        7000 | 7101 | 7102 => "Ice Pellets",
        8000 => "Thunderstorm",
        _ => "Unknown",
    }
}

fn map_response(at: Coordinates, parsed: TmResponse) -> Result<WeatherRecord, ProviderError> {
    let interval = parsed
        .data
        .timelines
        .into_iter()
        .next()
        .and_then(|t| t.intervals.into_iter().next())
        .ok_or(ProviderError::MissingData("timeline interval"))?;

    let v = interval.values;

    Ok(WeatherRecord {
        provider: ProviderId::TomorrowIo,
        coordinates: at,
        location_name: None,
        condition: v.weather_code.map(condition_from_code).unwrap_or("Unknown").to_string(),
        temperature_c: v.temperature,
        feels_like_c: v.temperature_apparent.unwrap_or(v.temperature),
        humidity_pct: clamp_pct(v.humidity),
        wind_speed_kmh: mps_to_kmh(v.wind_speed),
        wind_direction_deg: v.wind_direction,
        wind_gust_kmh: v.wind_gust.map(mps_to_kmh),
        precipitation_mm: v.precipitation_intensity.unwrap_or(0.0),
        precipitation_type: precipitation_type(v.precipitation_type),
        precipitation_probability_pct: v.precipitation_probability.map(clamp_pct),
        uv_index: v.uv_index,
        cloud_cover_pct: v.cloud_cover.map(clamp_pct),
        // Already km with units=metric.
        visibility_km: v.visibility,
        air_quality_index: None,
        alerts: Vec::new(),
        confidence: DataConfidence::Full,
        observation_time: interval.start_time.unwrap_or_else(Utc::now),
    })
}

#[async_trait]
impl WeatherProvider for TomorrowIoProvider {
    fn id(&self) -> ProviderId {
        ProviderId::TomorrowIo
    }

    async fn fetch(&self, at: Coordinates) -> Result<WeatherRecord, ProviderError> {
        let url = format!("{}/timelines", trim_base(&self.base_url));
        let location = format!("{},{}", at.lat, at.lon);
        let fields = FIELDS.join(",");

        let request = self.http.get(url).query(&[
            ("location", location.as_str()),
            ("fields", fields.as_str()),
            ("timesteps", "current"),
            ("units", "metric"),
            ("apikey", self.api_key.as_str()),
        ]);

        let parsed: TmResponse = get_json(request).await?;
        map_response(at, parsed)
    }
}
