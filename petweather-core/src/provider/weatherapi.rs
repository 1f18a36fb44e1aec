use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::{
    model::{
        AlertSeverity, Coordinates, DataConfidence, PrecipitationType, WeatherAlert, WeatherRecord,
        parse_rfc3339,
    },
    provider::{ProviderError, ProviderId, get_json, trim_base},
    units::clamp_pct,
};

use super::WeatherProvider;

#[derive(Debug, Clone)]
pub struct WeatherApiProvider {
    api_key: String,
    base_url: String,
    http: Client,
}

impl WeatherApiProvider {
    pub fn new(api_key: String, base_url: String, http: Client) -> Self {
        Self { api_key, base_url, http }
    }
}

#[derive(Debug, Deserialize)]
struct WaLocation {
    name: String,
    country: String,
    localtime_epoch: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WaCondition {
    text: String,
}

#[derive(Debug, Deserialize)]
struct WaAirQuality {
    #[serde(rename = "us-epa-index")]
    us_epa_index: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct WaCurrent {
    temp_c: f64,
    feelslike_c: f64,
    humidity: f64,
    wind_kph: f64,
    wind_degree: Option<f64>,
    gust_kph: Option<f64>,
    precip_mm: Option<f64>,
    cloud: Option<f64>,
    vis_km: Option<f64>,
    uv: Option<f64>,
    condition: WaCondition,
    air_quality: Option<WaAirQuality>,
    last_updated_epoch: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WaAlert {
    headline: Option<String>,
    event: Option<String>,
    severity: Option<String>,
    desc: Option<String>,
    effective: Option<String>,
    expires: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WaAlerts {
    #[serde(default)]
    alert: Vec<WaAlert>,
}

#[derive(Debug, Deserialize)]
struct WaResponse {
    location: WaLocation,
    current: WaCurrent,
    #[serde(default)]
    alerts: WaAlerts,
}

fn map_alert(alert: WaAlert) -> WeatherAlert {
    let event = alert
        .event
        .or_else(|| alert.headline.clone())
        .unwrap_or_else(|| "Weather alert".to_string());

    WeatherAlert {
        event,
        severity: alert.severity.as_deref().map(AlertSeverity::from_vendor).unwrap_or_default(),
        headline: alert.headline,
        description: alert.desc.filter(|d| !d.trim().is_empty()),
        starts: parse_rfc3339(alert.effective.as_deref()),
        ends: parse_rfc3339(alert.expires.as_deref()),
    }
}

/// WeatherAPI.com reports conditions as text only; infer the precipitation kind from it.
fn precipitation_from_condition(text: &str, precip_mm: f64) -> PrecipitationType {
    let lower = text.to_lowercase();
    if lower.contains("freezing") {
        PrecipitationType::FreezingRain
    } else if lower.contains("sleet") || lower.contains("ice pellets") {
        PrecipitationType::Sleet
    } else if lower.contains("snow") || lower.contains("blizzard") {
        PrecipitationType::Snow
    } else if lower.contains("rain") || lower.contains("drizzle") || lower.contains("shower") {
        PrecipitationType::Rain
    } else if precip_mm > 0.0 {
        PrecipitationType::Rain
    } else {
        PrecipitationType::None
    }
}

fn map_response(at: Coordinates, parsed: WaResponse) -> WeatherRecord {
    let ts = parsed.current.last_updated_epoch.or(parsed.location.localtime_epoch);
    let observation_time = ts.and_then(|t| DateTime::from_timestamp(t, 0)).unwrap_or_else(Utc::now);

    let location_name = format!("{}, {}", parsed.location.name, parsed.location.country);
    let alerts = parsed.alerts.alert.into_iter().map(map_alert).collect();
    let current = parsed.current;
    let precipitation_mm = current.precip_mm.unwrap_or(0.0);

    // us-epa-index runs 1..=6; the canonical scale tops out at 5 (hazardous).
    let air_quality_index =
        current.air_quality.and_then(|aq| aq.us_epa_index).map(|i| i.clamp(1, 5));

    WeatherRecord {
        provider: ProviderId::WeatherApi,
        coordinates: at,
        location_name: Some(location_name),
        precipitation_type: precipitation_from_condition(&current.condition.text, precipitation_mm),
        condition: current.condition.text,
        temperature_c: current.temp_c,
        feels_like_c: current.feelslike_c,
        humidity_pct: clamp_pct(current.humidity),
        wind_speed_kmh: current.wind_kph,
        wind_direction_deg: current.wind_degree,
        wind_gust_kmh: current.gust_kph,
        precipitation_mm,
        precipitation_probability_pct: None,
        uv_index: current.uv,
        cloud_cover_pct: current.cloud.map(clamp_pct),
        visibility_km: current.vis_km,
        air_quality_index,
        alerts,
        confidence: DataConfidence::Full,
        observation_time,
    }
}

#[async_trait]
impl WeatherProvider for WeatherApiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::WeatherApi
    }

    async fn fetch(&self, at: Coordinates) -> Result<WeatherRecord, ProviderError> {
        // forecast.json carries the same `current` block plus active alerts.
        let url = format!("{}/forecast.json", trim_base(&self.base_url));
        let q = format!("{},{}", at.lat, at.lon);

        let request = self
            .http
            .get(url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("q", q.as_str()),
                ("days", "1"),
                ("aqi", "yes"),
                ("alerts", "yes"),
            ]);

        let parsed: WaResponse = get_json(request).await?;
        Ok(map_response(at, parsed))
    }
}
