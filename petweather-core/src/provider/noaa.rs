//! Keyless fallback backed by the US National Weather Service (api.weather.gov).
//!
//! Coverage is US-only and the forecast endpoints carry fewer fields than the
//! keyed providers, so records produced here are marked
//! [`DataConfidence::Reduced`].

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
    units::{clamp_pct, fahrenheit_to_celsius, mph_to_kmh},
};

use super::WeatherProvider;

/// Used when the hourly period carries no relative humidity.
const ASSUMED_HUMIDITY_PCT: f64 = 50.0;

#[derive(Debug, Clone)]
pub struct NoaaProvider {
    base_url: String,
    http: Client,
}

impl NoaaProvider {
    /// `http` must send a User-Agent; the service rejects anonymous clients.
    pub fn new(base_url: String, http: Client) -> Self {
        Self { base_url, http }
    }
}

#[derive(Debug, Deserialize)]
struct PointsResponse {
    properties: PointsProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PointsProperties {
    forecast: Option<String>,
    forecast_hourly: Option<String>,
    relative_location: Option<RelativeLocation>,
}

#[derive(Debug, Deserialize)]
struct RelativeLocation {
    properties: RelativeLocationProperties,
}

#[derive(Debug, Deserialize)]
struct RelativeLocationProperties {
    city: Option<String>,
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    properties: ForecastProperties,
}

#[derive(Debug, Deserialize)]
struct ForecastProperties {
    periods: Vec<ForecastPeriod>,
}

#[derive(Debug, Deserialize)]
struct QuantitativeValue {
    value: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForecastPeriod {
    start_time: Option<DateTime<chrono::FixedOffset>>,
    temperature: f64,
    temperature_unit: String,
    wind_speed: Option<String>,
    wind_direction: Option<String>,
    short_forecast: Option<String>,
    probability_of_precipitation: Option<QuantitativeValue>,
    relative_humidity: Option<QuantitativeValue>,
}

#[derive(Debug, Deserialize)]
struct AlertsResponse {
    #[serde(default)]
    features: Vec<AlertFeature>,
}

#[derive(Debug, Deserialize)]
struct AlertFeature {
    properties: AlertProperties,
}

#[derive(Debug, Deserialize)]
struct AlertProperties {
    event: String,
    severity: Option<String>,
    headline: Option<String>,
    description: Option<String>,
    onset: Option<String>,
    effective: Option<String>,
    ends: Option<String>,
    expires: Option<String>,
}

fn map_alert(p: AlertProperties) -> WeatherAlert {
    WeatherAlert {
        event: p.event,
        severity: p.severity.as_deref().map(AlertSeverity::from_vendor).unwrap_or_default(),
        headline: p.headline,
        description: p.description,
        starts: parse_rfc3339(p.onset.or(p.effective).as_deref()),
        ends: parse_rfc3339(p.ends.or(p.expires).as_deref()),
    }
}

/// "10 mph" or "5 to 10 mph" → the upper bound in km/h.
fn parse_wind_speed(raw: &str) -> Option<f64> {
    let mut numbers = raw
        .split(|c: char| !c.is_ascii_digit() && c != '.')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<f64>().ok());
    let first = numbers.next()?;
    let upper = numbers.last().unwrap_or(first);

    if raw.contains("km/h") { Some(upper) } else { Some(mph_to_kmh(upper)) }
}

fn compass_to_degrees(dir: &str) -> Option<f64> {
    const POINTS: [&str; 16] = [
        "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW",
        "NW", "NNW",
    ];
    let upper = dir.trim().to_uppercase();
    POINTS.iter().position(|p| *p == upper).map(|idx| idx as f64 * 22.5)
}

fn precipitation_from_forecast(text: &str) -> PrecipitationType {
    let lower = text.to_lowercase();
    if lower.contains("freezing") {
        PrecipitationType::FreezingRain
    } else if lower.contains("sleet") {
        PrecipitationType::Sleet
    } else if lower.contains("snow") {
        PrecipitationType::Snow
    } else if lower.contains("hail") {
        PrecipitationType::Hail
    } else if lower.contains("rain") || lower.contains("showers") || lower.contains("drizzle") {
        PrecipitationType::Rain
    } else {
        PrecipitationType::None
    }
}

fn map_period(
    at: Coordinates,
    period: ForecastPeriod,
    location: Option<RelativeLocationProperties>,
) -> WeatherRecord {
    let temperature_c = if period.temperature_unit.eq_ignore_ascii_case("F") {
        fahrenheit_to_celsius(period.temperature)
    } else {
        period.temperature
    };

    let location_name = location.and_then(|l| match (l.city, l.state) {
        (Some(city), Some(state)) => Some(format!("{city}, {state}")),
        (Some(city), None) => Some(city),
        _ => None,
    });

    let condition = period.short_forecast.unwrap_or_else(|| "Unknown".to_string());

    WeatherRecord {
        provider: ProviderId::Noaa,
        coordinates: at,
        location_name,
        precipitation_type: precipitation_from_forecast(&condition),
        condition,
        temperature_c,
        feels_like_c: temperature_c,
        humidity_pct: period
            .relative_humidity
            .and_then(|h| h.value)
            .map(clamp_pct)
            .unwrap_or(ASSUMED_HUMIDITY_PCT),
        wind_speed_kmh: period.wind_speed.as_deref().and_then(parse_wind_speed).unwrap_or(0.0),
        wind_direction_deg: period.wind_direction.as_deref().and_then(compass_to_degrees),
        wind_gust_kmh: None,
        precipitation_mm: 0.0,
        precipitation_probability_pct: period
            .probability_of_precipitation
            .and_then(|p| p.value)
            .map(clamp_pct),
        uv_index: None,
        cloud_cover_pct: None,
        visibility_km: None,
        air_quality_index: None,
        alerts: Vec::new(),
        confidence: DataConfidence::Reduced,
        observation_time: period
            .start_time
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now),
    }
}

#[async_trait]
impl WeatherProvider for NoaaProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Noaa
    }

    async fn fetch(&self, at: Coordinates) -> Result<WeatherRecord, ProviderError> {
        let points_url = format!("{}/points/{:.4},{:.4}", trim_base(&self.base_url), at.lat, at.lon);
        tracing::debug!("NOAA points request: {points_url}");

        let points: PointsResponse = get_json(self.http.get(&points_url)).await?;
        let props = points.properties;

        let forecast_url = props
            .forecast_hourly
            .or(props.forecast)
            .ok_or(ProviderError::MissingData("forecast URL"))?;

        tracing::debug!("NOAA forecast request: {forecast_url}");
        let forecast: ForecastResponse = get_json(self.http.get(&forecast_url)).await?;

        let period = forecast
            .properties
            .periods
            .into_iter()
            .next()
            .ok_or(ProviderError::MissingData("forecast period"))?;

        let mut record = map_period(at, period, props.relative_location.map(|r| r.properties));
        record.alerts = self.active_alerts(at).await;
        Ok(record)
    }
}

impl NoaaProvider {
    /// Active alerts for the point. Best-effort: a failure leaves the record without alerts.
    async fn active_alerts(&self, at: Coordinates) -> Vec<WeatherAlert> {
        let url = format!("{}/alerts/active", trim_base(&self.base_url));
        let point = format!("{:.4},{:.4}", at.lat, at.lon);

        match get_json::<AlertsResponse>(self.http.get(url).query(&[("point", point)])).await {
            Ok(res) => res.features.into_iter().map(|f| map_alert(f.properties)).collect(),
            Err(e) => {
                tracing::debug!("NOAA alerts unavailable for {at}: {e}");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn wind_speed_strings() {
        assert!((parse_wind_speed("10 mph").unwrap_or_default() - 16.09344).abs() < 1e-9);
        assert!((parse_wind_speed("5 to 10 mph").unwrap_or_default() - 16.09344).abs() < 1e-9);
        assert_eq!(parse_wind_speed("12 km/h"), Some(12.0));
        assert_eq!(parse_wind_speed("calm"), None);
    }

    #[test]
    fn compass_points() {
        assert_eq!(compass_to_degrees("N"), Some(0.0));
        assert_eq!(compass_to_degrees("sw"), Some(225.0));
        assert_eq!(compass_to_degrees("NNW"), Some(337.5));
        assert_eq!(compass_to_degrees("variable"), None);
    }

    #[tokio::test]
    async fn follows_points_to_hourly_forecast() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/points/38.8894,-77.0352"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "properties": {
                    "forecast": format!("{}/gridpoints/LWX/97,71/forecast", server.uri()),
                    "forecastHourly": format!("{}/gridpoints/LWX/97,71/forecast/hourly", server.uri()),
                    "relativeLocation": { "properties": { "city": "Washington", "state": "DC" } }
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/gridpoints/LWX/97,71/forecast/hourly"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "properties": { "periods": [{
                    "startTime": "2024-07-01T14:00:00-04:00",
                    "temperature": 95,
                    "temperatureUnit": "F",
                    "windSpeed": "5 to 10 mph",
                    "windDirection": "SW",
                    "shortForecast": "Chance Showers And Thunderstorms",
                    "probabilityOfPrecipitation": { "unitCode": "wmoUnit:percent", "value": 40 },
                    "relativeHumidity": { "unitCode": "wmoUnit:percent", "value": 55 }
                }]}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = NoaaProvider::new(server.uri(), Client::new());
        let at = Coordinates::new(38.8894, -77.0352).expect("valid");
        let record = provider.fetch(at).await.expect("fetch should succeed");

        assert_eq!(record.provider, ProviderId::Noaa);
        assert_eq!(record.confidence, DataConfidence::Reduced);
        assert_eq!(record.location_name.as_deref(), Some("Washington, DC"));
        assert!((record.temperature_c - 35.0).abs() < 1e-9);
        assert_eq!(record.humidity_pct, 55.0);
        assert_eq!(record.wind_direction_deg, Some(225.0));
        assert_eq!(record.precipitation_type, PrecipitationType::Rain);
        assert_eq!(record.precipitation_probability_pct, Some(40.0));
        assert_eq!(record.observation_time.to_rfc3339(), "2024-07-01T18:00:00+00:00");
        assert!(record.alerts.is_empty(), "alerts endpoint not mocked");
        assert!(record.is_plausible());
    }

    #[tokio::test]
    async fn attaches_active_alerts() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/points/33.4500,-112.0700"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "properties": { "forecast": format!("{}/gridpoints/PSR/159,57/forecast", server.uri()) }
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/gridpoints/PSR/159,57/forecast"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "properties": { "periods": [{
                    "temperature": 112,
                    "temperatureUnit": "F",
                    "windSpeed": "5 mph",
                    "shortForecast": "Sunny"
                }]}
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/alerts/active"))
            .and(query_param("point", "33.4500,-112.0700"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "features": [{ "properties": {
                    "event": "Extreme Heat Warning",
                    "severity": "Severe",
                    "headline": "Extreme Heat Warning until 8 PM",
                    "description": "Temperatures up to 115.",
                    "onset": "2024-07-01T10:00:00-07:00",
                    "ends": "2024-07-01T20:00:00-07:00"
                }}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = NoaaProvider::new(server.uri(), Client::new());
        let at = Coordinates::new(33.45, -112.07).expect("valid");
        let record = provider.fetch(at).await.expect("fetch should succeed");

        assert_eq!(record.alerts.len(), 1);
        let alert = &record.alerts[0];
        assert_eq!(alert.severity, AlertSeverity::Severe);
        assert!(alert.is_heat_warning());
        assert_eq!(alert.ends.map(|t| t.to_rfc3339()).as_deref(), Some("2024-07-02T03:00:00+00:00"));
    }

    #[tokio::test]
    async fn outside_coverage_is_an_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/points/51.5074,-0.1278"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "title": "Data Unavailable For Requested Point"
            })))
            .mount(&server)
            .await;

        let provider = NoaaProvider::new(server.uri(), Client::new());
        let at = Coordinates::new(51.5074, -0.1278).expect("valid");
        let err = provider.fetch(at).await.unwrap_err();
        assert!(matches!(err, ProviderError::Status { status: 404, .. }));
    }
}
