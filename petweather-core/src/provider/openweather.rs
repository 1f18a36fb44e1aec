use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;

use crate::{
    model::{Coordinates, DataConfidence, PrecipitationType, WeatherRecord},
    provider::{ProviderError, ProviderId, get_json, trim_base},
    units::{clamp_pct, meters_to_km, mps_to_kmh},
};

use super::WeatherProvider;

/// OpenWeatherMap: current conditions plus the air pollution endpoint.
#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    api_key: String,
    base_url: String,
    http: Client,
}

impl OpenWeatherProvider {
    pub fn new(api_key: String, base_url: String, http: Client) -> Self {
        Self { api_key, base_url, http }
    }

    async fn fetch_current(&self, at: Coordinates) -> Result<OwCurrentResponse, ProviderError> {
        let url = format!("{}/weather", trim_base(&self.base_url));

        let request = self.http.get(url).query(&[
            ("lat", at.lat.to_string()),
            ("lon", at.lon.to_string()),
            ("appid", self.api_key.clone()),
            ("units", "metric".to_string()),
        ]);

        get_json(request).await
    }

    /// Air quality is optional; a failure here never fails the whole fetch.
    async fn fetch_air_quality(&self, at: Coordinates) -> Option<u8> {
        let url = format!("{}/air_pollution", trim_base(&self.base_url));

        let request = self.http.get(url).query(&[
            ("lat", at.lat.to_string()),
            ("lon", at.lon.to_string()),
            ("appid", self.api_key.clone()),
        ]);

        match get_json::<OwAirResponse>(request).await {
            Ok(parsed) => parsed.list.first().map(|entry| entry.main.aqi.clamp(1, 5)),
            Err(e) => {
                tracing::debug!(provider = "openweather", "air pollution lookup failed: {e}");
                None
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: f64,
    feels_like: f64,
    humidity: f64,
}

#[derive(Debug, Deserialize)]
struct OwWeather {
    main: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct OwWind {
    speed: f64,
    deg: Option<f64>,
    gust: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwClouds {
    all: f64,
}

#[derive(Debug, Deserialize)]
struct OwCurrentResponse {
    name: Option<String>,
    dt: i64,
    main: OwMain,
    #[serde(default)]
    weather: Vec<OwWeather>,
    wind: OwWind,
    clouds: Option<OwClouds>,
    visibility: Option<f64>,
    rain: Option<HashMap<String, f64>>,
    snow: Option<HashMap<String, f64>>,
}

#[derive(Debug, Deserialize)]
struct OwAirMain {
    aqi: u8,
}

#[derive(Debug, Deserialize)]
struct OwAirEntry {
    main: OwAirMain,
}

#[derive(Debug, Deserialize)]
struct OwAirResponse {
    list: Vec<OwAirEntry>,
}

fn map_current(at: Coordinates, parsed: OwCurrentResponse, aqi: Option<u8>) -> WeatherRecord {
    let observation_time = DateTime::from_timestamp(parsed.dt, 0).unwrap_or_else(Utc::now);

    let condition = parsed
        .weather
        .first()
        .map(|w| if w.description.is_empty() { w.main.clone() } else { w.description.clone() })
        .unwrap_or_else(|| "Unknown".to_string());

    let rain = parsed.rain.as_ref().and_then(|r| r.get("1h").copied());
    let snow = parsed.snow.as_ref().and_then(|s| s.get("1h").copied());
    let (precipitation_mm, precipitation_type) = match (rain, snow) {
        (Some(mm), _) => (mm, PrecipitationType::Rain),
        (None, Some(mm)) => (mm, PrecipitationType::Snow),
        (None, None) => (0.0, PrecipitationType::None),
    };

    WeatherRecord {
        provider: ProviderId::OpenWeather,
        coordinates: at,
        location_name: parsed.name.filter(|n| !n.is_empty()),
        condition,
        temperature_c: parsed.main.temp,
        feels_like_c: parsed.main.feels_like,
        humidity_pct: clamp_pct(parsed.main.humidity),
        wind_speed_kmh: mps_to_kmh(parsed.wind.speed),
        wind_direction_deg: parsed.wind.deg,
        wind_gust_kmh: parsed.wind.gust.map(mps_to_kmh),
        precipitation_mm,
        precipitation_type,
        precipitation_probability_pct: None,
        uv_index: None,
        cloud_cover_pct: parsed.clouds.map(|c| clamp_pct(c.all)),
        visibility_km: parsed.visibility.map(meters_to_km),
        air_quality_index: aqi,
        alerts: Vec::new(),
        confidence: DataConfidence::Full,
        observation_time,
    }
}

#[async_trait]
impl WeatherProvider for OpenWeatherProvider {
    fn id(&self) -> ProviderId {
        ProviderId::OpenWeather
    }

    async fn fetch(&self, at: Coordinates) -> Result<WeatherRecord, ProviderError> {
        let current = self.fetch_current(at).await?;
        let aqi = self.fetch_air_quality(at).await;
        Ok(map_current(at, current, aqi))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn current_body() -> serde_json::Value {
        serde_json::json!({
            "coord": { "lat": 51.51, "lon": -0.13 },
            "weather": [{ "id": 500, "main": "Rain", "description": "light rain" }],
            "main": { "temp": 14.2, "feels_like": 13.1, "humidity": 82, "pressure": 1012 },
            "visibility": 8000,
            "wind": { "speed": 5.0, "deg": 240, "gust": 9.0 },
            "clouds": { "all": 90 },
            "rain": { "1h": 1.2 },
            "dt": 1700000000,
            "name": "London"
        })
    }

    fn at() -> Coordinates {
        Coordinates::new(51.51, -0.13).expect("valid")
    }

    #[tokio::test]
    async fn maps_current_and_air_quality() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/weather"))
            .and(query_param("appid", "KEY"))
            .and(query_param("units", "metric"))
            .respond_with(ResponseTemplate::new(200).set_body_json(current_body()))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/air_pollution"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "list": [{ "main": { "aqi": 2 } }] })),
            )
            .mount(&server)
            .await;

        let provider = OpenWeatherProvider::new("KEY".into(), server.uri(), Client::new());
        let record = provider.fetch(at()).await.expect("fetch should succeed");

        assert_eq!(record.provider, ProviderId::OpenWeather);
        assert_eq!(record.location_name.as_deref(), Some("London"));
        assert_eq!(record.condition, "light rain");
        assert!((record.wind_speed_kmh - 18.0).abs() < 1e-9);
        assert_eq!(record.wind_gust_kmh.map(|g| (g * 10.0).round() / 10.0), Some(32.4));
        assert_eq!(record.visibility_km, Some(8.0));
        assert_eq!(record.precipitation_type, PrecipitationType::Rain);
        assert_eq!(record.precipitation_mm, 1.2);
        assert_eq!(record.air_quality_index, Some(2));
        assert!(record.is_plausible());
    }

    #[tokio::test]
    async fn air_quality_failure_is_not_fatal() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/weather"))
            .respond_with(ResponseTemplate::new(200).set_body_json(current_body()))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/air_pollution"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let provider = OpenWeatherProvider::new("KEY".into(), server.uri(), Client::new());
        let record = provider.fetch(at()).await.expect("current weather is enough");
        assert_eq!(record.air_quality_index, None);
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/weather"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
            .mount(&server)
            .await;

        let provider = OpenWeatherProvider::new("BAD".into(), server.uri(), Client::new());
        let err = provider.fetch(at()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Status { status: 401, .. }));
    }

    #[tokio::test]
    async fn rate_limit_is_reported() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/weather"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let provider = OpenWeatherProvider::new("KEY".into(), server.uri(), Client::new());
        let err = provider.fetch(at()).await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited));
    }

    #[tokio::test]
    async fn malformed_body_is_a_parse_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/weather"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"main\": {}}"))
            .mount(&server)
            .await;

        let provider = OpenWeatherProvider::new("KEY".into(), server.uri(), Client::new());
        let err = provider.fetch(at()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Parse(_)));
    }
}
