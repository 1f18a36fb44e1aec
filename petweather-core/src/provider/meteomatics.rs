use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::{
    model::{Coordinates, DataConfidence, PrecipitationType, WeatherRecord},
    provider::{ProviderError, ProviderId, get_json, trim_base},
    units::{clamp_pct, meters_to_km, mps_to_kmh},
};

use super::WeatherProvider;

const T_2M: &str = "t_2m:C";
const T_APPARENT: &str = "t_apparent:C";
const HUMIDITY: &str = "relative_humidity_2m:p";
const WIND_SPEED: &str = "wind_speed_10m:ms";
const WIND_DIR: &str = "wind_dir_10m:d";
const WIND_GUST: &str = "wind_gusts_10m_1h:ms";
const PRECIP: &str = "precip_1h:mm";
const PRECIP_TYPE: &str = "precip_type:idx";
const CLOUD_COVER: &str = "total_cloud_cover:p";
const VISIBILITY: &str = "visibility:m";
const UV: &str = "uv:idx";

const PARAMETERS: &[&str] = &[
    T_2M,
    T_APPARENT,
    HUMIDITY,
    WIND_SPEED,
    WIND_DIR,
    WIND_GUST,
    PRECIP,
    PRECIP_TYPE,
    CLOUD_COVER,
    VISIBILITY,
    UV,
];

/// Meteomatics point query. The API key is `username:password` for HTTP basic auth.
#[derive(Debug, Clone)]
pub struct MeteomaticsProvider {
    username: String,
    password: String,
    base_url: String,
    http: Client,
}

impl MeteomaticsProvider {
    pub fn new(api_key: String, base_url: String, http: Client) -> Self {
        let (username, password) = match api_key.split_once(':') {
            Some((user, pass)) => (user.to_string(), pass.to_string()),
            None => (api_key, String::new()),
        };
        Self { username, password, base_url, http }
    }
}

#[derive(Debug, Deserialize)]
struct MmDate {
    date: Option<DateTime<Utc>>,
    value: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct MmCoordinate {
    dates: Vec<MmDate>,
}

#[derive(Debug, Deserialize)]
struct MmSeries {
    parameter: String,
    coordinates: Vec<MmCoordinate>,
}

#[derive(Debug, Deserialize)]
struct MmResponse {
    data: Vec<MmSeries>,
}

impl MmResponse {
    fn first_date(&self, parameter: &str) -> Option<&MmDate> {
        self.data
            .iter()
            .find(|s| s.parameter == parameter)
            .and_then(|s| s.coordinates.first())
            .and_then(|c| c.dates.first())
    }

    /// Meteomatics uses -999 as its "no data" marker.
    fn value(&self, parameter: &str) -> Option<f64> {
        self.first_date(parameter).and_then(|d| d.value).filter(|v| *v > -999.0)
    }
}

/// precip_type:idx codes: 0 none, 1 rain, 2 rain and snow, 3 snow, 4 sleet, 5 freezing rain, 6 hail.
fn precipitation_type(code: Option<f64>) -> PrecipitationType {
    match code.map(|c| c.round() as i64) {
        Some(1) | Some(2) => PrecipitationType::Rain,
        Some(3) => PrecipitationType::Snow,
        Some(4) => PrecipitationType::Sleet,
        Some(5) => PrecipitationType::FreezingRain,
        Some(6) => PrecipitationType::Hail,
        _ => PrecipitationType::None,
    }
}

fn map_response(at: Coordinates, parsed: MmResponse) -> Result<WeatherRecord, ProviderError> {
    let temperature_c = parsed.value(T_2M).ok_or(ProviderError::MissingData(T_2M))?;
    let humidity = parsed.value(HUMIDITY).ok_or(ProviderError::MissingData(HUMIDITY))?;
    let wind_speed = parsed.value(WIND_SPEED).ok_or(ProviderError::MissingData(WIND_SPEED))?;

    let observation_time =
        parsed.first_date(T_2M).and_then(|d| d.date).unwrap_or_else(Utc::now);

    Ok(WeatherRecord {
        provider: ProviderId::Meteomatics,
        coordinates: at,
        location_name: None,
        condition: "Unknown".to_string(),
        temperature_c,
        feels_like_c: parsed.value(T_APPARENT).unwrap_or(temperature_c),
        humidity_pct: clamp_pct(humidity),
        wind_speed_kmh: mps_to_kmh(wind_speed),
        wind_direction_deg: parsed.value(WIND_DIR),
        wind_gust_kmh: parsed.value(WIND_GUST).map(mps_to_kmh),
        precipitation_mm: parsed.value(PRECIP).unwrap_or(0.0),
        precipitation_type: precipitation_type(parsed.value(PRECIP_TYPE)),
        precipitation_probability_pct: None,
        uv_index: parsed.value(UV),
        cloud_cover_pct: parsed.value(CLOUD_COVER).map(clamp_pct),
        visibility_km: parsed.value(VISIBILITY).map(meters_to_km),
        air_quality_index: None,
        alerts: Vec::new(),
        confidence: DataConfidence::Full,
        observation_time,
    })
}

#[async_trait]
impl WeatherProvider for MeteomaticsProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Meteomatics
    }

    async fn fetch(&self, at: Coordinates) -> Result<WeatherRecord, ProviderError> {
        let now = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
        let url = format!(
            "{}/{}/{}/{},{}/json",
            trim_base(&self.base_url),
            now,
            PARAMETERS.join(","),
            at.lat,
            at.lon
        );

        let request = self.http.get(url).basic_auth(&self.username, Some(&self.password));

        let parsed: MmResponse = get_json(request).await?;
        map_response(at, parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{basic_auth, method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn series(parameter: &str, value: f64) -> serde_json::Value {
        serde_json::json!({
            "parameter": parameter,
            "coordinates": [{
                "lat": 47.37,
                "lon": 8.54,
                "dates": [{ "date": "2024-07-01T14:00:00Z", "value": value }]
            }]
        })
    }

    #[tokio::test]
    async fn maps_point_query_with_basic_auth() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path_regex(r"^/[0-9T:\-]+Z/.+/47\.37,8\.54/json$"))
            .and(basic_auth("user", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "version": "3.0",
                "status": "OK",
                "data": [
                    series(T_2M, 28.0),
                    series(T_APPARENT, 29.5),
                    series(HUMIDITY, 40.0),
                    series(WIND_SPEED, 2.5),
                    series(WIND_DIR, 90.0),
                    series(WIND_GUST, -999.0),
                    series(PRECIP, 0.0),
                    series(PRECIP_TYPE, 0.0),
                    series(CLOUD_COVER, 12.0),
                    series(VISIBILITY, 25000.0),
                    series(UV, 8.0)
                ]
            })))
            .mount(&server)
            .await;

        let provider =
            MeteomaticsProvider::new("user:secret".into(), server.uri(), Client::new());
        let at = Coordinates::new(47.37, 8.54).expect("valid");
        let record = provider.fetch(at).await.expect("fetch should succeed");

        assert_eq!(record.temperature_c, 28.0);
        assert!((record.wind_speed_kmh - 9.0).abs() < 1e-9);
        assert_eq!(record.wind_gust_kmh, None);
        assert_eq!(record.visibility_km, Some(25.0));
        assert_eq!(record.uv_index, Some(8.0));
        assert_eq!(record.observation_time.to_rfc3339(), "2024-07-01T14:00:00+00:00");
        assert!(record.is_plausible());
    }

    #[tokio::test]
    async fn missing_temperature_fails() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [series(HUMIDITY, 40.0), series(WIND_SPEED, 1.0)]
            })))
            .mount(&server)
            .await;

        let provider = MeteomaticsProvider::new("user:secret".into(), server.uri(), Client::new());
        let at = Coordinates::new(47.37, 8.54).expect("valid");
        let err = provider.fetch(at).await.unwrap_err();
        assert!(matches!(err, ProviderError::MissingData(T_2M)));
    }

    #[test]
    fn key_without_colon_is_username_only() {
        let provider = MeteomaticsProvider::new("onlyuser".into(), String::new(), Client::new());
        assert_eq!(provider.username, "onlyuser");
        assert_eq!(provider.password, "");
    }
}
