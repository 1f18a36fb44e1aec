use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::{
    model::{Coordinates, DataConfidence, PrecipitationType, WeatherRecord},
    provider::{ProviderError, ProviderId, get_json, trim_base},
    units::clamp_pct,
};

use super::WeatherProvider;

#[derive(Debug, Clone)]
pub struct VisualCrossingProvider {
    api_key: String,
    base_url: String,
    http: Client,
}

impl VisualCrossingProvider {
    pub fn new(api_key: String, base_url: String, http: Client) -> Self {
        Self { api_key, base_url, http }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VcCurrent {
    datetime_epoch: Option<i64>,
    temp: f64,
    feelslike: Option<f64>,
    humidity: f64,
    windspeed: Option<f64>,
    winddir: Option<f64>,
    windgust: Option<f64>,
    precip: Option<f64>,
    preciptype: Option<Vec<String>>,
    precipprob: Option<f64>,
    cloudcover: Option<f64>,
    visibility: Option<f64>,
    uvindex: Option<f64>,
    conditions: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VcResponse {
    resolved_address: Option<String>,
    current_conditions: Option<VcCurrent>,
}

fn map_response(at: Coordinates, parsed: VcResponse) -> Result<WeatherRecord, ProviderError> {
    let current =
        parsed.current_conditions.ok_or(ProviderError::MissingData("currentConditions"))?;

    let observation_time = current
        .datetime_epoch
        .and_then(|t| DateTime::from_timestamp(t, 0))
        .unwrap_or_else(Utc::now);

    let precipitation_type = current
        .preciptype
        .as_ref()
        .and_then(|types| types.first())
        .map(|t| PrecipitationType::from_vendor(t))
        .unwrap_or_default();

    Ok(WeatherRecord {
        provider: ProviderId::VisualCrossing,
        coordinates: at,
        // The API echoes "lat,lon" back when queried by coordinates, which is not a name.
        location_name: parsed.resolved_address.filter(|a| a.chars().any(char::is_alphabetic)),
        condition: current.conditions.unwrap_or_else(|| "Unknown".to_string()),
        temperature_c: current.temp,
        feels_like_c: current.feelslike.unwrap_or(current.temp),
        humidity_pct: clamp_pct(current.humidity),
        // unitGroup=metric already reports km/h and km.
        wind_speed_kmh: current.windspeed.unwrap_or(0.0),
        wind_direction_deg: current.winddir,
        wind_gust_kmh: current.windgust,
        precipitation_mm: current.precip.unwrap_or(0.0),
        precipitation_type,
        precipitation_probability_pct: current.precipprob.map(clamp_pct),
        uv_index: current.uvindex,
        cloud_cover_pct: current.cloudcover.map(clamp_pct),
        visibility_km: current.visibility,
        air_quality_index: None,
        alerts: Vec::new(),
        confidence: DataConfidence::Full,
        observation_time,
    })
}

#[async_trait]
impl WeatherProvider for VisualCrossingProvider {
    fn id(&self) -> ProviderId {
        ProviderId::VisualCrossing
    }

    async fn fetch(&self, at: Coordinates) -> Result<WeatherRecord, ProviderError> {
        let url = format!("{}/timeline/{},{}", trim_base(&self.base_url), at.lat, at.lon);

        let request = self.http.get(url).query(&[
            ("unitGroup", "metric"),
            ("key", self.api_key.as_str()),
            ("include", "current"),
            ("contentType", "json"),
        ]);

        let parsed: VcResponse = get_json(request).await?;
        map_response(at, parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn maps_current_conditions() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/timeline/48.85,2.35"))
            .and(query_param("key", "KEY"))
            .and(query_param("unitGroup", "metric"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "resolvedAddress": "Paris, Île-de-France, France",
                "currentConditions": {
                    "datetimeEpoch": 1700000000,
                    "temp": 9.0,
                    "feelslike": 6.5,
                    "humidity": 88.4,
                    "windspeed": 22.3,
                    "winddir": 250.0,
                    "windgust": 40.1,
                    "precip": 3.2,
                    "preciptype": ["rain"],
                    "precipprob": 100.0,
                    "cloudcover": 100.0,
                    "visibility": 7.5,
                    "uvindex": 0,
                    "conditions": "Rain, Overcast"
                }
            })))
            .mount(&server)
            .await;

        let provider = VisualCrossingProvider::new("KEY".into(), server.uri(), Client::new());
        let at = Coordinates::new(48.85, 2.35).expect("valid");
        let record = provider.fetch(at).await.expect("fetch should succeed");

        assert_eq!(record.location_name.as_deref(), Some("Paris, Île-de-France, France"));
        assert_eq!(record.wind_speed_kmh, 22.3);
        assert_eq!(record.precipitation_type, PrecipitationType::Rain);
        assert_eq!(record.uv_index, Some(0.0));
        assert_eq!(record.observation_time.timestamp(), 1700000000);
        assert!(record.is_plausible());
    }

    #[tokio::test]
    async fn missing_current_conditions_is_an_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/timeline/1,2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "resolvedAddress": "1,2",
                "days": []
            })))
            .mount(&server)
            .await;

        let provider = VisualCrossingProvider::new("KEY".into(), server.uri(), Client::new());
        let at = Coordinates::new(1.0, 2.0).expect("valid");
        let err = provider.fetch(at).await.unwrap_err();
        assert!(matches!(err, ProviderError::MissingData("currentConditions")));
    }
}
