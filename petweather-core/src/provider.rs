use crate::{
    Config, Coordinates, WeatherRecord,
    config::ServiceSettings,
    provider::{
        meteomatics::MeteomaticsProvider, noaa::NoaaProvider, openweather::OpenWeatherProvider,
        tomorrow::TomorrowIoProvider, visualcrossing::VisualCrossingProvider,
        weatherapi::WeatherApiProvider,
    },
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{convert::TryFrom, fmt::Debug, time::Duration};

pub mod meteomatics;
pub mod noaa;
pub mod openweather;
pub mod tomorrow;
pub mod visualcrossing;
pub mod weatherapi;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    OpenWeather,
    WeatherApi,
    TomorrowIo,
    VisualCrossing,
    Meteomatics,
    /// Keyless public fallback (api.weather.gov).
    Noaa,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenWeather => "openweather",
            ProviderId::WeatherApi => "weatherapi",
            ProviderId::TomorrowIo => "tomorrowio",
            ProviderId::VisualCrossing => "visualcrossing",
            ProviderId::Meteomatics => "meteomatics",
            ProviderId::Noaa => "noaa",
        }
    }

    pub const fn all() -> &'static [ProviderId] {
        &[
            ProviderId::OpenWeather,
            ProviderId::WeatherApi,
            ProviderId::TomorrowIo,
            ProviderId::VisualCrossing,
            ProviderId::Meteomatics,
            ProviderId::Noaa,
        ]
    }

    /// Providers that need an API key, i.e. everything except the fallback.
    pub const fn keyed() -> &'static [ProviderId] {
        &[
            ProviderId::OpenWeather,
            ProviderId::WeatherApi,
            ProviderId::TomorrowIo,
            ProviderId::VisualCrossing,
            ProviderId::Meteomatics,
        ]
    }

    pub fn requires_key(&self) -> bool {
        !matches!(self, ProviderId::Noaa)
    }

    pub fn default_priority(&self) -> u32 {
        match self {
            ProviderId::OpenWeather => 1,
            ProviderId::WeatherApi => 2,
            ProviderId::TomorrowIo => 3,
            ProviderId::VisualCrossing => 4,
            ProviderId::Meteomatics => 5,
            ProviderId::Noaa => 100,
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderId::OpenWeather => "https://api.openweathermap.org/data/2.5",
            ProviderId::WeatherApi => "https://api.weatherapi.com/v1",
            ProviderId::TomorrowIo => "https://api.tomorrow.io/v4",
            ProviderId::VisualCrossing => {
                "https://weather.visualcrossing.com/VisualCrossingWebServices/rest/services"
            }
            ProviderId::Meteomatics => "https://api.meteomatics.com",
            ProviderId::Noaa => "https://api.weather.gov",
        }
    }

    /// Environment variable that overrides the configured API key.
    pub fn env_var(&self) -> Option<&'static str> {
        match self {
            ProviderId::OpenWeather => Some("OPENWEATHER_API_KEY"),
            ProviderId::WeatherApi => Some("WEATHERAPI_KEY"),
            ProviderId::TomorrowIo => Some("TOMORROW_API_KEY"),
            ProviderId::VisualCrossing => Some("VISUALCROSSING_API_KEY"),
            ProviderId::Meteomatics => Some("METEOMATICS_CREDENTIALS"),
            ProviderId::Noaa => None,
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ProviderId {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.to_lowercase();

        match lower.as_str() {
            "openweather" => Ok(ProviderId::OpenWeather),
            "weatherapi" => Ok(ProviderId::WeatherApi),
            "tomorrowio" | "tomorrow" => Ok(ProviderId::TomorrowIo),
            "visualcrossing" => Ok(ProviderId::VisualCrossing),
            "meteomatics" => Ok(ProviderId::Meteomatics),
            "noaa" => Ok(ProviderId::Noaa),
            _ => Err(anyhow::anyhow!(
                "Unknown provider '{value}'. Supported providers: openweather, weatherapi, \
                 tomorrowio, visualcrossing, meteomatics, noaa."
            )),
        }
    }
}

/// Why a single provider could not produce a record.
///
/// The aggregator treats every variant the same way (try the next provider);
/// the distinction only shows up in logs.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("invalid coordinates ({lat}, {lon})")]
    InvalidCoordinates { lat: f64, lon: f64 },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("rate limited by provider")]
    RateLimited,

    #[error("malformed response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("response is missing {0}")]
    MissingData(&'static str),

    #[error("implausible record: {0}")]
    Implausible(String),
}

impl ProviderError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProviderError::Http(e) if e.is_timeout())
    }
}

#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    fn id(&self) -> ProviderId;

    async fn fetch(&self, at: Coordinates) -> Result<WeatherRecord, ProviderError>;
}

/// Shared HTTP client; every outbound call is bounded by the configured timeout.
pub fn build_http_client(settings: &ServiceSettings) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(settings.request_timeout_secs))
        .user_agent(settings.user_agent.as_str())
        .build()
}

/// Construct a keyed provider from config and explicit ProviderId.
pub fn provider_from_config(
    id: ProviderId,
    config: &Config,
    http: &Client,
) -> anyhow::Result<Box<dyn WeatherProvider>> {
    if !id.requires_key() {
        return Ok(fallback_from_config(config, http));
    }

    let api_key = config.provider_api_key(id).ok_or_else(|| {
        anyhow::anyhow!(
            "No API key configured for provider '{id}'.\n\
                 Hint: run `petweather configure {id}` or set {}.",
            id.env_var().unwrap_or("the provider key")
        )
    })?;
    let base_url = config.provider_base_url(id).to_owned();
    let api_key = api_key.to_owned();
    let http = http.clone();

    let boxed: Box<dyn WeatherProvider> = match id {
        ProviderId::OpenWeather => Box::new(OpenWeatherProvider::new(api_key, base_url, http)),
        ProviderId::WeatherApi => Box::new(WeatherApiProvider::new(api_key, base_url, http)),
        ProviderId::TomorrowIo => Box::new(TomorrowIoProvider::new(api_key, base_url, http)),
        ProviderId::VisualCrossing => {
            Box::new(VisualCrossingProvider::new(api_key, base_url, http))
        }
        ProviderId::Meteomatics => Box::new(MeteomaticsProvider::new(api_key, base_url, http)),
        ProviderId::Noaa => Box::new(NoaaProvider::new(base_url, http)),
    };

    Ok(boxed)
}

/// The keyless fallback provider.
pub fn fallback_from_config(config: &Config, http: &Client) -> Box<dyn WeatherProvider> {
    let base_url = config.provider_base_url(ProviderId::Noaa).to_owned();
    Box::new(NoaaProvider::new(base_url, http.clone()))
}

/// Every enabled keyed provider that has an API key, paired with its priority rank.
///
/// Keyless or disabled providers are skipped without constructing an adapter.
pub fn providers_from_config(
    config: &Config,
    http: &Client,
) -> Vec<(u32, Box<dyn WeatherProvider>)> {
    let mut providers: Vec<(u32, Box<dyn WeatherProvider>)> = ProviderId::keyed()
        .iter()
        .filter(|id| config.is_provider_enabled(**id))
        .filter_map(|id| match provider_from_config(*id, config, http) {
            Ok(p) => Some((config.provider_priority(*id), p)),
            Err(e) => {
                tracing::debug!(provider = %id, "skipping provider: {e}");
                None
            }
        })
        .collect();

    providers.sort_by_key(|(priority, _)| *priority);
    providers
}

/// Send a GET request and decode its JSON body, mapping every failure into a [`ProviderError`].
pub(crate) async fn get_json<T: DeserializeOwned>(
    request: RequestBuilder,
) -> Result<T, ProviderError> {
    let res = request.send().await?;

    let status = res.status();
    let body = res.text().await?;

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ProviderError::RateLimited);
    }
    if !status.is_success() {
        return Err(ProviderError::Status { status: status.as_u16(), body: truncate_body(&body) });
    }

    Ok(serde_json::from_str(&body)?)
}

pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

/// Trim a trailing slash so `format!("{base}/path")` never doubles it.
pub(crate) fn trim_base(url: &str) -> &str {
    url.trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn provider_id_as_str_roundtrip() {
        for id in ProviderId::all() {
            let s = id.as_str();
            let parsed = ProviderId::try_from(s).expect("roundtrip should succeed");
            assert_eq!(*id, parsed);
        }
    }

    #[test]
    fn unknown_provider_error() {
        let err = ProviderId::try_from("doesnotexist").unwrap_err();
        assert!(err.to_string().contains("Unknown provider"));
    }

    #[test]
    fn fallback_is_the_only_keyless_provider() {
        let keyless: Vec<_> = ProviderId::all().iter().filter(|id| !id.requires_key()).collect();
        assert_eq!(keyless, vec![&ProviderId::Noaa]);
        assert!(!ProviderId::keyed().contains(&ProviderId::Noaa));
    }

    #[test]
    fn default_priorities_are_a_total_order() {
        let mut ranks: Vec<u32> = ProviderId::all().iter().map(|id| id.default_priority()).collect();
        ranks.sort_unstable();
        ranks.dedup();
        assert_eq!(ranks.len(), ProviderId::all().len());
    }

    #[test]
    fn provider_from_config_errors_when_missing_api_key() {
        let cfg = Config::default();
        let http = Client::new();
        let err = provider_from_config(ProviderId::OpenWeather, &cfg, &http).unwrap_err();
        assert!(err.to_string().contains("No API key configured for provider"));
    }

    #[test]
    fn provider_from_config_builds_fallback_without_key() {
        let cfg = Config::default();
        let http = Client::new();
        let provider = provider_from_config(ProviderId::Noaa, &cfg, &http).expect("keyless");
        assert_eq!(provider.id(), ProviderId::Noaa);
    }

    #[test]
    fn empty_key_is_treated_as_missing() {
        let mut cfg = Config::default();
        cfg.upsert_provider_api_key(ProviderId::WeatherApi, "   ".to_string());
        let http = Client::new();
        assert!(provider_from_config(ProviderId::WeatherApi, &cfg, &http).is_err());
    }

    #[test]
    fn providers_from_config_skips_keyless_and_disabled_and_sorts() {
        let mut cfg = Config::default();
        cfg.upsert_provider_api_key(ProviderId::Meteomatics, "user:pass".to_string());
        cfg.upsert_provider_api_key(ProviderId::WeatherApi, "KEY".to_string());
        cfg.upsert_provider_api_key(ProviderId::TomorrowIo, "KEY".to_string());
        cfg.set_provider_enabled(ProviderId::TomorrowIo, false);

        let http = Client::new();
        let ids: Vec<ProviderId> =
            providers_from_config(&cfg, &http).iter().map(|(_, p)| p.id()).collect();

        assert_eq!(ids, vec![ProviderId::WeatherApi, ProviderId::Meteomatics]);
    }

    #[tokio::test]
    async fn slow_response_is_a_timeout() {
        use wiremock::{Mock, MockServer, ResponseTemplate, matchers::method};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let settings = ServiceSettings { request_timeout_secs: 1, ..ServiceSettings::default() };
        let http = build_http_client(&settings).expect("client");
        let provider = OpenWeatherProvider::new("KEY".into(), server.uri(), http);

        let at = Coordinates::new(51.5, -0.12).expect("valid");
        let err = provider.fetch(at).await.unwrap_err();
        assert!(err.is_timeout(), "expected a timeout, got {err}");
    }

    #[test]
    fn truncate_body_respects_char_boundaries() {
        let long = "é".repeat(300);
        let truncated = truncate_body(&long);
        assert!(truncated.ends_with("..."));
        assert_eq!(truncated.chars().count(), 203);
        assert_eq!(truncate_body("short"), "short");
    }
}
