//! Forward geocoding: resolve a city name to coordinates.
//! Uses the Open-Meteo geocoding API - free, no API key required.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::fmt::Debug;

use crate::{model::Coordinates, provider::truncate_body};

pub const OPEN_METEO_GEOCODING_URL: &str = "https://geocoding-api.open-meteo.com/v1";

#[derive(Debug, Clone, PartialEq)]
pub struct GeocodedPlace {
    pub name: String,
    pub country: Option<String>,
    pub coordinates: Coordinates,
}

#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    #[error("geocoding request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("geocoding returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("geocoding response could not be parsed: {0}")]
    Parse(#[from] serde_json::Error),
}

#[async_trait]
pub trait Geocoder: Send + Sync + Debug {
    /// `Ok(None)` means the lookup worked but nothing matched.
    async fn resolve(&self, name: &str) -> Result<Option<GeocodedPlace>, GeocodeError>;
}

#[derive(Debug, Clone)]
pub struct OpenMeteoGeocoder {
    base_url: String,
    http: Client,
}

impl OpenMeteoGeocoder {
    pub fn new(base_url: String, http: Client) -> Self {
        Self { base_url, http }
    }
}

#[derive(Debug, Deserialize)]
struct OmResult {
    name: String,
    latitude: f64,
    longitude: f64,
    country: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OmResponse {
    #[serde(default)]
    results: Vec<OmResult>,
}

#[async_trait]
impl Geocoder for OpenMeteoGeocoder {
    async fn resolve(&self, name: &str) -> Result<Option<GeocodedPlace>, GeocodeError> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(None);
        }

        let url = format!("{}/search", self.base_url.trim_end_matches('/'));
        let res = self
            .http
            .get(url)
            .query(&[("name", name), ("count", "1"), ("language", "en"), ("format", "json")])
            .send()
            .await?;

        let status = res.status();
        let body = res.text().await?;
        if !status.is_success() {
            return Err(GeocodeError::Status { status: status.as_u16(), body: truncate_body(&body) });
        }

        let parsed: OmResponse = serde_json::from_str(&body)?;

        let place = parsed.results.into_iter().find_map(|r| {
            let coordinates = Coordinates::new(r.latitude, r.longitude).ok()?;
            Some(GeocodedPlace { name: r.name, country: r.country, coordinates })
        });

        match &place {
            Some(p) => tracing::debug!("Geocoded '{name}' to {} ({})", p.name, p.coordinates),
            None => tracing::debug!("No geocoding results for '{name}'"),
        }

        Ok(place)
    }
}
