//! Core library for the `petweather` CLI.
//!
//! This crate defines:
//! - Configuration & credentials handling
//! - Provider adapters behind a common trait, plus a keyless fallback
//! - The aggregating [`WeatherService`] with failover and a TTL cache
//! - Pet-safety advice computed from a [`WeatherRecord`]
//!
//! It is used by `petweather-cli`, but can also be embedded in other binaries or services.

pub mod cache;
pub mod config;
pub mod geocode;
pub mod model;
pub mod provider;
pub mod safety;
pub mod service;
pub mod units;

pub use cache::{CacheKey, TtlCache};
pub use config::{Config, ProviderConfig, ServiceSettings};
pub use geocode::{GeocodedPlace, Geocoder, OpenMeteoGeocoder};
pub use model::{
    AlertSeverity, Coordinates, DataConfidence, PrecipitationType, WeatherAlert, WeatherRecord,
};
pub use provider::{ProviderError, ProviderId, WeatherProvider};
pub use safety::{PetSafetyAssessment, RiskLevel, SafetyRating, WalkSafety, compute_pet_safety};
pub use service::{ProviderStatus, RefreshHandle, ServiceMetrics, WeatherService};
