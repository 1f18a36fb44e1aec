//! The aggregator: ordered failover across providers, a keyless fallback,
//! and a TTL cache in front of both.
//!
//! Callers only ever see `Option<WeatherRecord>`; individual provider errors
//! are logged and absorbed here.

use anyhow::Context;
use parking_lot::Mutex;
use serde::Serialize;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    Config,
    config::ServiceSettings,
    cache::{CacheKey, TtlCache},
    geocode::{Geocoder, OPEN_METEO_GEOCODING_URL, OpenMeteoGeocoder},
    model::{Coordinates, WeatherRecord},
    provider::{
        ProviderError, ProviderId, WeatherProvider, build_http_client, fallback_from_config,
        providers_from_config,
    },
    safety::{PetSafetyAssessment, compute_pet_safety},
};

/// Longest a 429 benches a provider, whatever the configured window.
const MAX_BLOCK: Duration = Duration::from_secs(24 * 60 * 60);

/// Shortest background refresh period; `tokio::time::interval` rejects zero.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RateLimit {
    requests: u32,
    window: Duration,
}

#[derive(Debug)]
struct RateWindow {
    started: Instant,
    used: u32,
    blocked_until: Option<Instant>,
}

#[derive(Debug)]
struct ProviderSlot {
    id: ProviderId,
    priority: u32,
    enabled: AtomicBool,
    provider: Box<dyn WeatherProvider>,
    window: Mutex<RateWindow>,
}

impl ProviderSlot {
    fn new(priority: u32, provider: Box<dyn WeatherProvider>) -> Self {
        Self {
            id: provider.id(),
            priority,
            enabled: AtomicBool::new(true),
            provider,
            window: Mutex::new(RateWindow { started: Instant::now(), used: 0, blocked_until: None }),
        }
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Take one request from the current window; `false` means the slot must be skipped.
    fn try_acquire(&self, limit: RateLimit) -> bool {
        let now = Instant::now();
        let mut window = self.window.lock();

        if let Some(until) = window.blocked_until {
            if now < until {
                return false;
            }
            window.blocked_until = None;
        }

        if now.saturating_duration_since(window.started) >= limit.window {
            window.started = now;
            window.used = 0;
        }

        if window.used >= limit.requests {
            return false;
        }
        window.used += 1;
        true
    }

    /// The provider answered 429: sit out a whole window.
    fn block(&self, limit: RateLimit) {
        let now = Instant::now();
        let until = now.checked_add(limit.window.min(MAX_BLOCK)).unwrap_or(now);
        self.window.lock().blocked_until = Some(until);
    }

    fn is_rate_limited(&self, limit: RateLimit) -> bool {
        let now = Instant::now();
        let window = self.window.lock();
        if window.blocked_until.is_some_and(|until| now < until) {
            return true;
        }
        now.saturating_duration_since(window.started) < limit.window
            && window.used >= limit.requests
    }
}

#[derive(Debug, Default)]
struct Counters {
    total_calls: AtomicU64,
    cache_hits: AtomicU64,
    failovers: AtomicU64,
    fallbacks: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Snapshot of the service counters. Observability only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ServiceMetrics {
    /// Lookups that missed the cache and went to providers.
    pub total_calls: u64,
    pub cache_hits: u64,
    /// Provider attempts that failed and moved on to the next one.
    pub failovers: u64,
    pub fallbacks: u64,
    pub cached_entries: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderStatus {
    pub id: ProviderId,
    pub priority: u32,
    pub enabled: bool,
    pub rate_limited: bool,
}

/// Builder for [`WeatherService`]; [`WeatherService::from_config`] covers the usual setup.
#[derive(Debug)]
pub struct WeatherServiceBuilder {
    providers: Vec<(u32, Box<dyn WeatherProvider>)>,
    fallback: Option<Box<dyn WeatherProvider>>,
    geocoder: Option<Arc<dyn Geocoder>>,
    cache_ttl: Duration,
    rate_limit: RateLimit,
    request_timeout: Duration,
}

impl Default for WeatherServiceBuilder {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            fallback: None,
            geocoder: None,
            cache_ttl: Duration::from_secs(300),
            rate_limit: RateLimit { requests: 1000, window: Duration::from_secs(60) },
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Open-Meteo geocoder on its own client, bounded by `timeout` like provider calls.
fn default_geocoder(base_url: &str, timeout: Duration) -> Arc<dyn Geocoder> {
    let settings = ServiceSettings {
        request_timeout_secs: timeout.as_secs().max(1),
        ..ServiceSettings::default()
    };
    let http = build_http_client(&settings).unwrap_or_else(|e| {
        tracing::warn!("Failed to build geocoding client, using defaults: {e}");
        reqwest::Client::new()
    });
    Arc::new(OpenMeteoGeocoder::new(base_url.to_string(), http))
}

impl WeatherServiceBuilder {
    pub fn provider(mut self, priority: u32, provider: Box<dyn WeatherProvider>) -> Self {
        self.providers.push((priority, provider));
        self
    }

    pub fn fallback(mut self, provider: Box<dyn WeatherProvider>) -> Self {
        self.fallback = Some(provider);
        self
    }

    pub fn geocoder(mut self, geocoder: Arc<dyn Geocoder>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn rate_limit(mut self, requests: u32, window: Duration) -> Self {
        self.rate_limit = RateLimit { requests, window };
        self
    }

    /// Timeout for the default geocoder's client. Providers bring their own clients.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn build(self) -> WeatherService {
        let mut slots: Vec<ProviderSlot> = self
            .providers
            .into_iter()
            .map(|(priority, provider)| ProviderSlot::new(priority, provider))
            .collect();
        // Stable, so equal priorities keep insertion order.
        slots.sort_by_key(|slot| slot.priority);

        let timeout = self.request_timeout;
        let geocoder = self
            .geocoder
            .unwrap_or_else(|| default_geocoder(OPEN_METEO_GEOCODING_URL, timeout));

        WeatherService {
            slots,
            fallback: self.fallback,
            geocoder,
            cache: TtlCache::new(self.cache_ttl),
            rate_limit: self.rate_limit,
            counters: Counters::default(),
        }
    }
}

#[derive(Debug)]
pub struct WeatherService {
    slots: Vec<ProviderSlot>,
    fallback: Option<Box<dyn WeatherProvider>>,
    geocoder: Arc<dyn Geocoder>,
    cache: TtlCache<CacheKey, WeatherRecord>,
    rate_limit: RateLimit,
    counters: Counters,
}

impl WeatherService {
    pub fn builder() -> WeatherServiceBuilder {
        WeatherServiceBuilder::default()
    }

    /// Build every configured provider, the fallback (unless disabled) and the geocoder,
    /// all sharing one HTTP client.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let settings = &config.service;
        let http = build_http_client(settings).context("Failed to build HTTP client")?;

        let mut builder = Self::builder()
            .cache_ttl(Duration::from_secs(settings.cache_ttl_secs))
            .request_timeout(Duration::from_secs(settings.request_timeout_secs))
            .rate_limit(
                settings.rate_limit_requests,
                Duration::from_secs(settings.rate_limit_window_secs),
            )
            .geocoder(Arc::new(OpenMeteoGeocoder::new(
                OPEN_METEO_GEOCODING_URL.to_string(),
                http.clone(),
            )));

        for (priority, provider) in providers_from_config(config, &http) {
            builder = builder.provider(priority, provider);
        }

        if settings.fallback_enabled && config.is_provider_enabled(ProviderId::Noaa) {
            builder = builder.fallback(fallback_from_config(config, &http));
        }

        let service = builder.build();
        if service.slots.is_empty() {
            tracing::warn!("No keyed weather providers configured; only the fallback is available");
        }
        Ok(service)
    }

    /// Current conditions at a point, from cache or the first provider that answers.
    pub async fn current_weather(&self, lat: f64, lon: f64) -> Option<WeatherRecord> {
        let at = match Coordinates::new(lat, lon) {
            Ok(at) => at,
            Err(e) => {
                tracing::warn!("Rejecting weather request: {e}");
                return None;
            }
        };

        self.lookup(at).await.map(|(record, _)| record)
    }

    /// Cached or fresh record for `at`, with the instant it was fetched.
    async fn lookup(&self, at: Coordinates) -> Option<(WeatherRecord, Instant)> {
        let key = CacheKey::coords(at);
        if let Some(hit) = self.cache.get_with_captured(&key) {
            bump(&self.counters.cache_hits);
            tracing::debug!(key = %key, "cache hit");
            return Some(hit);
        }

        let record = self.fetch_uncached(at).await?;
        let captured = Instant::now();
        self.cache.insert_at(key, record.clone(), captured);
        Some((record, captured))
    }

    /// Geocode a city name, then look up its weather. Cached under the normalised name.
    pub async fn weather_by_city(&self, name: &str) -> Option<WeatherRecord> {
        if name.trim().is_empty() {
            tracing::warn!("Rejecting weather request for an empty city name");
            return None;
        }

        let key = CacheKey::city(name);
        if let Some(hit) = self.cache.get(&key) {
            bump(&self.counters.cache_hits);
            tracing::debug!(key = %key, "cache hit");
            return Some(hit);
        }

        let place = match self.geocoder.resolve(name).await {
            Ok(Some(place)) => place,
            Ok(None) => {
                tracing::warn!("No location found for '{}'", name.trim());
                return None;
            }
            Err(e) => {
                tracing::warn!("Geocoding '{}' failed: {e}", name.trim());
                return None;
            }
        };

        // The city entry expires with the coordinate entry it was copied from.
        let (mut record, captured) = self.lookup(place.coordinates).await?;
        if record.location_name.is_none() {
            record.location_name = Some(place.name);
        }

        self.cache.insert_at(key, record.clone(), captured);
        Some(record)
    }

    pub async fn assess(&self, lat: f64, lon: f64) -> Option<(WeatherRecord, PetSafetyAssessment)> {
        let record = self.current_weather(lat, lon).await?;
        let assessment = compute_pet_safety(&record);
        Some((record, assessment))
    }

    /// Toggle a provider at runtime. Returns `false` if no slot has that id.
    pub fn set_provider_enabled(&self, id: ProviderId, enabled: bool) -> bool {
        match self.slots.iter().find(|slot| slot.id == id) {
            Some(slot) => {
                slot.enabled.store(enabled, Ordering::Relaxed);
                tracing::info!(provider = %id, enabled, "provider toggled");
                true
            }
            None => false,
        }
    }

    /// Slots in the order they are tried.
    pub fn provider_status(&self) -> Vec<ProviderStatus> {
        self.slots
            .iter()
            .map(|slot| ProviderStatus {
                id: slot.id,
                priority: slot.priority,
                enabled: slot.is_enabled(),
                rate_limited: slot.is_rate_limited(self.rate_limit),
            })
            .collect()
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    pub fn metrics(&self) -> ServiceMetrics {
        ServiceMetrics {
            total_calls: self.counters.total_calls.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            failovers: self.counters.failovers.load(Ordering::Relaxed),
            fallbacks: self.counters.fallbacks.load(Ordering::Relaxed),
            cached_entries: self.cache.len(),
        }
    }

    /// Re-fetch `locations` every `interval` so their cache entries stay warm.
    /// The first pass runs immediately.
    pub fn spawn_refresh(
        self: &Arc<Self>,
        locations: Vec<Coordinates>,
        interval: Duration,
    ) -> RefreshHandle {
        let interval = if interval < MIN_REFRESH_INTERVAL {
            tracing::warn!(
                "Refresh interval {interval:?} is too short, using {MIN_REFRESH_INTERVAL:?}"
            );
            MIN_REFRESH_INTERVAL
        } else {
            interval
        };

        let token = CancellationToken::new();
        let service = Arc::clone(self);
        let cancel = token.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        for at in &locations {
                            service.refresh(*at).await;
                        }
                        service.cache.purge_expired();
                    }
                }
            }
            tracing::debug!("refresh task stopped");
        });

        RefreshHandle { token, task }
    }

    /// Drop all cached records.
    pub fn shutdown(&self) {
        self.cache.clear();
        tracing::info!("weather service shut down");
    }

    async fn refresh(&self, at: Coordinates) {
        match self.fetch_uncached(at).await {
            Some(record) => self.cache.insert(CacheKey::coords(at), record),
            None => tracing::warn!("Background refresh for {at} produced no data"),
        }
    }

    async fn fetch_uncached(&self, at: Coordinates) -> Option<WeatherRecord> {
        bump(&self.counters.total_calls);

        for slot in &self.slots {
            if !slot.is_enabled() {
                tracing::debug!(provider = %slot.id, "skipping disabled provider");
                continue;
            }
            if !slot.try_acquire(self.rate_limit) {
                tracing::debug!(provider = %slot.id, "skipping rate-limited provider");
                continue;
            }

            tracing::debug!(provider = %slot.id, "fetching weather for {at}");
            match attempt(slot.provider.as_ref(), at).await {
                Ok(record) => {
                    tracing::info!(provider = %slot.id, "weather fetched for {at}");
                    return Some(record);
                }
                Err(e) => {
                    if matches!(e, ProviderError::RateLimited) {
                        slot.block(self.rate_limit);
                    }
                    if e.is_timeout() {
                        tracing::warn!(provider = %slot.id, "provider timed out for {at}");
                    } else {
                        tracing::warn!(provider = %slot.id, "provider failed: {e}");
                    }
                    bump(&self.counters.failovers);
                }
            }
        }

        if let Some(fallback) = &self.fallback {
            bump(&self.counters.fallbacks);
            tracing::debug!(provider = %fallback.id(), "trying fallback for {at}");
            match attempt(fallback.as_ref(), at).await {
                Ok(record) => {
                    tracing::info!(provider = %fallback.id(), "weather fetched from fallback for {at}");
                    return Some(record);
                }
                Err(e) => tracing::warn!(provider = %fallback.id(), "fallback failed: {e}"),
            }
        }

        tracing::error!("All weather providers exhausted for {at}");
        None
    }
}

async fn attempt(
    provider: &dyn WeatherProvider,
    at: Coordinates,
) -> Result<WeatherRecord, ProviderError> {
    let record = provider.fetch(at).await?;
    record.validate().map_err(ProviderError::Implausible)?;
    Ok(record)
}

/// Handle to a task started by [`WeatherService::spawn_refresh`].
#[derive(Debug)]
pub struct RefreshHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the task and wait for it to finish its current pass.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!("refresh task ended abnormally: {e}");
        }
    }
}
