use anyhow::{Context, bail};
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use inquire::{Password, PasswordDisplayMode};
use petweather_core::{
    Config, PetSafetyAssessment, ProviderId, WeatherRecord, WeatherService,
    compute_pet_safety,
    safety::{HazardRisk, RiskLevel},
    units::{celsius_to_fahrenheit, kmh_to_mph, mm_to_inches},
};

/// Display units. Lookups always run in metric; this only changes printing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Units {
    #[default]
    Metric,
    Imperial,
}

impl Units {
    fn temperature(self, c: f64) -> String {
        match self {
            Units::Metric => format!("{}°C", c.round()),
            Units::Imperial => format!("{}°F", celsius_to_fahrenheit(c).round()),
        }
    }

    fn speed(self, kmh: f64) -> String {
        match self {
            Units::Metric => format!("{} km/h", kmh.round()),
            Units::Imperial => format!("{} mph", kmh_to_mph(kmh).round()),
        }
    }

    fn rainfall(self, mm: f64) -> String {
        match self {
            Units::Metric => format!("{} mm/h", mm.round()),
            Units::Imperial => format!("{:.2} in/h", mm_to_inches(mm)),
        }
    }
}

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "petweather", version, about = "Weather and pet-safety advice")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure credentials for a specific provider.
    Configure {
        /// Provider short name, e.g. "openweather" or "weatherapi".
        provider: String,
    },

    /// List providers in the order they are tried.
    Providers,

    /// Include a provider in lookups again.
    Enable { provider: String },

    /// Skip a provider without removing its key.
    Disable { provider: String },

    /// Show current weather and pet-safety advice for a location.
    Show {
        #[arg(long, allow_negative_numbers = true, requires = "lon", conflicts_with = "city")]
        lat: Option<f64>,

        #[arg(long, allow_negative_numbers = true, requires = "lat")]
        lon: Option<f64>,

        /// City name, resolved through geocoding.
        #[arg(long)]
        city: Option<String>,

        /// Print the raw record and assessment as JSON.
        #[arg(long)]
        json: bool,

        /// Units for human-readable output; JSON is always metric.
        #[arg(long, value_enum, default_value_t = Units::Metric)]
        units: Units,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Configure { provider } => configure(&provider),
            Command::Providers => {
                list_providers(&Config::load()?);
                Ok(())
            }
            Command::Enable { provider } => toggle(&provider, true),
            Command::Disable { provider } => toggle(&provider, false),
            Command::Show { lat, lon, city, json, units } => {
                show(lat, lon, city, json, units).await
            }
        }
    }
}

fn configure(provider: &str) -> anyhow::Result<()> {
    let id = ProviderId::try_from(provider)?;
    if !id.requires_key() {
        println!("{id} does not need an API key.");
        return Ok(());
    }

    let prompt = match id {
        ProviderId::Meteomatics => format!("{id} credentials (username:password):"),
        _ => format!("{id} API key:"),
    };

    let api_key = Password::new(&prompt)
        .without_confirmation()
        .with_display_mode(PasswordDisplayMode::Masked)
        .prompt()
        .context("Failed to read API key")?;

    let api_key = api_key.trim().to_string();
    if api_key.is_empty() {
        bail!("API key must not be empty");
    }

    let mut config = Config::load()?;
    config.upsert_provider_api_key(id, api_key);
    config.save()?;
    tracing::info!(provider = %id, "API key saved");

    println!("Saved {id} credentials to {}", Config::config_file_path()?.display());
    Ok(())
}

fn toggle(provider: &str, enabled: bool) -> anyhow::Result<()> {
    let id = ProviderId::try_from(provider)?;
    let mut config = Config::load()?;
    config.set_provider_enabled(id, enabled);
    config.save()?;
    tracing::info!(provider = %id, enabled, "provider toggled in config");

    println!("{id} {}", if enabled { "enabled" } else { "disabled" });
    Ok(())
}

fn list_providers(config: &Config) {
    let mut ids: Vec<ProviderId> = ProviderId::all().to_vec();
    ids.sort_by_key(|id| config.provider_priority(*id));

    println!("{:<16} {:>8} {:>9} {:>12}", "Provider", "Priority", "Enabled", "Configured");
    println!("{}", "-".repeat(48));
    for id in ids {
        let configured = if !id.requires_key() {
            "no key"
        } else if config.is_provider_configured(id) {
            "yes"
        } else {
            "no"
        };
        let enabled = if !id.requires_key() && !config.service.fallback_enabled {
            false
        } else {
            config.is_provider_enabled(id)
        };

        println!(
            "{:<16} {:>8} {:>9} {:>12}",
            id.as_str(),
            config.provider_priority(id),
            if enabled { "yes" } else { "no" },
            configured
        );
    }
}

async fn show(
    lat: Option<f64>,
    lon: Option<f64>,
    city: Option<String>,
    json: bool,
    units: Units,
) -> anyhow::Result<()> {
    let config = Config::load()?;
    let service = WeatherService::from_config(&config)?;
    tracing::debug!(
        providers = service.provider_status().len(),
        fallback = service.has_fallback(),
        "service ready"
    );

    let record = match (lat, lon, city) {
        (Some(lat), Some(lon), _) => service.current_weather(lat, lon).await,
        (_, _, Some(city)) => service.weather_by_city(&city).await,
        _ => bail!("Pass either --lat and --lon, or --city"),
    };

    let Some(record) = record else {
        println!("Weather unavailable. Check your provider keys with `petweather providers`.");
        return Ok(());
    };

    let assessment = compute_pet_safety(&record);

    if json {
        let out = serde_json::json!({ "weather": record, "safety": assessment });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print_record(&record, units);
        println!();
        print_assessment(&assessment);
    }

    tracing::debug!(metrics = ?service.metrics(), "lookup finished");
    service.shutdown();
    Ok(())
}

fn print_record(r: &WeatherRecord, units: Units) {
    let place = r.location_name.clone().unwrap_or_else(|| r.coordinates.to_string());
    let observed = r.observation_time.with_timezone(&Local).format("%Y-%m-%d %H:%M");

    println!("{place} ({observed}, via {})", r.provider);
    println!("  {}", r.condition);
    println!(
        "  Temperature: {} (feels like {})",
        units.temperature(r.temperature_c),
        units.temperature(r.feels_like_c)
    );
    println!("  Humidity:    {}%", r.humidity_pct.round());
    match r.wind_gust_kmh {
        Some(gust) => println!(
            "  Wind:        {}, gusts {}",
            units.speed(r.wind_speed_kmh),
            units.speed(gust)
        ),
        None => println!("  Wind:        {}", units.speed(r.wind_speed_kmh)),
    }
    if r.precipitation_mm > 0.0 {
        println!("  Rainfall:    {}", units.rainfall(r.precipitation_mm));
    }
    if let Some(uv) = r.uv_index {
        println!("  UV index:    {}", uv.round());
    }
    if let Some(aqi) = r.air_quality_index {
        println!("  Air quality: {aqi}/5");
    }
    for alert in &r.alerts {
        let text = alert.headline.as_deref().unwrap_or(&alert.event);
        println!("  Alert ({:?}): {text}", alert.severity);
    }
}

fn level_label(risk: &HazardRisk) -> String {
    let marker = if risk.level >= RiskLevel::High { "!" } else { " " };
    format!("{marker} {:<14} {}", risk.hazard.as_str(), risk.level.as_str())
}

fn print_assessment(a: &PetSafetyAssessment) {
    println!("Pet safety: {:?} ({}/100), walks {:?}", a.overall, a.safety_score, a.walk_safety);
    if a.reduced_confidence {
        println!("  (based on limited fallback data)");
    }

    for risk in a.hazards() {
        println!("  {}", level_label(risk));
    }

    if !a.recommendations.is_empty() {
        println!("Recommendations:");
        for rec in &a.recommendations {
            println!("  [{:?}] {}", rec.priority, rec.message);
        }
    }

    if a.paw_protection_needed {
        println!("Paw protection recommended.");
    }

    let windows: Vec<String> = a
        .walk_windows
        .iter()
        .map(|w| format!("{} {}-{}", w.label, w.start.format("%H:%M"), w.end.format("%H:%M")))
        .collect();
    println!("Best walk times: {}", windows.join(", "));
}
