//! Pet-safety advice derived from a [`WeatherRecord`].
//!
//! Everything here is a pure function of its input: no I/O, no clock, no
//! hidden state. Missing or non-finite inputs never fail; the affected
//! hazard falls back to [`RiskLevel::Moderate`].

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::model::{AlertSeverity, DataConfidence, PrecipitationType, WeatherAlert, WeatherRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    VeryHigh,
    Extreme,
}

impl RiskLevel {
    pub fn score(&self) -> u8 {
        match self {
            RiskLevel::Low => 20,
            RiskLevel::Moderate => 50,
            RiskLevel::High => 80,
            RiskLevel::VeryHigh => 90,
            RiskLevel::Extreme => 100,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Moderate => "moderate",
            RiskLevel::High => "high",
            RiskLevel::VeryHigh => "very high",
            RiskLevel::Extreme => "extreme",
        }
    }

    fn is_high_or_worse(&self) -> bool {
        *self >= RiskLevel::High
    }
}

/// Hazards in evaluation order; earlier entries win ties for the limiting hazard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hazard {
    Heat,
    Cold,
    Uv,
    AirQuality,
    Wind,
    Precipitation,
}

impl Hazard {
    pub const ORDER: [Hazard; 6] = [
        Hazard::Heat,
        Hazard::Cold,
        Hazard::Uv,
        Hazard::AirQuality,
        Hazard::Wind,
        Hazard::Precipitation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Hazard::Heat => "heat",
            Hazard::Cold => "cold",
            Hazard::Uv => "UV",
            Hazard::AirQuality => "air quality",
            Hazard::Wind => "wind",
            Hazard::Precipitation => "precipitation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HazardRisk {
    pub hazard: Hazard,
    pub level: RiskLevel,
    pub score: u8,
    pub factors: Vec<String>,
    pub mitigation: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyRating {
    Excellent,
    Good,
    Fair,
    Poor,
    Dangerous,
}

impl SafetyRating {
    pub fn from_score(score: u8) -> Self {
        match score {
            90.. => SafetyRating::Excellent,
            70..=89 => SafetyRating::Good,
            50..=69 => SafetyRating::Fair,
            30..=49 => SafetyRating::Poor,
            _ => SafetyRating::Dangerous,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalkSafety {
    Safe,
    Caution,
    Unsafe,
    Emergency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationPriority {
    Medium,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationCategory {
    HeatProtection,
    Hydration,
    PawProtection,
    ColdProtection,
    Warmth,
    UvProtection,
    AirQuality,
    WindSafety,
    WetConditions,
    SevereWeather,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority: RecommendationPriority,
    pub category: RecommendationCategory,
    pub message: String,
    pub action_required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityWindow {
    pub label: String,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PetSafetyAssessment {
    pub overall: SafetyRating,
    /// 0 (dangerous) to 100 (ideal).
    pub safety_score: u8,
    pub walk_safety: WalkSafety,

    pub heat: HazardRisk,
    pub cold: HazardRisk,
    pub uv: HazardRisk,
    pub air_quality: HazardRisk,
    pub wind: HazardRisk,
    pub precipitation: HazardRisk,

    /// First hazard (in [`Hazard::ORDER`]) at the worst level; `None` when everything is low.
    pub limiting_hazard: Option<Hazard>,
    pub recommendations: Vec<Recommendation>,
    pub paw_protection_needed: bool,
    pub walk_windows: Vec<ActivityWindow>,
    /// Event names of the alerts active for the record, e.g. "Excessive Heat Warning".
    pub active_alerts: Vec<String>,
    /// Set for fallback data; bands are computed the same way but rest on fewer measurements.
    pub reduced_confidence: bool,
}

impl PetSafetyAssessment {
    pub fn hazards(&self) -> [&HazardRisk; 6] {
        [&self.heat, &self.cold, &self.uv, &self.air_quality, &self.wind, &self.precipitation]
    }

    pub fn hazard(&self, hazard: Hazard) -> &HazardRisk {
        match hazard {
            Hazard::Heat => &self.heat,
            Hazard::Cold => &self.cold,
            Hazard::Uv => &self.uv,
            Hazard::AirQuality => &self.air_quality,
            Hazard::Wind => &self.wind,
            Hazard::Precipitation => &self.precipitation,
        }
    }

    pub fn has_recommendation(&self, category: RecommendationCategory) -> bool {
        self.recommendations.iter().any(|r| r.category == category)
    }
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

/// Rothfusz regression with Celsius coefficients; below 27 °C the air temperature is returned.
pub fn heat_index_c(temp_c: f64, humidity_pct: f64) -> f64 {
    if temp_c < 27.0 {
        return temp_c;
    }

    const C1: f64 = -8.784_694_755_56;
    const C2: f64 = 1.611_394_11;
    const C3: f64 = 2.338_548_838_89;
    const C4: f64 = -0.146_116_05;
    const C5: f64 = -0.012_308_094;
    const C6: f64 = -0.016_424_827_777_8;
    const C7: f64 = 0.002_211_732;
    const C8: f64 = 0.000_725_46;
    const C9: f64 = -0.000_003_582;

    let t = temp_c;
    let r = humidity_pct;
    C1 + C2 * t
        + C3 * r
        + C4 * t * r
        + C5 * t * t
        + C6 * r * r
        + C7 * t * t * r
        + C8 * t * r * r
        + C9 * t * t * r * r
}

fn risk(hazard: Hazard, level: RiskLevel, factors: Vec<String>, mitigation: &[&str]) -> HazardRisk {
    HazardRisk {
        hazard,
        level,
        score: level.score(),
        factors,
        mitigation: mitigation.iter().map(|m| m.to_string()).collect(),
    }
}

fn unknown(hazard: Hazard, what: &str) -> HazardRisk {
    risk(
        hazard,
        RiskLevel::Moderate,
        vec![format!("{what} unavailable")],
        &["Watch your pet closely for signs of discomfort"],
    )
}

fn heat_risk(record: &WeatherRecord) -> HazardRisk {
    let (Some(t), Some(rh)) = (finite(record.temperature_c), finite(record.humidity_pct)) else {
        return unknown(Hazard::Heat, "Temperature or humidity");
    };

    let hi = heat_index_c(t, rh);
    let level = if hi > 40.0 {
        RiskLevel::Extreme
    } else if hi > 35.0 {
        RiskLevel::High
    } else if hi > 30.0 {
        RiskLevel::Moderate
    } else {
        RiskLevel::Low
    };

    risk(
        Hazard::Heat,
        level,
        vec![format!("{hi:.1}°C heat index")],
        &["Stay hydrated", "Avoid peak heat hours"],
    )
}

fn cold_risk(record: &WeatherRecord) -> HazardRisk {
    let Some(t) = finite(record.temperature_c) else {
        return unknown(Hazard::Cold, "Temperature");
    };

    let level = if t < -10.0 {
        RiskLevel::Extreme
    } else if t < 0.0 {
        RiskLevel::High
    } else if t < 10.0 {
        RiskLevel::Moderate
    } else {
        RiskLevel::Low
    };

    risk(
        Hazard::Cold,
        level,
        vec![format!("{t:.1}°C temperature")],
        &["Limit exposure time", "Provide warmth"],
    )
}

fn uv_risk(record: &WeatherRecord) -> HazardRisk {
    let Some(uv) = record.uv_index.and_then(finite).filter(|v| *v >= 0.0) else {
        return unknown(Hazard::Uv, "UV index");
    };

    // Bands use the whole-number index as published.
    let level = match uv.round() as u32 {
        0..=2 => RiskLevel::Low,
        3..=5 => RiskLevel::Moderate,
        6..=7 => RiskLevel::High,
        8..=10 => RiskLevel::VeryHigh,
        _ => RiskLevel::Extreme,
    };

    risk(Hazard::Uv, level, vec![format!("UV index {uv:.1}")], &["Apply sunscreen", "Seek shade"])
}

fn air_quality_risk(record: &WeatherRecord) -> HazardRisk {
    let Some(aqi) = record.air_quality_index.filter(|a| *a >= 1) else {
        return unknown(Hazard::AirQuality, "Air quality");
    };

    let level = match aqi {
        1..=2 => RiskLevel::Low,
        3 => RiskLevel::Moderate,
        4 => RiskLevel::High,
        _ => RiskLevel::Extreme,
    };

    risk(
        Hazard::AirQuality,
        level,
        vec![format!("AQI {aqi}")],
        &["Limit outdoor exposure", "Monitor breathing"],
    )
}

fn wind_risk(record: &WeatherRecord) -> HazardRisk {
    let Some(speed) = finite(record.wind_speed_kmh) else {
        return unknown(Hazard::Wind, "Wind speed");
    };

    let level = if speed >= 60.0 {
        RiskLevel::Extreme
    } else if speed >= 40.0 {
        RiskLevel::High
    } else if speed >= 25.0 {
        RiskLevel::Moderate
    } else {
        RiskLevel::Low
    };

    let mut factors = vec![format!("{speed:.1} km/h wind")];
    if let Some(gust) = record.wind_gust_kmh.and_then(finite) {
        factors.push(format!("gusts to {gust:.1} km/h"));
    }

    risk(Hazard::Wind, level, factors, &["Use a secure harness", "Avoid exposed areas"])
}

fn precipitation_risk(record: &WeatherRecord) -> HazardRisk {
    let Some(mm) = finite(record.precipitation_mm) else {
        return unknown(Hazard::Precipitation, "Precipitation");
    };

    let mut level = if mm >= 50.0 {
        RiskLevel::Extreme
    } else if mm >= 10.0 {
        RiskLevel::High
    } else if mm >= 2.5 {
        RiskLevel::Moderate
    } else {
        RiskLevel::Low
    };

    // Ice and hail are hazardous at any rate.
    let icy = matches!(
        record.precipitation_type,
        PrecipitationType::FreezingRain | PrecipitationType::Hail
    );
    if icy && mm > 0.0 {
        level = level.max(RiskLevel::High);
    }

    let mut factors = vec![format!("{mm:.1} mm precipitation")];
    if record.precipitation_type != PrecipitationType::None {
        factors.push(format!("{:?}", record.precipitation_type).to_lowercase());
    }

    risk(
        Hazard::Precipitation,
        level,
        factors,
        &["Dry your pet after walks", "Keep walks short"],
    )
}

fn overall(worst: RiskLevel) -> (u8, WalkSafety) {
    match worst {
        RiskLevel::Low => (95, WalkSafety::Safe),
        RiskLevel::Moderate => (75, WalkSafety::Safe),
        RiskLevel::High => (40, WalkSafety::Unsafe),
        RiskLevel::VeryHigh => (30, WalkSafety::Unsafe),
        RiskLevel::Extreme => (20, WalkSafety::Emergency),
    }
}

/// The least restrictive walk rating active alerts allow: heat and cold warnings
/// make walks unsafe, any other severe alert calls for caution.
fn alert_floor(alerts: &[WeatherAlert]) -> Option<(u8, WalkSafety)> {
    if alerts.iter().any(|a| a.is_heat_warning() || a.is_cold_warning()) {
        Some((40, WalkSafety::Unsafe))
    } else if alerts.iter().any(|a| a.severity >= AlertSeverity::Severe) {
        Some((55, WalkSafety::Caution))
    } else {
        None
    }
}

fn priority_for(level: RiskLevel) -> RecommendationPriority {
    if level >= RiskLevel::VeryHigh {
        RecommendationPriority::Urgent
    } else {
        RecommendationPriority::High
    }
}

fn recommend(
    out: &mut Vec<Recommendation>,
    priority: RecommendationPriority,
    category: RecommendationCategory,
    message: &str,
    action_required: bool,
) {
    out.push(Recommendation { priority, category, message: message.to_string(), action_required });
}

fn recommendations(record: &WeatherRecord, a: &PetSafetyAssessment) -> Vec<Recommendation> {
    use RecommendationCategory as Cat;
    use RecommendationPriority as Pri;

    let mut out = Vec::new();

    let alerts = &record.alerts;
    if alerts.iter().any(WeatherAlert::is_heat_warning) {
        recommend(&mut out, Pri::Urgent, Cat::HeatProtection, "Heat warning in effect: avoid outdoor activities", true);
    }
    if alerts.iter().any(WeatherAlert::is_cold_warning) {
        recommend(&mut out, Pri::Urgent, Cat::ColdProtection, "Cold weather warning in effect: keep walks brief", true);
    }
    if alerts
        .iter()
        .any(|a| a.severity >= AlertSeverity::Severe && !a.is_heat_warning() && !a.is_cold_warning())
    {
        recommend(&mut out, Pri::High, Cat::SevereWeather, "Severe weather alert in effect: check local warnings before heading out", true);
    }

    if a.heat.level.is_high_or_worse() {
        let p = priority_for(a.heat.level);
        recommend(&mut out, p, Cat::HeatProtection, "Avoid walks during peak heat hours (10am-4pm)", true);
        recommend(&mut out, Pri::Medium, Cat::Hydration, "Bring water for both you and your pet", true);
        recommend(&mut out, Pri::High, Cat::PawProtection, "Check pavement temperature before walking", true);
    }

    if a.cold.level.is_high_or_worse() {
        let p = priority_for(a.cold.level);
        recommend(&mut out, p, Cat::ColdProtection, "Limit outdoor time in extreme cold", true);
        recommend(&mut out, Pri::Medium, Cat::Warmth, "Consider a pet jacket for warmth", false);
        if record.temperature_c < -5.0 {
            recommend(&mut out, Pri::High, Cat::PawProtection, "Protect paws from ice and de-icing salt", true);
        }
    }

    if a.uv.level.is_high_or_worse() {
        let p = priority_for(a.uv.level);
        recommend(&mut out, p, Cat::UvProtection, "Apply pet-safe sunscreen to exposed areas", true);
        recommend(&mut out, Pri::Medium, Cat::UvProtection, "Seek shaded routes during walks", false);
    }

    if a.air_quality.level.is_high_or_worse() {
        let p = priority_for(a.air_quality.level);
        recommend(&mut out, p, Cat::AirQuality, "Reduce outdoor exercise intensity", true);
    }

    if a.wind.level.is_high_or_worse() {
        let p = priority_for(a.wind.level);
        recommend(&mut out, p, Cat::WindSafety, "Secure the leash and avoid open areas", true);
    }

    if a.precipitation.level.is_high_or_worse() {
        let p = priority_for(a.precipitation.level);
        let message = if a.precipitation.level == RiskLevel::Extreme {
            "Stay indoors until conditions improve"
        } else {
            "Wet conditions: dry your pet thoroughly after walks"
        };
        recommend(&mut out, p, Cat::WetConditions, message, a.precipitation.level == RiskLevel::Extreme);
    }

    out
}

fn window(label: &str, start: u32, end: u32) -> ActivityWindow {
    ActivityWindow {
        label: label.to_string(),
        start: NaiveTime::from_hms_opt(start, 0, 0).unwrap_or_default(),
        end: NaiveTime::from_hms_opt(end, 0, 0).unwrap_or_default(),
    }
}

/// Two or three windows depending on whether it is hot/bright, cold, or comfortable.
pub fn recommended_walk_windows(record: &WeatherRecord) -> Vec<ActivityWindow> {
    let t = finite(record.temperature_c);
    let uv = record.uv_index.and_then(finite).unwrap_or(0.0);

    match t {
        Some(t) if t > 25.0 || uv > 6.0 => vec![
            window("Early morning", 5, 8),
            window("Late evening", 19, 22),
        ],
        Some(t) if t < 10.0 => vec![
            window("Midday", 11, 14),
            window("Early afternoon", 14, 16),
        ],
        _ => vec![
            window("Morning", 7, 10),
            window("Late afternoon", 16, 19),
            window("Evening", 19, 21),
        ],
    }
}

/// Compute the full assessment. Never fails; identical input gives identical output.
pub fn compute_pet_safety(record: &WeatherRecord) -> PetSafetyAssessment {
    let heat = heat_risk(record);
    let cold = cold_risk(record);
    let uv = uv_risk(record);
    let air_quality = air_quality_risk(record);
    let wind = wind_risk(record);
    let precipitation = precipitation_risk(record);

    let mut worst = (None, RiskLevel::Low);
    for risk in [&heat, &cold, &uv, &air_quality, &wind, &precipitation] {
        if risk.level > worst.1 {
            worst = (Some(risk.hazard), risk.level);
        }
    }
    let (limiting_hazard, worst_level) = worst;
    let (mut safety_score, mut walk_safety) = overall(worst_level);
    if let Some((floor_score, floor)) = alert_floor(&record.alerts) {
        if floor > walk_safety {
            walk_safety = floor;
            safety_score = safety_score.min(floor_score);
        }
    }

    let mut assessment = PetSafetyAssessment {
        overall: SafetyRating::from_score(safety_score),
        safety_score,
        walk_safety,
        heat,
        cold,
        uv,
        air_quality,
        wind,
        precipitation,
        limiting_hazard,
        recommendations: Vec::new(),
        paw_protection_needed: record.temperature_c > 30.0 || record.temperature_c < 0.0,
        walk_windows: recommended_walk_windows(record),
        active_alerts: record.alerts.iter().map(|a| a.event.clone()).collect(),
        reduced_confidence: record.confidence == DataConfidence::Reduced,
    };
    assessment.recommendations = recommendations(record, &assessment);
    assessment
}
