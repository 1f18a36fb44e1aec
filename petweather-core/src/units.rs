//! Unit conversions applied by adapters before building a [`crate::WeatherRecord`],
//! plus the reverse direction for imperial display.
//!
//! Nothing here rounds; rounding belongs to whoever prints the value.

pub fn mps_to_kmh(mps: f64) -> f64 {
    mps * 3.6
}

pub fn mph_to_kmh(mph: f64) -> f64 {
    mph * 1.609_344
}

pub fn fahrenheit_to_celsius(f: f64) -> f64 {
    (f - 32.0) * 5.0 / 9.0
}

pub fn meters_to_km(m: f64) -> f64 {
    m / 1000.0
}

pub fn celsius_to_fahrenheit(c: f64) -> f64 {
    c * 9.0 / 5.0 + 32.0
}

pub fn kmh_to_mph(kmh: f64) -> f64 {
    kmh / 1.609_344
}

pub fn mm_to_inches(mm: f64) -> f64 {
    mm / 25.4
}

/// Clamp a percentage into `0..=100`. Vendors occasionally report 100.4 and similar.
pub fn clamp_pct(pct: f64) -> f64 {
    pct.clamp(0.0, 100.0)
}
