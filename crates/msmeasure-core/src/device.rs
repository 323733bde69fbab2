//! Simulated devices and the translation of random samples into readings.
//!
//! A device works in integer *device units*. One unit is `10^precision_offset`
//! of the physical quantity, so a thermometer with offset `-1` counts tenths of
//! a degree. Readings are quantized to `precision_divisor` units and always lie
//! in `[scale_max - scale_range, scale_max]`.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::ConfigError;

/// Upper bound (exclusive) of the sample domain produced by random sources.
pub const SAMPLE_DOMAIN: i64 = 100;

/// Kind of simulated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Temperature in degrees Celsius.
    Thermometer,
    /// Relative humidity in percent.
    Hygrometer,
}

impl DeviceKind {
    /// Unit label attached to every reading of this kind.
    pub fn unit(self) -> &'static str {
        match self {
            Self::Thermometer => "°C",
            Self::Hygrometer => "%",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Thermometer => write!(f, "thermometer"),
            Self::Hygrometer => write!(f, "hygrometer"),
        }
    }
}

impl FromStr for DeviceKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "thermometer" => Ok(Self::Thermometer),
            "hygrometer" => Ok(Self::Hygrometer),
            _ => Err(ConfigError::InvalidDeviceKind(s.to_string())),
        }
    }
}

/// Immutable description of the simulated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub kind: DeviceKind,
    pub address: String,
    /// Largest reportable value, in device units.
    pub scale_max: i64,
    /// Width of the reportable range, in device units.
    pub scale_range: i64,
    /// Decimal exponent of one device unit.
    pub precision_offset: i32,
    /// Quantization step, in device units.
    pub precision_divisor: i64,
}

impl DeviceConfig {
    /// Thermometer reporting `-20.0 … 40.0 °C` in half-degree steps.
    pub fn thermometer(address: impl Into<String>) -> Self {
        Self {
            kind: DeviceKind::Thermometer,
            address: address.into(),
            scale_max: 400,
            scale_range: 600,
            precision_offset: -1,
            precision_divisor: 5,
        }
    }

    /// Hygrometer reporting `0.00 … 100.00 %` in whole percent.
    pub fn hygrometer(address: impl Into<String>) -> Self {
        Self {
            kind: DeviceKind::Hygrometer,
            address: address.into(),
            scale_max: 10_000,
            scale_range: 10_000,
            precision_offset: -2,
            precision_divisor: 100,
        }
    }

    /// Built-in scaling constants for `kind`.
    pub fn for_kind(kind: DeviceKind, address: impl Into<String>) -> Self {
        match kind {
            DeviceKind::Thermometer => Self::thermometer(address),
            DeviceKind::Hygrometer => Self::hygrometer(address),
        }
    }

    /// Smallest reportable value, in device units.
    pub fn minimum(&self) -> i64 {
        self.scale_max.saturating_sub(self.scale_range.max(0))
    }

    /// Largest reportable value, in device units.
    pub fn maximum(&self) -> i64 {
        self.scale_max
    }

    /// Render a device-unit value with this device's fixed precision.
    pub fn format_units(&self, units: i64) -> String {
        format_fixed(units, self.precision_offset)
    }
}

/// A translated, bounded measurement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceReading {
    #[serde(rename = "type")]
    pub kind: DeviceKind,
    /// Sample the reading was derived from.
    pub raw_value: i64,
    /// Reading in device units.
    pub value: i64,
    pub formatted_value: String,
    pub unit: &'static str,
}

/// Map a raw sample from `[0, 100)` onto the device's range.
///
/// Inputs outside the domain are clamped first, so the result is monotonic in
/// `raw` and never leaves `[minimum, maximum]`.
pub fn translate(raw: i64, config: &DeviceConfig) -> DeviceReading {
    let min = config.minimum();
    let max = config.maximum();
    let step = config.precision_divisor.max(1);

    let clamped = raw.clamp(0, SAMPLE_DOMAIN);
    let offset = clamped.saturating_mul(config.scale_range.max(0)) / SAMPLE_DOMAIN;
    let value = min.saturating_add((offset / step) * step).clamp(min, max);

    DeviceReading {
        kind: config.kind,
        raw_value: raw,
        value,
        formatted_value: config.format_units(value),
        unit: config.kind.unit(),
    }
}

fn format_fixed(units: i64, exponent: i32) -> String {
    if exponent >= 0 {
        let scale = 10i64.saturating_pow(exponent.unsigned_abs());
        return units.saturating_mul(scale).to_string();
    }

    let decimals = exponent.unsigned_abs() as usize;
    let scale = 10u64.saturating_pow(exponent.unsigned_abs());
    let magnitude = units.unsigned_abs();
    let sign = if units < 0 { "-" } else { "" };
    format!(
        "{sign}{}.{:0decimals$}",
        magnitude / scale,
        magnitude % scale
    )
}
