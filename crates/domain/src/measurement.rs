//! Measurements reported by sensors, either in advertisements or via GATT.

use serde::Serialize;

use crate::error::DecodeError;
use crate::id::DeviceId;

/// Relative humidity as carried on the wire.
///
/// The encoding width decides the unit, so both forms are kept to allow a
/// payload to be re-encoded byte for byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Humidity {
    /// Signed 16-bit value, unit 0.1 %.
    Deci(i16),
    /// Single byte, unit 1 %.
    Percent(u8),
}

impl Humidity {
    /// Humidity in percent.
    #[must_use]
    pub fn percent(self) -> f64 {
        match self {
            Self::Deci(value) => f64::from(value) / 10.0,
            Self::Percent(value) => f64::from(value),
        }
    }
}

/// A reading decoded from a beacon event-data record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Measurement {
    /// Temperature, unit 0.01 °C.
    Temperature { centi_degrees: i16 },
    /// Relative humidity.
    Humidity(Humidity),
    /// Battery level in percent.
    Battery { percent: u8 },
    /// Temperature and humidity sharing one record, unit 0.1 for both.
    TemperatureAndHumidity { deci_degrees: i16, deci_percent: i16 },
}

impl Measurement {
    /// Temperature carried by this measurement, in hundredths of a degree.
    #[must_use]
    pub fn temperature_centi_degrees(&self) -> Option<i32> {
        match *self {
            Self::Temperature { centi_degrees } => Some(i32::from(centi_degrees)),
            Self::TemperatureAndHumidity { deci_degrees, .. } => {
                Some(i32::from(deci_degrees) * 10)
            }
            Self::Humidity(_) | Self::Battery { .. } => None,
        }
    }

    /// Humidity carried by this measurement, in percent.
    #[must_use]
    pub fn humidity_percent(&self) -> Option<f64> {
        match *self {
            Self::Humidity(humidity) => Some(humidity.percent()),
            Self::TemperatureAndHumidity { deci_percent, .. } => {
                Some(f64::from(deci_percent) / 10.0)
            }
            Self::Temperature { .. } | Self::Battery { .. } => None,
        }
    }

    /// Battery level carried by this measurement, in percent.
    #[must_use]
    pub fn battery_percent(&self) -> Option<u8> {
        match *self {
            Self::Battery { percent } => Some(percent),
            _ => None,
        }
    }
}

const GATT_MEASUREMENT_LEN: usize = 3;

/// Payload of the temperature/humidity GATT notification.
///
/// | Offset | Field | Type |
/// |--------|-------|------|
/// | 0–1 | Temperature | i16 LE, x0.01 °C |
/// | 2 | Humidity | u8, % |
///
/// Trailing bytes (battery voltage on most firmwares) are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GattMeasurement {
    pub temperature_centi_deg: i16,
    pub humidity_percent: u8,
}

impl GattMeasurement {
    /// Decode a notification payload.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Truncated`] when fewer than 3 bytes are given.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < GATT_MEASUREMENT_LEN {
            return Err(DecodeError::Truncated {
                field: "gatt measurement",
                needed: GATT_MEASUREMENT_LEN,
                available: data.len(),
            });
        }
        Ok(Self {
            temperature_centi_deg: i16::from_le_bytes([data[0], data[1]]),
            humidity_percent: data[2],
        })
    }
}

/// Fields obtained during one GATT poll cycle of an encrypted device.
///
/// Every field is optional: a failed battery read does not discard a
/// successfully received measurement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncryptedReading {
    pub temperature_centi_deg: Option<i16>,
    pub humidity_percent: Option<u8>,
    pub battery_percent: Option<u8>,
}

impl EncryptedReading {
    /// `true` when no field was obtained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.temperature_centi_deg.is_none()
            && self.humidity_percent.is_none()
            && self.battery_percent.is_none()
    }
}

impl From<GattMeasurement> for EncryptedReading {
    fn from(value: GattMeasurement) -> Self {
        Self {
            temperature_centi_deg: Some(value.temperature_centi_deg),
            humidity_percent: Some(value.humidity_percent),
            battery_percent: None,
        }
    }
}

/// The value of a single device property after an update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "property", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    /// Degrees Celsius.
    Temperature(f64),
    /// Percent relative humidity.
    Humidity(f64),
    /// Percent battery.
    Battery(u8),
}

impl PropertyValue {
    /// Property name as announced in the device schema.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Temperature(_) => "temperature",
            Self::Humidity(_) => "humidity",
            Self::Battery(_) => "battery",
        }
    }

    /// Temperature property from hundredths of a degree.
    #[must_use]
    pub fn temperature_from_centi(centi_degrees: i32) -> Self {
        Self::Temperature(f64::from(centi_degrees) / 100.0)
    }
}

/// A property of a device took a new value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyChange {
    pub device_id: DeviceId,
    #[serde(flatten)]
    pub value: PropertyValue,
}
