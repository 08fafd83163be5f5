//! Property schema announced to the host when a device is added.
//!
//! The host renders these descriptions as-is, so field names follow its
//! JSON conventions (`multipleOf`, `readOnly`, `@type`).

use serde::Serialize;

use crate::device::{DeviceKind, DeviceRecord};
use crate::id::DeviceId;

/// JSON type of a property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Number,
    Integer,
}

/// Description of a single read-only property.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertySchema {
    pub name: &'static str,
    pub title: &'static str,
    #[serde(rename = "@type", skip_serializing_if = "Option::is_none")]
    pub semantic_type: Option<&'static str>,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    pub minimum: f64,
    pub maximum: f64,
    pub multiple_of: f64,
    pub unit: &'static str,
    pub description: &'static str,
    pub read_only: bool,
}

impl PropertySchema {
    /// Ambient temperature in degrees Celsius.
    #[must_use]
    pub fn temperature() -> Self {
        Self {
            name: "temperature",
            title: "Temperature",
            semantic_type: Some("TemperatureProperty"),
            value_type: ValueType::Number,
            minimum: -127.99,
            maximum: 127.99,
            multiple_of: 0.1,
            unit: "degree celsius",
            description: "The ambient temperature",
            read_only: true,
        }
    }

    /// Relative humidity in percent.
    #[must_use]
    pub fn humidity() -> Self {
        Self {
            name: "humidity",
            title: "Humidity",
            semantic_type: Some("HumidityProperty"),
            value_type: ValueType::Number,
            minimum: 0.0,
            maximum: 100.0,
            multiple_of: 0.1,
            unit: "%",
            description: "The relative humidity",
            read_only: true,
        }
    }

    /// Battery level in percent.
    #[must_use]
    pub fn battery() -> Self {
        Self {
            name: "battery",
            title: "Battery",
            semantic_type: None,
            value_type: ValueType::Integer,
            minimum: 0.0,
            maximum: 100.0,
            multiple_of: 1.0,
            unit: "%",
            description: "The battery level",
            read_only: true,
        }
    }

    /// Properties exposed by a device of the given kind.
    #[must_use]
    pub fn for_kind(kind: DeviceKind) -> Vec<Self> {
        match kind {
            DeviceKind::Open => vec![Self::temperature(), Self::humidity()],
            DeviceKind::Encrypted => vec![Self::temperature(), Self::humidity(), Self::battery()],
        }
    }
}

/// Payload of a "device added" notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceDescription {
    /// Host-facing id, `"{display_name}-{device_id}"`.
    pub id: String,
    pub device_id: DeviceId,
    pub title: String,
    #[serde(rename = "@type")]
    pub capabilities: Vec<&'static str>,
    pub kind: DeviceKind,
    pub properties: Vec<PropertySchema>,
}

impl DeviceDescription {
    /// Describe `record` under the configured display name.
    #[must_use]
    pub fn new(record: &DeviceRecord, display_name: &str) -> Self {
        Self {
            id: format!("{display_name}-{}", record.id),
            device_id: record.id.clone(),
            title: display_name.to_owned(),
            capabilities: vec!["TemperatureSensor", "HumiditySensor"],
            kind: record.kind,
            properties: PropertySchema::for_kind(record.kind),
        }
    }
}
