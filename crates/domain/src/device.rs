//! Device: a sensor seen on the air, keyed by its hardware address.
//!
//! A device is either *open* (readings are broadcast in the clear) or
//! *encrypted* (readings must be fetched over a GATT session). The kind is
//! chosen once, from the product id of the first decoded beacon, and the
//! record carries the last known value of each property.

use serde::Serialize;

use crate::id::DeviceId;
use crate::measurement::{EncryptedReading, Measurement, PropertyValue};

/// Product ids whose advertisements carry encrypted event data.
///
/// | Product id | Model |
/// |------------|-------|
/// | `0x055B` | LYWSD03MMC |
/// | `0x0387` | MHO-C401 |
pub const ENCRYPTED_PRODUCT_IDS: &[u16] = &[0x055B, 0x0387];

/// How readings are obtained from a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Readings arrive in advertisements.
    Open,
    /// Readings require a connected GATT session.
    Encrypted,
}

impl DeviceKind {
    /// Classify a device from the product id found in its beacon.
    #[must_use]
    pub fn from_product_id(product_id: u16) -> Self {
        if ENCRYPTED_PRODUCT_IDS.contains(&product_id) {
            Self::Encrypted
        } else {
            Self::Open
        }
    }
}

/// Last known state of one sensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub kind: DeviceKind,
    /// Product id observed when the record was created.
    pub product_id: u16,
    pub last_temperature_centi_deg: Option<i32>,
    pub last_humidity_percent: Option<f64>,
    pub last_battery_percent: Option<u8>,
}

impl DeviceRecord {
    /// Create an empty record, classifying it from `product_id`.
    #[must_use]
    pub fn new(id: DeviceId, product_id: u16) -> Self {
        Self {
            id,
            kind: DeviceKind::from_product_id(product_id),
            product_id,
            last_temperature_centi_deg: None,
            last_humidity_percent: None,
            last_battery_percent: None,
        }
    }

    /// Merge a beacon measurement into the record.
    ///
    /// Only the fields present in `measurement` are touched; the returned
    /// values are the properties that were updated, in schema order.
    pub fn apply_measurement(&mut self, measurement: &Measurement) -> Vec<PropertyValue> {
        self.merge(
            measurement.temperature_centi_degrees(),
            measurement.humidity_percent(),
            measurement.battery_percent(),
        )
    }

    /// Merge the result of a GATT poll cycle into the record.
    pub fn apply_encrypted(&mut self, reading: &EncryptedReading) -> Vec<PropertyValue> {
        self.merge(
            reading.temperature_centi_deg.map(i32::from),
            reading.humidity_percent.map(f64::from),
            reading.battery_percent,
        )
    }

    fn merge(
        &mut self,
        temperature: Option<i32>,
        humidity: Option<f64>,
        battery: Option<u8>,
    ) -> Vec<PropertyValue> {
        let mut changed = Vec::with_capacity(3);
        if let Some(value) = temperature {
            self.last_temperature_centi_deg = Some(value);
            changed.push(PropertyValue::temperature_from_centi(value));
        }
        if let Some(value) = humidity {
            self.last_humidity_percent = Some(value);
            changed.push(PropertyValue::Humidity(value));
        }
        if let Some(value) = battery {
            self.last_battery_percent = Some(value);
            changed.push(PropertyValue::Battery(value));
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::Humidity;

    fn record(product_id: u16) -> DeviceRecord {
        DeviceRecord::new(DeviceId::from("a4:c1:38:00:00:01"), product_id)
    }

    #[test]
    fn should_classify_known_encrypted_products() {
        assert_eq!(DeviceKind::from_product_id(0x055B), DeviceKind::Encrypted);
        assert_eq!(DeviceKind::from_product_id(0x0387), DeviceKind::Encrypted);
    }

    #[test]
    fn should_classify_other_products_as_open() {
        assert_eq!(DeviceKind::from_product_id(0x0098), DeviceKind::Open);
        assert_eq!(DeviceKind::from_product_id(0x01AA), DeviceKind::Open);
    }

    #[test]
    fn should_start_without_values() {
        let r = record(0x01AA);
        assert_eq!(r.kind, DeviceKind::Open);
        assert_eq!(r.product_id, 0x01AA);
        assert!(r.last_temperature_centi_deg.is_none());
        assert!(r.last_humidity_percent.is_none());
        assert!(r.last_battery_percent.is_none());
    }

    #[test]
    fn should_keep_temperature_when_only_humidity_arrives() {
        let mut r = record(0x01AA);
        r.apply_measurement(&Measurement::Temperature { centi_degrees: 2150 });
        let changed = r.apply_measurement(&Measurement::Humidity(Humidity::Percent(40)));

        assert_eq!(changed, vec![PropertyValue::Humidity(40.0)]);
        assert_eq!(r.last_temperature_centi_deg, Some(2150));
        assert_eq!(r.last_humidity_percent, Some(40.0));
    }

    #[test]
    fn should_report_both_fields_for_combined_measurement() {
        let mut r = record(0x01AA);
        let changed = r.apply_measurement(&Measurement::TemperatureAndHumidity {
            deci_degrees: 215,
            deci_percent: 402,
        });
        assert_eq!(
            changed,
            vec![
                PropertyValue::Temperature(21.5),
                PropertyValue::Humidity(40.2)
            ]
        );
    }

    #[test]
    fn should_merge_partial_encrypted_reading() {
        let mut r = record(0x055B);
        r.apply_encrypted(&EncryptedReading {
            battery_percent: Some(90),
            ..EncryptedReading::default()
        });
        let changed = r.apply_encrypted(&EncryptedReading {
            temperature_centi_deg: Some(-550),
            humidity_percent: Some(61),
            battery_percent: None,
        });

        assert_eq!(
            changed,
            vec![
                PropertyValue::Temperature(-5.5),
                PropertyValue::Humidity(61.0)
            ]
        );
        assert_eq!(r.last_battery_percent, Some(90));
        assert_eq!(r.last_temperature_centi_deg, Some(-550));
    }
}
