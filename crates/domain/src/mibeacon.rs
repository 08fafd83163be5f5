//! Mi Beacon service-data codec.
//!
//! Pure functions operating on raw `&[u8]` slices, no BLE dependency needed.
//! Payloads are broadcast under the 16-bit service UUID `0xFE95`.
//!
//! | Offset | Field | Type | Present when |
//! |--------|-------|------|--------------|
//! | 0–1 | Frame control | u16 LE flags | always |
//! | 2–3 | Product id | u16 LE | always |
//! | 4 | Frame counter | u8 | always |
//! | next 6 | MAC | 6 bytes, reversed | `MAC` flag |
//! | next 1 | Capability | u8 | `CAPABILITY` flag |
//! | rest | Event objects | TLV records | `EVENT` flag, not `ENCRYPTED` |
//!
//! Each event object is a u16 LE type code, a u8 length and `length` bytes
//! of value. Objects with an unknown type code are skipped by their length.

use std::ops::BitOr;

use crate::error::DecodeError;
use crate::measurement::{Humidity, Measurement};

/// 16-bit service UUID carrying Mi Beacon payloads.
pub const BEACON_SERVICE_UUID: u16 = 0xFE95;

/// Event object type: temperature, i16 LE, x0.01 °C.
pub const OBJECT_TEMPERATURE: u16 = 0x1004;
/// Event object type: humidity, i16 LE x0.1 % or u8 %.
pub const OBJECT_HUMIDITY: u16 = 0x1006;
/// Event object type: battery, u8 %.
pub const OBJECT_BATTERY: u16 = 0x100A;
/// Event object type: temperature then humidity, two i16 LE, x0.1 each.
pub const OBJECT_TEMPERATURE_HUMIDITY: u16 = 0x100D;

const HEADER_LEN: usize = 5;
const MAC_LEN: usize = 6;

/// Frame control flags from the first two payload bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FrameControl(u16);

impl FrameControl {
    pub const FACTORY_NEW: Self = Self(1 << 0);
    pub const CONNECTED: Self = Self(1 << 1);
    pub const CENTRAL: Self = Self(1 << 2);
    pub const ENCRYPTED: Self = Self(1 << 3);
    pub const MAC: Self = Self(1 << 4);
    pub const CAPABILITY: Self = Self(1 << 5);
    pub const EVENT: Self = Self(1 << 6);
    pub const CUSTOM_DATA: Self = Self(1 << 7);
    pub const SUBTITLE: Self = Self(1 << 8);
    pub const BINDING: Self = Self(1 << 9);

    /// Wrap raw flag bits.
    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    /// Raw flag bits.
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// `true` when every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Copy of `self` with the bits of `other` set.
    #[must_use]
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Protocol version, stored in the upper four bits.
    #[must_use]
    pub const fn version(self) -> u8 {
        (self.0 >> 12) as u8
    }
}

impl BitOr for FrameControl {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.with(rhs)
    }
}

/// A decoded Mi Beacon advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconEvent {
    pub product_id: u16,
    pub frame_control: FrameControl,
    pub frame_counter: u8,
    /// Device MAC in display order.
    pub mac: Option<[u8; 6]>,
    pub capability: Option<u8>,
    /// First recognised event object, if any.
    pub measurement: Option<Measurement>,
}

impl BeaconEvent {
    /// A bare event with no optional field.
    #[must_use]
    pub fn new(product_id: u16, frame_control: FrameControl, frame_counter: u8) -> Self {
        Self {
            product_id,
            frame_control,
            frame_counter,
            mac: None,
            capability: None,
            measurement: None,
        }
    }

    /// Attach a MAC and set the matching flag.
    #[must_use]
    pub fn with_mac(mut self, mac: [u8; 6]) -> Self {
        self.frame_control = self.frame_control | FrameControl::MAC;
        self.mac = Some(mac);
        self
    }

    /// Attach a capability byte and set the matching flag.
    #[must_use]
    pub fn with_capability(mut self, capability: u8) -> Self {
        self.frame_control = self.frame_control | FrameControl::CAPABILITY;
        self.capability = Some(capability);
        self
    }

    /// Attach a measurement and set the event flag.
    #[must_use]
    pub fn with_measurement(mut self, measurement: Measurement) -> Self {
        self.frame_control = self.frame_control | FrameControl::EVENT;
        self.measurement = Some(measurement);
        self
    }
}

/// Bounds-checked cursor over a payload.
struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn take(&mut self, field: &'static str, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.data.len() < len {
            return Err(DecodeError::Truncated {
                field,
                needed: len,
                available: self.data.len(),
            });
        }
        let (head, tail) = self.data.split_at(len);
        self.data = tail;
        Ok(head)
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        Ok(self.take(field, 1)?[0])
    }

    fn u16_le(&mut self, field: &'static str) -> Result<u16, DecodeError> {
        let bytes = self.take(field, 2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }
}

/// Decode a `0xFE95` service-data payload.
///
/// Filtering on the service UUID is the caller's job.
///
/// # Errors
///
/// Returns [`DecodeError::Truncated`] when any field, including an event
/// object's declared value, runs past the end of the payload.
pub fn decode(payload: &[u8]) -> Result<BeaconEvent, DecodeError> {
    let mut reader = Reader::new(payload);

    let frame_control = FrameControl::from_bits(reader.u16_le("frame control")?);
    let product_id = reader.u16_le("product id")?;
    let frame_counter = reader.u8("frame counter")?;

    let mac = if frame_control.contains(FrameControl::MAC) {
        let raw = reader.take("mac", MAC_LEN)?;
        Some([raw[5], raw[4], raw[3], raw[2], raw[1], raw[0]])
    } else {
        None
    };

    let capability = if frame_control.contains(FrameControl::CAPABILITY) {
        Some(reader.u8("capability")?)
    } else {
        None
    };

    // Encrypted objects need the bind key, the bytes are left as they are.
    let measurement = if frame_control.contains(FrameControl::EVENT)
        && !frame_control.contains(FrameControl::ENCRYPTED)
    {
        decode_objects(&mut reader)?
    } else {
        None
    };

    Ok(BeaconEvent {
        product_id,
        frame_control,
        frame_counter,
        mac,
        capability,
        measurement,
    })
}

fn decode_objects(reader: &mut Reader<'_>) -> Result<Option<Measurement>, DecodeError> {
    let mut measurement = None;
    loop {
        let type_code = reader.u16_le("object type")?;
        let len = reader.u8("object length")?;
        let value = reader.take("object value", usize::from(len))?;

        if measurement.is_none() {
            measurement = parse_object(type_code, value);
        }
        if reader.is_empty() {
            return Ok(measurement);
        }
    }
}

/// Map a known object to a measurement; `None` for anything else.
fn parse_object(type_code: u16, value: &[u8]) -> Option<Measurement> {
    match (type_code, value) {
        (OBJECT_TEMPERATURE, &[lo, hi]) => Some(Measurement::Temperature {
            centi_degrees: i16::from_le_bytes([lo, hi]),
        }),
        (OBJECT_HUMIDITY, &[lo, hi]) => Some(Measurement::Humidity(Humidity::Deci(
            i16::from_le_bytes([lo, hi]),
        ))),
        (OBJECT_HUMIDITY, &[percent]) => Some(Measurement::Humidity(Humidity::Percent(percent))),
        (OBJECT_BATTERY, &[percent]) => Some(Measurement::Battery { percent }),
        (OBJECT_TEMPERATURE_HUMIDITY, &[t_lo, t_hi, h_lo, h_hi]) => {
            Some(Measurement::TemperatureAndHumidity {
                deci_degrees: i16::from_le_bytes([t_lo, t_hi]),
                deci_percent: i16::from_le_bytes([h_lo, h_hi]),
            })
        }
        _ => None,
    }
}

/// Encode an event using the layout read by [`decode`].
///
/// Optional fields are written when both their flag and their value are
/// present.
#[must_use]
pub fn encode(event: &BeaconEvent) -> Vec<u8> {
    let fc = event.frame_control;
    let mut out = Vec::with_capacity(HEADER_LEN + MAC_LEN + 1 + 7);

    out.extend_from_slice(&fc.bits().to_le_bytes());
    out.extend_from_slice(&event.product_id.to_le_bytes());
    out.push(event.frame_counter);

    if let (true, Some(mac)) = (fc.contains(FrameControl::MAC), event.mac) {
        out.extend(mac.iter().rev());
    }
    if let (true, Some(capability)) = (fc.contains(FrameControl::CAPABILITY), event.capability) {
        out.push(capability);
    }
    let readable = fc.contains(FrameControl::EVENT) && !fc.contains(FrameControl::ENCRYPTED);
    if let (true, Some(measurement)) = (readable, event.measurement) {
        encode_object(&measurement, &mut out);
    }

    out
}

fn encode_object(measurement: &Measurement, out: &mut Vec<u8>) {
    let (type_code, value): (u16, Vec<u8>) = match *measurement {
        Measurement::Temperature { centi_degrees } => {
            (OBJECT_TEMPERATURE, centi_degrees.to_le_bytes().to_vec())
        }
        Measurement::Humidity(Humidity::Deci(value)) => {
            (OBJECT_HUMIDITY, value.to_le_bytes().to_vec())
        }
        Measurement::Humidity(Humidity::Percent(value)) => (OBJECT_HUMIDITY, vec![value]),
        Measurement::Battery { percent } => (OBJECT_BATTERY, vec![percent]),
        Measurement::TemperatureAndHumidity {
            deci_degrees,
            deci_percent,
        } => {
            let mut value = deci_degrees.to_le_bytes().to_vec();
            value.extend_from_slice(&deci_percent.to_le_bytes());
            (OBJECT_TEMPERATURE_HUMIDITY, value)
        }
    };
    out.extend_from_slice(&type_code.to_le_bytes());
    // Object values are at most 4 bytes.
    out.push(value.len() as u8);
    out.extend_from_slice(&value);
}
