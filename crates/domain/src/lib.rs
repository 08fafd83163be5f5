//! # mithermo-domain
//!
//! Pure domain model for the mithermo sensor bridge.
//!
//! ## Responsibilities
//! - Foundational types: device identifiers, error conventions
//! - Define **device records** and their Open / Encrypted classification
//! - Define **measurements** carried by advertisements and GATT polls
//! - Define the **property schema** announced for each device
//! - Decode and encode **Mi Beacon** service-data payloads
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;

pub mod device;
pub mod measurement;
pub mod mibeacon;
pub mod property;
