//! # Reading
//!
//! One timestamped position/motion snapshot from the positioning receiver.

use chrono::{DateTime, Timelike, Utc};

use super::codec::{HDOP_UNKNOWN, TIMESTAMP_UNKNOWN};
use crate::error::{FieldlinkError, Result};

/// Positioning snapshot
///
/// Produced at a fixed cadence by the acquisition side and never mutated
/// afterwards. Unknown precision and unknown time are modelled as `None`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Identifier of the device that produced the reading
    pub device_id: u32,

    /// Latitude in decimal degrees (-90 to 90)
    pub latitude: f64,

    /// Longitude in decimal degrees (-180 to 180)
    pub longitude: f64,

    /// Ground speed in km/h
    pub speed_kmh: f64,

    /// Course over ground in degrees (0 = North, 90 = East)
    pub heading_deg: f64,

    /// Altitude above mean sea level in meters
    pub altitude_m: f64,

    /// Number of satellites used in the fix
    pub satellites: u32,

    /// Horizontal dilution of precision, lower is better. A known value may
    /// not print as the unknown sentinel at one decimal.
    pub hdop: Option<f64>,

    /// UTC time of the fix, whole seconds, never the Unix epoch itself
    pub timestamp: Option<DateTime<Utc>>,
}

impl Reading {
    /// Check every field against its physical range
    ///
    /// # Errors
    ///
    /// Returns `InvalidReading` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("latitude", self.latitude),
            ("longitude", self.longitude),
            ("speed", self.speed_kmh),
            ("heading", self.heading_deg),
            ("altitude", self.altitude_m),
        ] {
            if !value.is_finite() {
                return Err(FieldlinkError::InvalidReading(format!(
                    "{} is not a finite number",
                    name
                )));
            }
        }

        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(FieldlinkError::InvalidReading(format!(
                "latitude {} out of range (-90 to 90)",
                self.latitude
            )));
        }

        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(FieldlinkError::InvalidReading(format!(
                "longitude {} out of range (-180 to 180)",
                self.longitude
            )));
        }

        if self.speed_kmh < 0.0 {
            return Err(FieldlinkError::InvalidReading(format!(
                "speed {} is negative",
                self.speed_kmh
            )));
        }

        if !(0.0..=360.0).contains(&self.heading_deg) {
            return Err(FieldlinkError::InvalidReading(format!(
                "heading {} out of range (0 to 360)",
                self.heading_deg
            )));
        }

        if let Some(hdop) = self.hdop {
            if !hdop.is_finite() || hdop < 0.0 {
                return Err(FieldlinkError::InvalidReading(format!(
                    "hdop {} must be a non-negative number",
                    hdop
                )));
            }
            if format!("{:.1}", hdop) == format!("{:.1}", HDOP_UNKNOWN) {
                return Err(FieldlinkError::InvalidReading(format!(
                    "hdop {} collides with the unknown-precision marker",
                    hdop
                )));
            }
        }

        if let Some(timestamp) = self.timestamp {
            if timestamp.nanosecond() != 0 {
                return Err(FieldlinkError::InvalidReading(format!(
                    "timestamp {} has a sub-second part",
                    timestamp
                )));
            }
            if timestamp.timestamp() == 0 {
                return Err(FieldlinkError::InvalidReading(format!(
                    "timestamp {} is the unknown-time marker",
                    TIMESTAMP_UNKNOWN
                )));
            }
        }

        Ok(())
    }
}
