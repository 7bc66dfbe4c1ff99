//! # Record Codec
//!
//! Encodes readings into single-line JSON records and decodes them back.
//!
//! ## Line Format
//!
//! Keys always appear in this order, with fixed decimal precision:
//!
//! | Key | Source field | Format |
//! |-----|--------------|--------|
//! | `bus_id` | device identifier | integer |
//! | `latitude` | latitude | 6 decimals |
//! | `longitude` | longitude | 6 decimals |
//! | `speed` | speed (km/h) | 1 decimal |
//! | `direction` | heading (degrees) | 1 decimal |
//! | `altitude` | altitude (m) | 1 decimal |
//! | `satellites` | satellite count | integer |
//! | `hdop` | horizontal precision | 1 decimal, `99.9` when unknown |
//! | `timestamp` | UTC time | `YYYY-MM-DDTHH:MM:SSZ`, epoch when unknown |
//!
//! ```text
//! {"bus_id":1,"latitude":27.712345,"longitude":85.312345,"speed":34.5,"direction":182.4,"altitude":1350.2,"satellites":9,"hdop":0.9,"timestamp":"2026-02-19T10:15:23Z"}
//! ```

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;

use super::{Reading, Record};
use crate::error::{FieldlinkError, Result};

/// Sentinel written when the horizontal precision is unknown
pub const HDOP_UNKNOWN: f64 = 99.9;

/// Sentinel written when the fix time is unknown
pub const TIMESTAMP_UNKNOWN: &str = "1970-01-01T00:00:00Z";

/// strftime pattern for record timestamps
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Decoding side of the line format
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireRecord {
    bus_id: u32,
    latitude: f64,
    longitude: f64,
    speed: f64,
    direction: f64,
    altitude: f64,
    satellites: u32,
    hdop: f64,
    timestamp: String,
}

/// Encode a reading into a record line
///
/// Deterministic: the same reading always yields the same line, independent
/// of locale.
///
/// # Arguments
///
/// * `reading` - Reading to encode
///
/// # Returns
///
/// * `Result<Record>` - Single-line record
///
/// # Errors
///
/// Returns `InvalidReading` if the reading fails [`Reading::validate`].
///
/// # Examples
///
/// ```no_run
/// use fieldlink::record::{encode, Reading};
///
/// let reading = Reading {
///     device_id: 1,
///     latitude: 27.712345,
///     longitude: 85.312345,
///     speed_kmh: 34.5,
///     heading_deg: 182.4,
///     altitude_m: 1350.2,
///     satellites: 9,
///     hdop: Some(0.9),
///     timestamp: None,
/// };
/// let record = encode(&reading)?;
/// assert!(record.as_str().starts_with("{\"bus_id\":1,"));
/// # Ok::<(), fieldlink::error::FieldlinkError>(())
/// ```
pub fn encode(reading: &Reading) -> Result<Record> {
    reading.validate()?;

    let timestamp = match reading.timestamp {
        Some(ts) => ts.format(TIMESTAMP_FORMAT).to_string(),
        None => TIMESTAMP_UNKNOWN.to_string(),
    };

    let line = format!(
        concat!(
            "{{",
            "\"bus_id\":{},",
            "\"latitude\":{:.6},",
            "\"longitude\":{:.6},",
            "\"speed\":{:.1},",
            "\"direction\":{:.1},",
            "\"altitude\":{:.1},",
            "\"satellites\":{},",
            "\"hdop\":{:.1},",
            "\"timestamp\":\"{}\"",
            "}}"
        ),
        reading.device_id,
        reading.latitude,
        reading.longitude,
        reading.speed_kmh,
        reading.heading_deg,
        reading.altitude_m,
        reading.satellites,
        reading.hdop.unwrap_or(HDOP_UNKNOWN),
        timestamp,
    );

    Record::from_line(line)
}

/// Decode a record line back into a reading
///
/// Inverse of [`encode`] up to the declared decimal precision. The `99.9`
/// precision sentinel and the epoch timestamp decode to `None`.
///
/// # Errors
///
/// Returns `Parse` if the line is not a well-formed record.
pub fn decode(record: &Record) -> Result<Reading> {
    let wire: WireRecord = serde_json::from_str(record.as_str())
        .map_err(|e| FieldlinkError::Parse(format!("malformed record: {}", e)))?;

    let timestamp = parse_timestamp(&wire.timestamp)?;

    let hdop = if (wire.hdop - HDOP_UNKNOWN).abs() < 0.05 {
        None
    } else {
        Some(wire.hdop)
    };

    Ok(Reading {
        device_id: wire.bus_id,
        latitude: wire.latitude,
        longitude: wire.longitude,
        speed_kmh: wire.speed,
        heading_deg: wire.direction,
        altitude_m: wire.altitude,
        satellites: wire.satellites,
        hdop,
        timestamp,
    })
}

fn parse_timestamp(value: &str) -> Result<Option<DateTime<Utc>>> {
    if value == TIMESTAMP_UNKNOWN {
        return Ok(None);
    }

    let naive = NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .map_err(|e| FieldlinkError::Parse(format!("bad timestamp '{}': {}", value, e)))?;

    Ok(Some(naive.and_utc()))
}
