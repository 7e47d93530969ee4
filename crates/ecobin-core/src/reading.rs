//! Core Types for ecobin
//!
//! Bin identities and the immutable `Reading` snapshot that crosses every
//! component boundary. Readings are the only values published or persisted.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Wire and storage format for reading timestamps
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ============================================================================
// Roster
// ============================================================================

/// Fixed identity of a simulated bin
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BinIdentity {
    pub bin_id: String,
    pub location: String,
}

impl BinIdentity {
    pub fn new(bin_id: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            bin_id: bin_id.into(),
            location: location.into(),
        }
    }
}

// ============================================================================
// Derived labels
// ============================================================================

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStatus {
    #[serde(rename = "ON")]
    On,
    #[serde(rename = "OFF")]
    Off,
}

impl RelayStatus {
    /// Relay closes once a bin is past the nearly-full line
    pub fn for_fill(fill_level: f64) -> Self {
        if fill_level > 90.0 {
            RelayStatus::On
        } else {
            RelayStatus::Off
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RelayStatus::On => "ON",
            RelayStatus::Off => "OFF",
        }
    }
}

impl fmt::Display for RelayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelayStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ON" => Ok(RelayStatus::On),
            "OFF" => Ok(RelayStatus::Off),
            other => Err(format!("unknown relay status: {}", other)),
        }
    }
}

/// Operational status label carried by every reading
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    #[serde(rename = "Normal")]
    Normal,
    #[serde(rename = "WARNING: Getting Full")]
    GettingFull,
    #[serde(rename = "URGENT: Nearly Full")]
    NearlyFull,
    #[serde(rename = "ALERT: High Temperature")]
    HighTemperature,
}

impl Status {
    pub fn label(&self) -> &'static str {
        match self {
            Status::Normal => "Normal",
            Status::GettingFull => "WARNING: Getting Full",
            Status::NearlyFull => "URGENT: Nearly Full",
            Status::HighTemperature => "ALERT: High Temperature",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Status::Normal,
            Status::GettingFull,
            Status::NearlyFull,
            Status::HighTemperature,
        ]
        .into_iter()
        .find(|status| status.label() == s)
        .ok_or_else(|| format!("unknown status label: {}", s))
    }
}

// ============================================================================
// Reading
// ============================================================================

/// Sensor values captured on one tick, rounded for emission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub timestamp: NaiveDateTime,
    pub fill_level: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub relay_status: RelayStatus,
}

/// One snapshot of a bin's sensors plus its derived status.
///
/// Serializes as the flat record used both on the wire and in storage.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Reading {
    pub bin_id: String,
    pub location: String,
    #[serde(with = "timestamp_format")]
    pub timestamp: NaiveDateTime,
    pub fill_level: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub relay_status: RelayStatus,
    pub status: Status,
}

impl Reading {
    /// Attach identity and classification to a measurement
    pub fn new(identity: &BinIdentity, measurement: Measurement, status: Status) -> Self {
        Self {
            bin_id: identity.bin_id.clone(),
            location: identity.location.clone(),
            timestamp: measurement.timestamp,
            fill_level: measurement.fill_level,
            temperature: measurement.temperature,
            humidity: measurement.humidity,
            relay_status: measurement.relay_status,
            status,
        }
    }

    /// Encode as the JSON payload published per reading
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn timestamp_string(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Round to one decimal place
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

mod timestamp_format {
    use super::TIMESTAMP_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&ts.format(TIMESTAMP_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample() -> Reading {
        Reading {
            bin_id: "EBIN001".to_string(),
            location: "City Center".to_string(),
            timestamp: NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_opt(12, 30, 5)
                .unwrap(),
            fill_level: 91.2,
            temperature: 24.0,
            humidity: 55.5,
            relay_status: RelayStatus::On,
            status: Status::NearlyFull,
        }
    }

    #[test]
    fn test_payload_is_flat_record() {
        let payload = sample().to_payload().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();

        assert_eq!(value["bin_id"], "EBIN001");
        assert_eq!(value["location"], "City Center");
        assert_eq!(value["timestamp"], "2024-03-01 12:30:05");
        assert_eq!(value["fill_level"], 91.2);
        assert_eq!(value["relay_status"], "ON");
        assert_eq!(value["status"], "URGENT: Nearly Full");
        assert_eq!(value.as_object().unwrap().len(), 8);
    }

    #[test]
    fn test_payload_parses_back() {
        let reading = sample();
        let parsed: Reading = serde_json::from_slice(&reading.to_payload().unwrap()).unwrap();
        assert_eq!(parsed, reading);
    }

    #[test]
    fn test_labels_parse() {
        assert_eq!(
            "ALERT: High Temperature".parse::<Status>(),
            Ok(Status::HighTemperature)
        );
        assert!("Full".parse::<Status>().is_err());
        assert_eq!("OFF".parse::<RelayStatus>(), Ok(RelayStatus::Off));
    }

    #[test]
    fn test_relay_threshold() {
        assert_eq!(RelayStatus::for_fill(90.0), RelayStatus::Off);
        assert_eq!(RelayStatus::for_fill(90.1), RelayStatus::On);
    }

    #[test]
    fn test_round1() {
        assert_eq!(round1(12.34), 12.3);
        assert_eq!(round1(12.35001), 12.4);
        assert_eq!(round1(100.0), 100.0);
    }
}
