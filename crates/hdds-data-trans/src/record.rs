// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The canonical telemetry envelope (`DeviceRecord`) and its nested `Attribute`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

fn default_device_name() -> String {
    "unknown".to_string()
}

/// Accepts a JSON float, int, or int64 timestamp and truncates it to `i64`;
/// an absent or unparseable value defaults to `0` (§3, §8 invariant 4).
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Value::String(s) => s.parse::<f64>().map(|f| f as i64).unwrap_or(0),
        _ => 0,
    })
}

/// Canonical device-telemetry record produced by the Canonicalizer and
/// consumed by every `Sink`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    #[serde(default = "default_device_name")]
    pub device_name: String,

    #[serde(default)]
    pub device_type: String,

    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub timestamp: i64,

    #[serde(default)]
    pub attributes: Vec<Attribute>,

    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

/// A single named measurement within a `DeviceRecord`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,

    #[serde(rename = "type", default)]
    pub type_tag: String,

    #[serde(default)]
    pub value: Value,

    #[serde(default)]
    pub unit: String,

    /// Quality in [0,100]; out-of-range values are accepted and passed through
    /// unclamped, per the canonicalizer contract.
    #[serde(default)]
    pub quality: i64,

    #[serde(default)]
    pub metadata: Value,
}

impl Default for DeviceRecord {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            device_type: String::new(),
            timestamp: 0,
            attributes: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_record_round_trip() {
        let record = DeviceRecord {
            device_name: "t1".to_string(),
            device_type: "temperature".to_string(),
            timestamp: 1_700_000_000_000,
            attributes: vec![Attribute {
                name: "temperature".to_string(),
                type_tag: "float".to_string(),
                value: Value::from(25.5),
                unit: "C".to_string(),
                quality: 100,
                metadata: Value::Object(Default::default()),
            }],
            metadata: BTreeMap::new(),
        };

        let json = serde_json::to_string(&record).unwrap();
        let round_tripped: DeviceRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, round_tripped);
    }

    #[test]
    fn missing_device_name_defaults_to_unknown() {
        let record: DeviceRecord = serde_json::from_str(r#"{"device_type":"pressure"}"#).unwrap();
        assert_eq!(record.device_name, "unknown");
        assert_eq!(record.timestamp, 0);
        assert!(record.attributes.is_empty());
    }

    #[test]
    fn quality_out_of_range_is_preserved() {
        let attr: Attribute =
            serde_json::from_str(r#"{"name":"x","quality":250}"#).unwrap();
        assert_eq!(attr.quality, 250);
    }

    #[test]
    fn float_timestamp_is_truncated_to_i64() {
        let record: DeviceRecord =
            serde_json::from_str(r#"{"timestamp":1700000000000.9}"#).unwrap();
        assert_eq!(record.timestamp, 1_700_000_000_000);
    }

    #[test]
    fn unparseable_timestamp_defaults_to_zero() {
        let record: DeviceRecord = serde_json::from_str(r#"{"timestamp":"not-a-number"}"#).unwrap();
        assert_eq!(record.timestamp, 0);
    }
}
