// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Canonicalizer: coerces a script's raw return value into a `DeviceRecord`.

use serde_json::Value;

use crate::error::GatewayError;
use crate::record::DeviceRecord;

/// Turn the script's exported result into a canonical `DeviceRecord`.
///
/// `fallback_device_type` is the dispatcher-derived type used to fill in an
/// empty or missing `device_type` field.
pub fn canonicalize(
    raw: Value,
    fallback_device_type: &str,
) -> Result<DeviceRecord, GatewayError> {
    let map = match raw {
        Value::Object(map) => map,
        _ => return Err(GatewayError::BadScriptResult(fallback_device_type.to_string())),
    };

    if let Some(error_text) = map.get("error").and_then(Value::as_str) {
        if !error_text.is_empty() {
            return Err(GatewayError::ScriptReportedError(error_text.to_string()));
        }
    }

    let value = Value::Object(map);
    let mut record: DeviceRecord = serde_json::from_value(value)
        .map_err(|_| GatewayError::BadScriptResult(fallback_device_type.to_string()))?;

    if record.device_type.trim().is_empty() {
        record.device_type = fallback_device_type.to_string();
    }

    Ok(record)
}
