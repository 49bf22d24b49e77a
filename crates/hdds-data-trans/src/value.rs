// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Helpers over `serde_json::Value`, the tagged value tree (null | bool |
//! number | string | sequence | mapping) exchanged with the script runtime
//! and persisted by the SQL sinks.

use serde_json::Value;

/// Format a scalar `Attribute.value` the way the SQL sinks store it in their
/// `TEXT` `value` column: strings pass through unquoted, numbers and bools
/// use their canonical textual form, and anything structured (array/object)
/// is re-serialized to JSON text.
pub fn format_scalar_for_sql(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => {
            serde_json::to_string(value).unwrap_or_default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_formatting() {
        assert_eq!(format_scalar_for_sql(&json!(25.5)), "25.5");
        assert_eq!(format_scalar_for_sql(&json!("t1")), "t1");
        assert_eq!(format_scalar_for_sql(&json!(true)), "true");
        assert_eq!(format_scalar_for_sql(&Value::Null), "");
    }

    #[test]
    fn structured_values_become_json_text() {
        let formatted = format_scalar_for_sql(&json!({"a": 1}));
        assert_eq!(formatted, r#"{"a":1}"#);
    }
}
