// SPDX-License-Identifier: GPL-3.0-only
//! Typed views of helper payloads
//!
//! The helper prints loosely-typed JSON. Each command gets its own schema
//! here and anything that does not fit is treated as a parse failure
//! instead of being trusted.

use serde::Serialize;
use serde_json::Value;

/// One display reported by `detect`
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DisplayDescriptor {
    /// I2C bus number, used to address every later command
    pub bus: i64,
    /// EDID serial, informational only
    pub serial: String,
    /// Model name, if the helper reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl DisplayDescriptor {
    #[cfg(test)]
    pub fn new(bus: i64, serial: impl Into<String>) -> Self {
        Self {
            bus,
            serial: serial.into(),
            model: None,
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let bus = object.get("bus").and_then(read_integer)?;
        // Informational only, so an odd value never rejects the display
        let serial = match object.get("serial") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(other) if !other.is_null() => {
                debug!(bus, "Ignoring non-text serial {}", other);
                String::new()
            }
            _ => String::new(),
        };
        let model = object
            .get("model")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .map(str::to_string);

        Some(Self { bus, serial, model })
    }
}

/// Parse a `detect` payload
///
/// Returns `None` unless the payload is an array of display objects that all
/// carry an integer `bus`.
pub fn parse_detect(payload: &Value) -> Option<Vec<DisplayDescriptor>> {
    let entries = payload.as_array()?;
    let mut displays = Vec::with_capacity(entries.len());

    for entry in entries {
        match DisplayDescriptor::from_value(entry) {
            Some(display) => displays.push(display),
            None => {
                warn!("Rejecting detect payload, malformed display entry: {}", entry);
                return None;
            }
        }
    }

    Some(displays)
}

/// Answer of a `set-*` command for one field
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SetResponse {
    /// The helper's own verdict (`"ok": true`)
    pub ok: bool,
    /// Numeric reading of the requested field, when one could be parsed
    pub value: Option<i64>,
}

impl SetResponse {
    pub fn from_payload(payload: &Value, field: &str) -> Self {
        Self {
            ok: payload.get("ok").and_then(Value::as_bool).unwrap_or(false),
            value: payload.get(field).and_then(read_integer),
        }
    }

    /// Whether the helper confirmed `target` for the field
    pub fn confirms(&self, target: u8) -> bool {
        self.ok && self.value == Some(i64::from(target))
    }
}

/// Read an integer from a JSON number or a numeric string
fn read_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            // `i64::MIN as f64` and `i64::MAX as f64` are -2^63 and 2^63
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_detect_accepts_helper_output() {
        let payload = json!([
            {"bus": 4, "serial": "ABC123", "model": "DELL U2720Q", "dispno": 1},
            {"bus": 6, "serial": ""}
        ]);
        let displays = parse_detect(&payload).unwrap();
        assert_eq!(displays.len(), 2);
        assert_eq!(displays[0].bus, 4);
        assert_eq!(displays[0].serial, "ABC123");
        assert_eq!(displays[0].model.as_deref(), Some("DELL U2720Q"));
        assert_eq!(displays[1], DisplayDescriptor::new(6, ""));
    }

    #[test]
    fn test_detect_empty_array() {
        assert_eq!(parse_detect(&json!([])), Some(Vec::new()));
    }

    #[test]
    fn test_detect_rejects_non_array() {
        assert_eq!(parse_detect(&Value::Null), None);
        assert_eq!(parse_detect(&json!({"bus": 1})), None);
        assert_eq!(parse_detect(&json!("[]")), None);
    }

    #[test]
    fn test_detect_rejects_entry_without_bus() {
        assert_eq!(parse_detect(&json!([{"bus": 1}, {"serial": "x"}])), None);
        assert_eq!(parse_detect(&json!([{"bus": "two"}])), None);
    }

    #[test]
    fn test_detect_tolerates_odd_serial() {
        let displays = parse_detect(&json!([
            {"bus": 1, "serial": false},
            {"bus": 2, "serial": "OK"},
            {"bus": 3, "serial": {"raw": [1, 2]}},
            {"bus": 4, "serial": 1234}
        ]))
        .unwrap();

        let serials: Vec<_> = displays.iter().map(|d| (d.bus, d.serial.as_str())).collect();
        assert_eq!(serials, vec![(1, ""), (2, "OK"), (3, ""), (4, "1234")]);
    }

    #[test]
    fn test_detect_accepts_numeric_string_bus() {
        let displays = parse_detect(&json!([{"bus": "3"}])).unwrap();
        assert_eq!(displays[0].bus, 3);
        assert_eq!(displays[0].serial, "");
    }

    #[test]
    fn test_set_response_confirms_only_exact_match() {
        let response = SetResponse::from_payload(&json!({"ok": true, "contrast": 40}), "contrast");
        assert!(response.confirms(40));
        assert!(!response.confirms(41));

        let not_ok = SetResponse::from_payload(&json!({"ok": false, "contrast": 40}), "contrast");
        assert_eq!(not_ok.value, Some(40));
        assert!(!not_ok.confirms(40));
    }

    #[test]
    fn test_set_response_value_parsing() {
        let as_string = SetResponse::from_payload(&json!({"ok": true, "blue": "55"}), "blue");
        assert_eq!(as_string.value, Some(55));

        let truthy_ok = SetResponse::from_payload(&json!({"ok": 1, "blue": 55}), "blue");
        assert!(!truthy_ok.ok);

        let fractional = SetResponse::from_payload(&json!({"ok": true, "blue": 55.5}), "blue");
        assert_eq!(fractional.value, None);

        let whole = SetResponse::from_payload(&json!({"ok": true, "blue": 55.0}), "blue");
        assert_eq!(whole.value, Some(55));

        for huge in [json!(1e20), json!(-1e20), json!(u64::MAX)] {
            let response = SetResponse::from_payload(&json!({"ok": true, "blue": huge}), "blue");
            assert_eq!(response.value, None, "{huge}");
        }

        let missing = SetResponse::from_payload(&json!({"ok": true}), "blue");
        assert_eq!(missing.value, None);

        let wrong_field = SetResponse::from_payload(&json!({"ok": true, "brightness": 55}), "blue");
        assert!(!wrong_field.confirms(55));
    }
}
