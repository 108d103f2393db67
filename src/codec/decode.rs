// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Inbound message decoding.

use serde_json::{Map, Value};

use super::StatusTopic;
use crate::error::{ParseFailure, ParseReason};
use crate::state::{PropertyUpdate, PropertyValue};

/// Wire key to canonical property name.
const WIRE_PROPERTIES: &[(&str, &str)] = &[
    ("fpwr", "power"),
    ("fnsp", "speed"),
    ("auto", "auto_mode"),
    ("oson", "oscillation"),
    ("osal", "oscillation_angle_low"),
    ("osau", "oscillation_angle_high"),
    ("nmod", "night_mode"),
    ("hmod", "heating"),
    ("hmax", "target_temperature"),
    ("hume", "humidification"),
    ("humt", "target_humidity"),
    ("pm25", "pm25"),
    ("pm10", "pm10"),
    ("va10", "voc"),
    ("noxl", "no2"),
    ("hchr", "hcho"),
    ("tact", "temperature"),
    ("hact", "humidity"),
];

/// Keys that may hold the firmware status token, in lookup order.
const STATUS_TOKEN_KEYS: &[&str] = &["status", "state", "upgradeStatus", "msg"];

/// Keys that may hold the firmware version, in lookup order.
const VERSION_KEYS: &[&str] = &["version", "newVersion"];

/// A decoded inbound bus message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// One or more properties changed.
    PropertyUpdate(PropertyUpdate),

    /// Firmware update progress.
    FirmwareStatus {
        /// Lower-cased status token.
        token: String,
        /// Firmware version carried with the status, if any.
        version: Option<String>,
    },

    /// A well-formed message of a kind this library does not interpret.
    Unrecognized {
        /// Topic the message arrived on.
        topic: String,
        /// Payload exactly as received.
        payload: Vec<u8>,
    },
}

/// Maps a wire key to its canonical property name.
///
/// Unknown keys are returned unchanged.
#[must_use]
pub fn canonical_property(wire_key: &str) -> &str {
    WIRE_PROPERTIES
        .iter()
        .find(|(wire, _)| *wire == wire_key)
        .map_or(wire_key, |(_, canonical)| *canonical)
}

/// Interprets a wire string value for the given canonical property.
///
/// `ON`/`OFF`/`HEAT` become bools, zero-padded digits become integers, an
/// `AUTO` fan speed becomes the text `auto`, and anything else is kept as
/// text.
#[must_use]
pub fn parse_wire_value(property: &str, raw: &str) -> PropertyValue {
    match raw {
        "ON" | "HEAT" => return PropertyValue::Bool(true),
        "OFF" => return PropertyValue::Bool(false),
        "AUTO" if property == "speed" => return PropertyValue::Text("auto".to_string()),
        _ => {}
    }
    if !raw.is_empty()
        && raw.bytes().all(|b| b.is_ascii_digit())
        && let Ok(n) = raw.parse::<i64>()
    {
        return PropertyValue::Integer(n);
    }
    PropertyValue::Text(raw.to_string())
}

/// Decodes a bus message.
///
/// # Errors
///
/// Returns a [`ParseFailure`] carrying the raw payload when a message on a
/// known facet is not valid UTF-8, not valid JSON, not a JSON object, or is
/// missing the body its message kind requires. Messages on unknown topics or
/// facets are never errors.
pub fn decode(topic: &str, payload: &[u8]) -> Result<Inbound, ParseFailure> {
    let unrecognized = || Inbound::Unrecognized {
        topic: topic.to_string(),
        payload: payload.to_vec(),
    };

    let Some(status) = StatusTopic::parse(topic) else {
        return Ok(unrecognized());
    };

    match status.facet.as_str() {
        "current" | "state" => {
            let object = parse_object(payload)?;
            let Some(msg) = object.get("msg").and_then(Value::as_str) else {
                return Ok(unrecognized());
            };
            match msg {
                "CURRENT-STATE" => {
                    let body = body(&object, "product-state", payload)?;
                    Ok(Inbound::PropertyUpdate(properties(body, false)))
                }
                "STATE-CHANGE" => {
                    let body = body(&object, "product-state", payload)?;
                    Ok(Inbound::PropertyUpdate(properties(body, true)))
                }
                "ENVIRONMENTAL-CURRENT-SENSOR-DATA" => {
                    let body = body(&object, "data", payload)?;
                    Ok(Inbound::PropertyUpdate(properties(body, false)))
                }
                _ => Ok(unrecognized()),
            }
        }
        "software" => {
            let object = parse_object(payload)?;
            let token = first_string(&object, STATUS_TOKEN_KEYS)
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty());
            match token {
                Some(token) => Ok(Inbound::FirmwareStatus {
                    token,
                    version: first_string(&object, VERSION_KEYS).map(str::to_string),
                }),
                None => Ok(unrecognized()),
            }
        }
        _ => Ok(unrecognized()),
    }
}

fn parse_object(payload: &[u8]) -> Result<Map<String, Value>, ParseFailure> {
    let text =
        std::str::from_utf8(payload).map_err(|_| ParseFailure::new(payload, ParseReason::InvalidUtf8))?;
    let value: Value =
        serde_json::from_str(text).map_err(|e| ParseFailure::new(payload, e.into()))?;
    match value {
        Value::Object(object) => Ok(object),
        other => Err(ParseFailure::new(
            payload,
            ParseReason::UnexpectedFormat(format!("expected a JSON object, got {}", kind(&other))),
        )),
    }
}

fn body<'a>(
    object: &'a Map<String, Value>,
    key: &str,
    payload: &[u8],
) -> Result<&'a Map<String, Value>, ParseFailure> {
    match object.get(key) {
        Some(Value::Object(body)) => Ok(body),
        Some(other) => Err(ParseFailure::new(
            payload,
            ParseReason::InvalidValue {
                field: key.to_string(),
                message: format!("expected an object, got {}", kind(other)),
            },
        )),
        None => Err(ParseFailure::new(
            payload,
            ParseReason::MissingField(key.to_string()),
        )),
    }
}

fn properties(body: &Map<String, Value>, pairs: bool) -> PropertyUpdate {
    let mut update = PropertyUpdate::new();
    for (key, value) in body {
        // state changes report [old, new]; only the new value matters
        let value = match value {
            Value::Array(items) if pairs => match items.last() {
                Some(last) => last,
                None => continue,
            },
            other => other,
        };
        let name = canonical_property(key);
        let parsed = match value {
            Value::String(s) => parse_wire_value(name, s),
            Value::Bool(b) => PropertyValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => PropertyValue::Integer(i),
                None => PropertyValue::Text(n.to_string()),
            },
            // nested or null values carry nothing we can track
            _ => continue,
        };
        update.insert(name, parsed);
    }
    update
}

fn first_string<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
