// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Outbound commands.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::capabilities::Feature;
use crate::error::{ParseFailure, ParseReason, ValueError};
use crate::types::{FanSpeed, OscillationAngles, TargetHumidity, TargetTemperature};

const STATE_SET: &str = "STATE-SET";
const REQUEST_CURRENT_STATE: &str = "REQUEST-CURRENT-STATE";
const MODE_REASON: &str = "LAPP";

/// A command that can be published to a device.
///
/// | Command | Wire key | Needs |
/// |---------|----------|-------|
/// | [`SetPower`](Self::SetPower) | `fpwr` | - |
/// | [`SetSpeed`](Self::SetSpeed) | `fnsp` | - |
/// | [`SetAutoMode`](Self::SetAutoMode) | `auto` | - |
/// | [`SetOscillation`](Self::SetOscillation) | `oson` | oscillation |
/// | [`SetOscillationAngles`](Self::SetOscillationAngles) | `osal`, `osau` | advanced oscillation |
/// | [`SetNightMode`](Self::SetNightMode) | `nmod` | - |
/// | [`SetHeating`](Self::SetHeating) | `hmod` | heating |
/// | [`SetTargetTemperature`](Self::SetTargetTemperature) | `hmax` | heating |
/// | [`SetHumidification`](Self::SetHumidification) | `hume` | humidifier |
/// | [`SetTargetHumidity`](Self::SetTargetHumidity) | `humt` | humidifier |
///
/// # Examples
///
/// ```
/// use airstate::codec::Command;
/// use airstate::types::FanSpeed;
///
/// let cmd = Command::SetSpeed(FanSpeed::new(5).unwrap());
/// assert_eq!(
///     cmd.encode(),
///     br#"{"data":{"fnsp":"0005"},"mode-reason":"LAPP","msg":"STATE-SET"}"#.to_vec()
/// );
/// assert_eq!(Command::decode(&cmd.encode()).unwrap(), cmd);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Turn the fan on or off.
    SetPower(bool),
    /// Set a fixed fan speed.
    SetSpeed(FanSpeed),
    /// Enable or disable automatic mode.
    SetAutoMode(bool),
    /// Enable or disable oscillation.
    SetOscillation(bool),
    /// Set the oscillation sweep.
    SetOscillationAngles(OscillationAngles),
    /// Enable or disable night mode.
    SetNightMode(bool),
    /// Enable or disable heating.
    SetHeating(bool),
    /// Set the heating target.
    SetTargetTemperature(TargetTemperature),
    /// Enable or disable humidification.
    SetHumidification(bool),
    /// Set the humidification target.
    SetTargetHumidity(TargetHumidity),
    /// Ask the device to publish its full state.
    RequestCurrentState,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<BTreeMap<String, String>>,
    #[serde(
        rename = "mode-reason",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    mode_reason: Option<String>,
    msg: String,
}

fn on_off(value: bool) -> String {
    if value { "ON" } else { "OFF" }.to_string()
}

impl Command {
    /// Returns a short name for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SetPower(_) => "set_power",
            Self::SetSpeed(_) => "set_speed",
            Self::SetAutoMode(_) => "set_auto_mode",
            Self::SetOscillation(_) => "set_oscillation",
            Self::SetOscillationAngles(_) => "set_oscillation_angles",
            Self::SetNightMode(_) => "set_night_mode",
            Self::SetHeating(_) => "set_heating",
            Self::SetTargetTemperature(_) => "set_target_temperature",
            Self::SetHumidification(_) => "set_humidification",
            Self::SetTargetHumidity(_) => "set_target_humidity",
            Self::RequestCurrentState => "request_current_state",
        }
    }

    /// Returns the feature the device must have to accept this command.
    #[must_use]
    pub const fn required_feature(&self) -> Option<Feature> {
        match self {
            Self::SetOscillation(_) => Some(Feature::Oscillation),
            Self::SetOscillationAngles(_) => Some(Feature::AdvancedOscillation),
            Self::SetHeating(_) | Self::SetTargetTemperature(_) => Some(Feature::Heating),
            Self::SetHumidification(_) | Self::SetTargetHumidity(_) => Some(Feature::Humidifier),
            Self::SetPower(_)
            | Self::SetSpeed(_)
            | Self::SetAutoMode(_)
            | Self::SetNightMode(_)
            | Self::RequestCurrentState => None,
        }
    }

    /// Returns the wire key/value pairs this command sets.
    fn data(&self) -> BTreeMap<String, String> {
        let pairs: Vec<(&str, String)> = match self {
            Self::SetPower(on) => vec![("fpwr", on_off(*on))],
            Self::SetSpeed(speed) => vec![("fnsp", speed.to_wire())],
            Self::SetAutoMode(on) => vec![("auto", on_off(*on))],
            Self::SetOscillation(on) => vec![("oson", on_off(*on))],
            Self::SetOscillationAngles(angles) => vec![
                ("osal", format!("{:04}", angles.low())),
                ("osau", format!("{:04}", angles.high())),
            ],
            Self::SetNightMode(on) => vec![("nmod", on_off(*on))],
            Self::SetHeating(on) => vec![("hmod", if *on { "HEAT" } else { "OFF" }.to_string())],
            Self::SetTargetTemperature(target) => vec![("hmax", target.to_wire())],
            Self::SetHumidification(on) => vec![("hume", on_off(*on))],
            Self::SetTargetHumidity(target) => vec![("humt", target.to_wire())],
            Self::RequestCurrentState => Vec::new(),
        };
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    /// Encodes the command as a JSON payload.
    ///
    /// The encoding is deterministic: keys are sorted and no timestamp is
    /// included, so equal commands always produce equal bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let envelope = match self {
            Self::RequestCurrentState => Envelope {
                data: None,
                mode_reason: None,
                msg: REQUEST_CURRENT_STATE.to_string(),
            },
            _ => Envelope {
                data: Some(self.data()),
                mode_reason: Some(MODE_REASON.to_string()),
                msg: STATE_SET.to_string(),
            },
        };
        // a struct of strings and string maps always serializes
        serde_json::to_vec(&envelope).unwrap_or_default()
    }

    /// Decodes a payload produced by [`encode`](Self::encode).
    ///
    /// # Errors
    ///
    /// Returns a [`ParseFailure`] if the payload is not a command envelope or
    /// its data does not match exactly one command.
    pub fn decode(payload: &[u8]) -> Result<Self, ParseFailure> {
        let fail = |reason: ParseReason| ParseFailure::new(payload, reason);

        let envelope: Envelope =
            serde_json::from_slice(payload).map_err(|e| fail(ParseReason::from(e)))?;

        match envelope.msg.as_str() {
            REQUEST_CURRENT_STATE => return Ok(Self::RequestCurrentState),
            STATE_SET => {}
            other => {
                return Err(fail(ParseReason::InvalidValue {
                    field: "msg".to_string(),
                    message: format!("unknown command message {other:?}"),
                }));
            }
        }

        let data = envelope
            .data
            .ok_or_else(|| fail(ParseReason::MissingField("data".to_string())))?;
        let value = |key: &str| data.get(key).map(String::as_str).unwrap_or_default();
        let keys: Vec<&str> = data.keys().map(String::as_str).collect();

        let flag = |key: &str, on: &str| match value(key) {
            v if v == on => Ok(true),
            "OFF" => Ok(false),
            v => Err(fail(ParseReason::InvalidValue {
                field: key.to_string(),
                message: format!("expected {on} or OFF, got {v:?}"),
            })),
        };
        let number = |key: &str| {
            value(key).parse::<u16>().map_err(|e| {
                fail(ParseReason::InvalidValue {
                    field: key.to_string(),
                    message: e.to_string(),
                })
            })
        };
        let range = |key: &str, e: ValueError| {
            fail(ParseReason::InvalidValue {
                field: key.to_string(),
                message: e.to_string(),
            })
        };

        match keys.as_slice() {
            ["fpwr"] => flag("fpwr", "ON").map(Self::SetPower),
            ["fnsp"] => {
                let n = number("fnsp")?;
                let speed = u8::try_from(n)
                    .map_err(|_| range("fnsp", out_of_u8(n)))
                    .and_then(|n| FanSpeed::new(n).map_err(|e| range("fnsp", e)))?;
                Ok(Self::SetSpeed(speed))
            }
            ["auto"] => flag("auto", "ON").map(Self::SetAutoMode),
            ["oson"] => flag("oson", "ON").map(Self::SetOscillation),
            ["osal", "osau"] => {
                let angles = OscillationAngles::new(number("osal")?, number("osau")?)
                    .map_err(|e| range("osal", e))?;
                Ok(Self::SetOscillationAngles(angles))
            }
            ["nmod"] => flag("nmod", "ON").map(Self::SetNightMode),
            ["hmod"] => flag("hmod", "HEAT").map(Self::SetHeating),
            ["hmax"] => {
                let target =
                    TargetTemperature::new(number("hmax")?).map_err(|e| range("hmax", e))?;
                Ok(Self::SetTargetTemperature(target))
            }
            ["hume"] => flag("hume", "ON").map(Self::SetHumidification),
            ["humt"] => {
                let n = number("humt")?;
                let target = u8::try_from(n)
                    .map_err(|_| range("humt", out_of_u8(n)))
                    .and_then(|n| TargetHumidity::new(n).map_err(|e| range("humt", e)))?;
                Ok(Self::SetTargetHumidity(target))
            }
            _ => Err(fail(ParseReason::UnexpectedFormat(format!(
                "no command sets keys {keys:?}"
            )))),
        }
    }
}

fn out_of_u8(actual: u16) -> ValueError {
    ValueError::OutOfRange {
        min: 0,
        max: i32::from(u8::MAX),
        actual: i32::from(actual),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_commands() -> Vec<Command> {
        vec![
            Command::SetPower(true),
            Command::SetPower(false),
            Command::SetSpeed(FanSpeed::new(7).unwrap()),
            Command::SetAutoMode(true),
            Command::SetOscillation(false),
            Command::SetOscillationAngles(OscillationAngles::new(45, 315).unwrap()),
            Command::SetNightMode(true),
            Command::SetHeating(true),
            Command::SetHeating(false),
            Command::SetTargetTemperature(TargetTemperature::from_celsius(21).unwrap()),
            Command::SetHumidification(true),
            Command::SetTargetHumidity(TargetHumidity::new(50).unwrap()),
            Command::RequestCurrentState,
        ]
    }

    #[test]
    fn every_command_decodes_back() {
        for cmd in all_commands() {
            assert_eq!(Command::decode(&cmd.encode()).unwrap(), cmd, "{}", cmd.name());
        }
    }

    #[test]
    fn encoding_is_deterministic() {
        let cmd = Command::SetOscillationAngles(OscillationAngles::new(90, 270).unwrap());
        assert_eq!(cmd.encode(), cmd.encode());
        assert_eq!(
            String::from_utf8(cmd.encode()).unwrap(),
            r#"{"data":{"osal":"0090","osau":"0270"},"mode-reason":"LAPP","msg":"STATE-SET"}"#
        );
    }

    #[test]
    fn heating_uses_heat_token() {
        let json = String::from_utf8(Command::SetHeating(true).encode()).unwrap();
        assert!(json.contains(r#""hmod":"HEAT""#));
    }

    #[test]
    fn request_current_state_has_no_data() {
        assert_eq!(
            Command::RequestCurrentState.encode(),
            br#"{"msg":"REQUEST-CURRENT-STATE"}"#.to_vec()
        );
    }

    #[test]
    fn required_features() {
        assert_eq!(Command::SetPower(true).required_feature(), None);
        assert_eq!(
            Command::SetTargetHumidity(TargetHumidity::new(40).unwrap()).required_feature(),
            Some(Feature::Humidifier)
        );
        assert_eq!(
            Command::SetOscillationAngles(OscillationAngles::new(5, 10).unwrap())
                .required_feature(),
            Some(Feature::AdvancedOscillation)
        );
    }

    #[test]
    fn decode_rejects_ambiguous_or_invalid_data() {
        let both = br#"{"data":{"fnsp":"0001","fpwr":"ON"},"msg":"STATE-SET"}"#;
        assert!(Command::decode(both).is_err());

        let bad_speed = br#"{"data":{"fnsp":"0042"},"msg":"STATE-SET"}"#;
        assert!(matches!(
            Command::decode(bad_speed).unwrap_err().reason,
            ParseReason::InvalidValue { .. }
        ));

        let bad_flag = br#"{"data":{"fpwr":"MAYBE"},"msg":"STATE-SET"}"#;
        assert!(Command::decode(bad_flag).is_err());

        assert!(Command::decode(br#"{"msg":"HELLO"}"#).is_err());
        assert!(Command::decode(b"garbage").is_err());
    }
}
