// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the `airstate` library.
//!
//! The hierarchy mirrors how failures are handled at runtime:
//!
//! - [`AuthError`] - credentials rejected or session expired; never retried
//! - [`ConnectionError`] - transient transport failure; retried with backoff
//! - [`ParseFailure`] - malformed wire payload; logged and discarded
//! - [`ApiError`] - cloud call rejected; surfaced to the caller
//! - [`StateConflict`] - operation not allowed in the current state; no side effect
//!
//! All of them convert into the top-level [`Error`].

use thiserror::Error;

use crate::firmware::FirmwareUpdatePhase;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// Cloud authentication failed or the session expired.
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Transport-level failure talking to the cloud or the bus.
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// A wire payload could not be parsed.
    #[error("parse failure: {0}")]
    Parse(#[from] ParseFailure),

    /// The cloud rejected a request.
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// The operation conflicts with the current device state.
    #[error("state conflict: {0}")]
    Conflict(#[from] StateConflict),

    /// A value failed validation.
    #[error("value error: {0}")]
    Value(#[from] ValueError),

    /// The device is not registered with the coordinator.
    #[error("device {0} not found")]
    DeviceNotFound(String),

    /// The channel needed for the operation is not connected.
    #[error("device {serial} has no {channel} connection")]
    NotConnected {
        /// Serial of the device.
        serial: String,
        /// Name of the missing channel (`cloud` or `bus`).
        channel: &'static str,
    },

    /// The device does not have the feature the command needs.
    #[error("device {serial} does not support {feature}")]
    CapabilityNotSupported {
        /// Serial of the device.
        serial: String,
        /// Name of the missing feature.
        feature: &'static str,
    },
}

/// Errors raised by cloud authentication.
///
/// Authentication errors are fatal until the host re-authenticates: they are
/// never retried automatically.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The cloud rejected the credentials.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The session token is no longer accepted.
    #[error("session expired")]
    SessionExpired,

    /// The account requires a step the library cannot perform (e.g. OTP).
    #[error("additional verification required: {0}")]
    VerificationRequired(String),
}

/// Transport-level errors for cloud and bus operations.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// HTTP request failed.
    #[cfg(feature = "http")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// MQTT client request failed.
    #[cfg(feature = "mqtt")]
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// An operation did not finish within its configured timeout.
    #[error("{operation} timed out after {after_ms} ms")]
    Timeout {
        /// The operation class that timed out.
        operation: &'static str,
        /// The timeout that elapsed, in milliseconds.
        after_ms: u64,
    },

    /// The transport is currently down.
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    /// Invalid URL or broker address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Internal channel was closed.
    #[error("channel closed: {0}")]
    ChannelClosed(String),
}

impl ConnectionError {
    /// Creates a timeout error for the given operation class.
    #[must_use]
    pub fn timeout(operation: &'static str, after: std::time::Duration) -> Self {
        Self::Timeout {
            operation,
            after_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// A wire payload that could not be decoded.
///
/// Carries the raw bytes so the message can be logged verbatim.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("malformed payload ({} bytes): {reason}", raw.len())]
pub struct ParseFailure {
    /// The payload exactly as received.
    pub raw: Vec<u8>,
    /// Why decoding failed.
    pub reason: ParseReason,
}

impl ParseFailure {
    /// Creates a parse failure for the given payload.
    #[must_use]
    pub fn new(raw: &[u8], reason: ParseReason) -> Self {
        Self {
            raw: raw.to_vec(),
            reason,
        }
    }
}

/// Diagnostic reason attached to a [`ParseFailure`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseReason {
    /// The payload is not valid UTF-8.
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    /// The payload is not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(String),

    /// The JSON is valid but not shaped as expected.
    #[error("unexpected format: {0}")]
    UnexpectedFormat(String),

    /// A required field is missing.
    #[error("missing field: {0}")]
    MissingField(String),

    /// A field holds a value that cannot be interpreted.
    #[error("invalid value for {field}: {message}")]
    InvalidValue {
        /// The offending field.
        field: String,
        /// Description of the problem.
        message: String,
    },
}

impl From<serde_json::Error> for ParseReason {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// Errors returned by the cloud for an otherwise well-formed request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The cloud answered with a non-success status.
    #[error("request rejected with status {status}: {message}")]
    Rejected {
        /// HTTP-like status code.
        status: u16,
        /// Message returned by the cloud, if any.
        message: String,
    },

    /// The cloud does not implement the operation.
    #[error("{operation} is not supported by the cloud service")]
    Unsupported {
        /// The unsupported operation.
        operation: &'static str,
    },

    /// The response body could not be interpreted.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// An operation that is not allowed in the current state.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StateConflict {
    /// A firmware update cycle is already running.
    #[error("update already in progress (phase {phase})")]
    UpdateInProgress {
        /// The phase the machine is in.
        phase: FirmwareUpdatePhase,
    },

    /// A firmware trigger request is still waiting for the cloud.
    #[error("update trigger already in flight")]
    TriggerInFlight,
}

/// Errors related to value validation and constraints.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// A numeric value is outside the allowed range.
    #[error("value {actual} is out of range [{min}, {max}]")]
    OutOfRange {
        /// Minimum allowed value.
        min: i32,
        /// Maximum allowed value.
        max: i32,
        /// The actual value that was provided.
        actual: i32,
    },

    /// A serial number is empty or contains topic separators.
    #[error("invalid serial: {0:?}")]
    InvalidSerial(String),

    /// A topic root is empty or contains topic separators or wildcards.
    #[error("invalid topic root: {0:?}")]
    InvalidTopicRoot(String),

    /// The low oscillation angle is above the high one.
    #[error("oscillation angles out of order: {low} > {high}")]
    AnglesOutOfOrder {
        /// Requested low angle.
        low: u16,
        /// Requested high angle.
        high: u16,
    },
}

/// Any error a [`CloudApi`](crate::cloud::CloudApi) call can return.
#[derive(Debug, Error)]
pub enum CloudError {
    /// Authentication failed or expired.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Transport failure.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The cloud rejected the request.
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl From<CloudError> for Error {
    fn from(err: CloudError) -> Self {
        match err {
            CloudError::Auth(e) => Self::Auth(e),
            CloudError::Connection(e) => Self::Connection(e),
            CloudError::Api(e) => Self::Api(e),
        }
    }
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_error_display() {
        let err = ValueError::OutOfRange {
            min: 1,
            max: 10,
            actual: 15,
        };
        assert_eq!(err.to_string(), "value 15 is out of range [1, 10]");
    }

    #[test]
    fn parse_failure_keeps_raw_bytes() {
        let failure = ParseFailure::new(b"{oops", ParseReason::Json("eof".to_string()));
        assert_eq!(failure.raw, b"{oops".to_vec());
        assert_eq!(
            failure.to_string(),
            "malformed payload (5 bytes): invalid JSON: eof"
        );
    }

    #[test]
    fn cloud_error_flattens_into_error() {
        let err: Error = CloudError::Auth(AuthError::SessionExpired).into();
        assert!(matches!(err, Error::Auth(AuthError::SessionExpired)));

        let err: Error = CloudError::Api(ApiError::Unsupported {
            operation: "set_auto_update",
        })
        .into();
        assert!(matches!(err, Error::Api(ApiError::Unsupported { .. })));
    }

    #[test]
    fn conflict_display() {
        let err = StateConflict::UpdateInProgress {
            phase: FirmwareUpdatePhase::Downloaded,
        };
        assert_eq!(
            err.to_string(),
            "update already in progress (phase downloaded)"
        );
    }

    #[test]
    fn timeout_constructor() {
        let err = ConnectionError::timeout("subscribe", std::time::Duration::from_millis(1500));
        assert_eq!(err.to_string(), "subscribe timed out after 1500 ms");
    }
}
