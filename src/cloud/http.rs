// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTPS implementation of [`CloudApi`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::cloud::{Ack, CloudApi, Credentials, DeviceDescriptor, FirmwareMetadata, Session};
use crate::error::{ApiError, AuthError, CloudError, ConnectionError};
use crate::types::Serial;

// ============================================================================
// HttpCloudConfig
// ============================================================================

/// Configuration for [`HttpCloudClient`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use airstate::cloud::HttpCloudConfig;
///
/// let config = HttpCloudConfig::new("https://api.example.com/")
///     .with_timeout(Duration::from_secs(5))
///     .with_user_agent("my-app/1.0");
/// assert_eq!(config.base_url(), "https://api.example.com");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpCloudConfig {
    base_url: String,
    timeout: Duration,
    user_agent: String,
}

impl HttpCloudConfig {
    /// Default request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

    /// Creates a configuration for the given API root.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: Self::DEFAULT_TIMEOUT,
            user_agent: concat!("airstate/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the `User-Agent` header.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Returns the API root without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

// ============================================================================
// HttpCloudClient
// ============================================================================

/// Cloud client speaking the vendor's JSON API over HTTPS.
///
/// Every call but [`authenticate`](CloudApi::authenticate) sends the session
/// token as a bearer token.
#[derive(Debug, Clone)]
pub struct HttpCloudClient {
    config: HttpCloudConfig,
    client: Client,
}

impl HttpCloudClient {
    /// Creates a client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn new(config: HttpCloudConfig) -> Result<Self, ConnectionError> {
        if !config.base_url.starts_with("http://") && !config.base_url.starts_with("https://") {
            return Err(ConnectionError::InvalidAddress(config.base_url));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self { config, client })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &HttpCloudConfig {
        &self.config
    }

    fn request(&self, method: Method, path: &str, session: Option<&Session>) -> RequestBuilder {
        let url = format!("{}{path}", self.config.base_url);
        let builder = self.client.request(method, url);
        match session {
            Some(session) => builder.bearer_auth(session.token()),
            None => builder,
        }
    }

    async fn send(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<Response, CloudError> {
        tracing::debug!(operation, "Sending cloud request");
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ConnectionError::timeout(operation, self.config.timeout)
            } else {
                ConnectionError::Http(e)
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        tracing::debug!(operation, status = status.as_u16(), "Cloud request refused");
        Err(refusal(operation, status, message))
    }

    async fn json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<T, CloudError> {
        let body = self
            .send(operation, request)
            .await?
            .bytes()
            .await
            .map_err(ConnectionError::Http)?;
        serde_json::from_slice(&body).map_err(|e| {
            ApiError::UnexpectedResponse(format!("{operation}: {e}")).into()
        })
    }

    async fn ack(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<Ack, CloudError> {
        let body = self
            .send(operation, request)
            .await?
            .bytes()
            .await
            .map_err(ConnectionError::Http)?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Ack::default());
        }
        let wire: WireAck = serde_json::from_slice(&body)
            .map_err(|e| ApiError::UnexpectedResponse(format!("{operation}: {e}")))?;
        Ok(Ack {
            request_id: wire.request_id,
        })
    }
}

/// Maps a non-success status to an error.
fn refusal(operation: &'static str, status: StatusCode, message: String) -> CloudError {
    match (operation, status) {
        ("authenticate", StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
            AuthError::InvalidCredentials.into()
        }
        ("authenticate", StatusCode::PRECONDITION_REQUIRED) => {
            AuthError::VerificationRequired(message).into()
        }
        (_, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => AuthError::SessionExpired.into(),
        (
            "set_auto_update",
            StatusCode::NOT_FOUND | StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED,
        ) => ApiError::Unsupported { operation }.into(),
        (_, status) if status.is_server_error() => {
            ConnectionError::Unavailable(format!("{operation}: HTTP {}", status.as_u16())).into()
        }
        (_, status) => ApiError::Rejected {
            status: status.as_u16(),
            message,
        }
        .into(),
    }
}

fn device_path(serial: &Serial, suffix: &str) -> String {
    format!(
        "/v1/devices/{}/{suffix}",
        urlencoding::encode(serial.as_str())
    )
}

#[async_trait]
impl CloudApi for HttpCloudClient {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Session, CloudError> {
        let body = WireLogin {
            email: &credentials.username,
            password: &credentials.password,
        };
        let request = self.request(Method::POST, "/v1/auth/login", None).json(&body);
        let wire: WireSession = self.json("authenticate", request).await?;

        tracing::info!(account = ?wire.account, "Cloud session opened");
        let session = Session::new(wire.token);
        Ok(match wire.account {
            Some(account) => session.with_account(account),
            None => session,
        })
    }

    async fn list_devices(&self, session: &Session) -> Result<Vec<DeviceDescriptor>, CloudError> {
        let request = self.request(Method::GET, "/v2/devices", Some(session));
        let wire: Vec<WireDevice> = self.json("list_devices", request).await?;

        Ok(wire
            .into_iter()
            .filter_map(|device| match Serial::new(device.serial.as_str()) {
                Ok(serial) => Some(device.into_descriptor(serial)),
                Err(e) => {
                    tracing::warn!(serial = %device.serial, error = %e, "Skipping device with invalid serial");
                    None
                }
            })
            .collect())
    }

    async fn fetch_firmware_metadata(
        &self,
        session: &Session,
        serial: &Serial,
    ) -> Result<FirmwareMetadata, CloudError> {
        let request = self.request(Method::GET, &device_path(serial, "firmware"), Some(session));
        let wire: WireFirmware = self.json("fetch_firmware_metadata", request).await?;
        Ok(FirmwareMetadata {
            version: wire.version,
            auto_update: wire.auto_update,
            update_available: wire.new_version_available,
            available_version: wire.available_version,
        })
    }

    async fn trigger_firmware_update(
        &self,
        session: &Session,
        serial: &Serial,
    ) -> Result<Ack, CloudError> {
        let request = self.request(
            Method::POST,
            &device_path(serial, "firmware/update"),
            Some(session),
        );
        self.ack("trigger_firmware_update", request).await
    }

    async fn set_auto_update(
        &self,
        session: &Session,
        serial: &Serial,
        enabled: bool,
    ) -> Result<Ack, CloudError> {
        let request = self
            .request(
                Method::PUT,
                &device_path(serial, "firmware/auto-update"),
                Some(session),
            )
            .json(&WireAutoUpdate { enabled });
        self.ack("set_auto_update", request).await
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Serialize)]
struct WireLogin<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSession {
    token: String,
    #[serde(default)]
    account: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireDevice {
    serial: String,
    #[serde(default)]
    name: String,
    product_category: String,
    product_type: String,
    #[serde(default)]
    capabilities: Vec<String>,
    #[serde(default)]
    firmware_version: Option<String>,
    #[serde(default)]
    auto_update: Option<bool>,
    #[serde(default)]
    new_version_available: Option<bool>,
}

impl WireDevice {
    fn into_descriptor(self, serial: Serial) -> DeviceDescriptor {
        DeviceDescriptor {
            serial,
            name: self.name,
            category: self.product_category.into(),
            topic_root: self.product_type,
            capabilities: self.capabilities,
            firmware_version: self.firmware_version,
            auto_update: self.auto_update,
            update_available: self.new_version_available,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFirmware {
    version: String,
    auto_update: bool,
    new_version_available: bool,
    #[serde(default)]
    available_version: Option<String>,
}

#[derive(Serialize)]
struct WireAutoUpdate {
    enabled: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAck {
    #[serde(default)]
    request_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_trims_trailing_slash() {
        let config = HttpCloudConfig::new("https://api.example.com///");
        assert_eq!(config.base_url(), "https://api.example.com");
        assert_eq!(config.timeout(), HttpCloudConfig::DEFAULT_TIMEOUT);
    }

    #[test]
    fn rejects_url_without_scheme() {
        let err = HttpCloudClient::new(HttpCloudConfig::new("api.example.com")).unwrap_err();
        assert!(matches!(err, ConnectionError::InvalidAddress(_)));
    }

    #[test]
    fn serials_are_escaped_in_paths() {
        let serial = Serial::new("AB?C&1").unwrap();
        assert_eq!(device_path(&serial, "firmware"), "/v1/devices/AB%3FC%261/firmware");
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            refusal("authenticate", StatusCode::UNAUTHORIZED, String::new()),
            CloudError::Auth(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            refusal("list_devices", StatusCode::UNAUTHORIZED, String::new()),
            CloudError::Auth(AuthError::SessionExpired)
        ));
        assert!(matches!(
            refusal("set_auto_update", StatusCode::NOT_FOUND, String::new()),
            CloudError::Api(ApiError::Unsupported { .. })
        ));
        assert!(matches!(
            refusal("trigger_firmware_update", StatusCode::NOT_FOUND, "gone".to_string()),
            CloudError::Api(ApiError::Rejected { status: 404, .. })
        ));
        assert!(matches!(
            refusal("list_devices", StatusCode::BAD_GATEWAY, String::new()),
            CloudError::Connection(ConnectionError::Unavailable(_))
        ));
    }

    #[test]
    fn wire_device_maps_to_descriptor() {
        let wire: WireDevice = serde_json::from_str(
            r#"{"serial":"ABC-1","name":"Office","productCategory":"EC","productType":"438",
                "capabilities":["heating"],"autoUpdate":true}"#,
        )
        .unwrap();
        let descriptor = wire.into_descriptor(Serial::new("ABC-1").unwrap());
        assert_eq!(descriptor.category.as_str(), "ec");
        assert_eq!(descriptor.topic_root, "438");
        assert_eq!(descriptor.auto_update, Some(true));
        assert_eq!(descriptor.update_available, None);
    }
}
