// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cloud service collaborator.
//!
//! The coordinator talks to the vendor cloud through the [`CloudApi`] trait:
//! authentication, the device directory, firmware metadata and firmware
//! commands. [`HttpCloudClient`] is the default implementation over HTTPS;
//! tests and alternative backends implement the trait directly.
//!
//! # Examples
//!
//! ```no_run
//! # #[cfg(feature = "http")]
//! # async fn example() -> Result<(), airstate::error::CloudError> {
//! use airstate::cloud::{CloudApi, Credentials, HttpCloudClient, HttpCloudConfig};
//!
//! let client = HttpCloudClient::new(HttpCloudConfig::new("https://api.example.com"))?;
//! let session = client
//!     .authenticate(&Credentials::new("user@example.com", "secret"))
//!     .await?;
//! for device in client.list_devices(&session).await? {
//!     println!("{} ({})", device.name, device.serial);
//! }
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "http")]
mod http;

#[cfg(feature = "http")]
pub use http::{HttpCloudClient, HttpCloudConfig};

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CloudError;
use crate::types::{DeviceCategory, Serial};

/// Account credentials used to open a cloud session.
///
/// The password never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Account login, usually an email address.
    pub username: String,
    /// Account password.
    pub password: String,
}

impl Credentials {
    /// Creates credentials.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// An authenticated cloud session.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    token: String,
    account: Option<String>,
    issued_at: DateTime<Utc>,
}

impl Session {
    /// Creates a session from a bearer token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            account: None,
            issued_at: Utc::now(),
        }
    }

    /// Attaches the account identifier returned by the cloud.
    #[must_use]
    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    /// Returns the bearer token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Returns the account identifier, if the cloud sent one.
    #[must_use]
    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }

    /// Returns when the session was opened.
    #[must_use]
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("account", &self.account)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Directory entry describing one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Device serial.
    pub serial: Serial,
    /// Display name.
    pub name: String,
    /// Product category.
    pub category: DeviceCategory,
    /// Bus topic root (product type).
    pub topic_root: String,
    /// Raw capability tokens.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Installed firmware version.
    #[serde(default)]
    pub firmware_version: Option<String>,
    /// Whether automatic firmware updates are enabled.
    #[serde(default)]
    pub auto_update: Option<bool>,
    /// Whether a newer firmware is available.
    #[serde(default)]
    pub update_available: Option<bool>,
}

impl DeviceDescriptor {
    /// Creates a descriptor with no capability tokens and no firmware data.
    #[must_use]
    pub fn new(
        serial: Serial,
        name: impl Into<String>,
        category: impl Into<DeviceCategory>,
        topic_root: impl Into<String>,
    ) -> Self {
        Self {
            serial,
            name: name.into(),
            category: category.into(),
            topic_root: topic_root.into(),
            capabilities: Vec::new(),
            firmware_version: None,
            auto_update: None,
            update_available: None,
        }
    }

    /// Sets the capability tokens.
    #[must_use]
    pub fn with_capabilities<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = tokens.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the firmware version.
    #[must_use]
    pub fn with_firmware_version(mut self, version: impl Into<String>) -> Self {
        self.firmware_version = Some(version.into());
        self
    }

    /// Sets the auto-update flag.
    #[must_use]
    pub fn with_auto_update(mut self, enabled: bool) -> Self {
        self.auto_update = Some(enabled);
        self
    }
}

/// Firmware information for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareMetadata {
    /// Installed version.
    pub version: String,
    /// Whether automatic updates are enabled.
    pub auto_update: bool,
    /// Whether a newer version is available.
    pub update_available: bool,
    /// The newer version, when known.
    #[serde(default)]
    pub available_version: Option<String>,
}

/// Acknowledgement of an accepted cloud command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Request identifier returned by the cloud, if any.
    #[serde(default)]
    pub request_id: Option<String>,
}

/// Operations the coordinator needs from the cloud service.
///
/// Implementations must be safe to call concurrently. Transport problems map
/// to [`CloudError::Connection`], rejected credentials or tokens to
/// [`CloudError::Auth`], and any other refusal to [`CloudError::Api`].
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// Opens a session.
    async fn authenticate(&self, credentials: &Credentials) -> Result<Session, CloudError>;

    /// Lists every device on the account.
    async fn list_devices(&self, session: &Session) -> Result<Vec<DeviceDescriptor>, CloudError>;

    /// Fetches firmware information for one device.
    async fn fetch_firmware_metadata(
        &self,
        session: &Session,
        serial: &Serial,
    ) -> Result<FirmwareMetadata, CloudError>;

    /// Asks the cloud to start a firmware update.
    async fn trigger_firmware_update(
        &self,
        session: &Session,
        serial: &Serial,
    ) -> Result<Ack, CloudError>;

    /// Enables or disables automatic firmware updates.
    ///
    /// Backends without this endpoint return
    /// [`ApiError::Unsupported`](crate::error::ApiError::Unsupported).
    async fn set_auto_update(
        &self,
        session: &Session,
        serial: &Serial,
        enabled: bool,
    ) -> Result<Ack, CloudError>;
}
