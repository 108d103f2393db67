// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared cloud session.
//!
//! All devices of an account share one authenticated session. Each connected
//! device holds a [`SessionLease`]; the lease is released when dropped.
//! Authentication is single-flight: concurrent acquirers wait for the one
//! login in progress instead of each logging in.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{Mutex, watch};

use crate::cloud::{CloudApi, Credentials, Session};
use crate::error::{AuthError, CloudError, ConnectionError};

/// Reference-counted owner of the account's cloud session.
pub struct SharedSession {
    cloud: Arc<dyn CloudApi>,
    credentials: Credentials,
    auth_timeout: Duration,
    current: RwLock<Option<Arc<Session>>>,
    login: Mutex<()>,
    leases: AtomicUsize,
    rejection: watch::Sender<Option<AuthError>>,
}

impl std::fmt::Debug for SharedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSession")
            .field("credentials", &self.credentials)
            .field("authenticated", &self.current.read().is_some())
            .field("leases", &self.lease_count())
            .finish_non_exhaustive()
    }
}

impl SharedSession {
    /// Creates a session owner. No login happens until the first acquire.
    #[must_use]
    pub fn new(cloud: Arc<dyn CloudApi>, credentials: Credentials, auth_timeout: Duration) -> Self {
        let (rejection, _) = watch::channel(None);
        Self {
            cloud,
            credentials,
            auth_timeout,
            current: RwLock::new(None),
            login: Mutex::new(()),
            leases: AtomicUsize::new(0),
            rejection,
        }
    }

    /// Returns the cloud client the session talks to.
    #[must_use]
    pub fn cloud(&self) -> &Arc<dyn CloudApi> {
        &self.cloud
    }

    /// Returns the current session without authenticating.
    #[must_use]
    pub fn current(&self) -> Option<Arc<Session>> {
        self.current.read().clone()
    }

    /// Returns the current session, authenticating first if needed.
    ///
    /// # Errors
    ///
    /// Returns the login error. An [`AuthError`] is also broadcast to every
    /// lease holder through [`reject`](Self::reject).
    pub async fn session(&self) -> Result<Arc<Session>, CloudError> {
        if let Some(session) = self.current() {
            return Ok(session);
        }

        let _login = self.login.lock().await;
        // another acquirer may have logged in while we waited
        if let Some(session) = self.current() {
            return Ok(session);
        }

        tracing::debug!(username = %self.credentials.username, "Authenticating cloud session");
        let result = tokio::time::timeout(
            self.auth_timeout,
            self.cloud.authenticate(&self.credentials),
        )
        .await
        .map_err(|_| CloudError::from(ConnectionError::timeout("auth", self.auth_timeout)))?;

        match result {
            Ok(session) => {
                let session = Arc::new(session);
                *self.current.write() = Some(Arc::clone(&session));
                self.rejection.send_replace(None);
                tracing::info!(username = %self.credentials.username, "Cloud session established");
                Ok(session)
            }
            Err(CloudError::Auth(e)) => {
                self.reject(e.clone());
                Err(CloudError::Auth(e))
            }
            Err(e) => Err(e),
        }
    }

    /// Acquires a lease on the session, authenticating first if needed.
    ///
    /// # Errors
    ///
    /// Same as [`session`](Self::session).
    pub async fn acquire(self: &Arc<Self>) -> Result<SessionLease, CloudError> {
        let session = self.session().await?;
        self.leases.fetch_add(1, Ordering::AcqRel);
        Ok(SessionLease {
            shared: Arc::clone(self),
            session,
            rejection: self.rejection.subscribe(),
        })
    }

    /// Drops the current token so the next acquire logs in again.
    pub fn invalidate(&self) {
        if self.current.write().take().is_some() {
            tracing::debug!("Cloud session invalidated");
        }
    }

    /// Invalidates the session and tells every lease holder that the
    /// credentials were rejected.
    pub fn reject(&self, error: AuthError) {
        self.invalidate();
        tracing::warn!(error = %error, leases = self.lease_count(), "Cloud credentials rejected");
        self.rejection.send_replace(Some(error));
    }

    /// Returns the last rejection, if the session has not logged in since.
    #[must_use]
    pub fn rejection(&self) -> Option<AuthError> {
        self.rejection.borrow().clone()
    }

    /// Number of live leases.
    #[must_use]
    pub fn lease_count(&self) -> usize {
        self.leases.load(Ordering::Acquire)
    }
}

/// A device's hold on the shared session.
pub struct SessionLease {
    shared: Arc<SharedSession>,
    session: Arc<Session>,
    rejection: watch::Receiver<Option<AuthError>>,
}

impl std::fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLease")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl SessionLease {
    /// Returns the session the lease was taken on.
    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Resolves when the shared session's credentials are rejected.
    pub async fn rejected(&mut self) -> AuthError {
        let rejected = match self.rejection.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };
        match rejected {
            Some(error) => error,
            // the owner outlives every lease, so the sender cannot be gone
            None => std::future::pending().await,
        }
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.shared.leases.fetch_sub(1, Ordering::AcqRel);
    }
}
