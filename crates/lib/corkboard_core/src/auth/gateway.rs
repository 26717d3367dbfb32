//! Auth gateway: remote sign-up/sign-in/sign-out plus the locally persisted
//! session token.
//!
//! Calls are serialised: at most one auth operation is in flight at a time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{AuthError, classify_registration, classify_session, classify_sign_in};
use crate::backend::{AuthBackend, UserDirectory};
use crate::models::Identity;
use crate::request::RequestScope;
use crate::storage::{KeyValueStore, SESSION_TOKEN_KEY};

pub struct AuthGateway {
    backend: Arc<dyn AuthBackend>,
    directory: Arc<dyn UserDirectory>,
    store: Arc<dyn KeyValueStore>,
    timeout: Duration,
    serial: Mutex<()>,
}

impl AuthGateway {
    pub fn new(
        backend: Arc<dyn AuthBackend>,
        directory: Arc<dyn UserDirectory>,
        store: Arc<dyn KeyValueStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            directory,
            store,
            timeout,
            serial: Mutex::new(()),
        }
    }

    fn scope(&self, cancel: &CancellationToken) -> RequestScope {
        RequestScope::new(self.timeout, cancel.clone())
    }

    /// Creates an account and records its profile.
    ///
    /// Does not sign the new user in locally. A failed profile write is
    /// logged; the account exists regardless.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        cancel: &CancellationToken,
    ) -> Result<Identity, AuthError> {
        let _serial = self.serial.lock().await;
        let scope = self.scope(cancel);

        let identity = scope
            .run(async {
                self.backend
                    .sign_up(email, password)
                    .await
                    .map_err(|e| classify_registration(&e))
            })
            .await
            .inspect_err(|e| warn!(error = %e, "registration failed"))?;

        let profile = scope
            .run(async {
                self.directory
                    .put_profile(&identity.user_id, &identity.email)
                    .await
                    .map_err(|e| classify_session(&e))
            })
            .await;
        if let Err(e) = profile {
            warn!(user_id = %identity.user_id, error = %e, "failed to write user profile");
        }

        info!(user_id = %identity.user_id, "registered account");
        Ok(identity)
    }

    /// Signs in and persists the session token.
    pub async fn sign_in(
        &self,
        email: &str,
        password: &str,
        cancel: &CancellationToken,
    ) -> Result<Identity, AuthError> {
        let _serial = self.serial.lock().await;

        let credential = self
            .scope(cancel)
            .run(async {
                self.backend
                    .sign_in(email, password)
                    .await
                    .map_err(|e| classify_sign_in(&e))
            })
            .await
            .inspect_err(|e| warn!(error = %e, "sign-in failed"))?;

        if let Err(e) = self
            .store
            .set(SESSION_TOKEN_KEY, &credential.session_token)
            .await
        {
            // The session still works for this process, it just won't
            // survive a restart.
            warn!(error = %e, "failed to persist session token");
        }

        info!(user_id = %credential.identity.user_id, "signed in");
        Ok(credential.identity)
    }

    /// Best-effort sign-out. The persisted token is removed even when the
    /// remote call fails.
    pub async fn sign_out(&self, cancel: &CancellationToken) {
        let _serial = self.serial.lock().await;

        let token = self.stored_token().await;
        let remote = self
            .scope(cancel)
            .run(async {
                self.backend
                    .sign_out(token.as_deref())
                    .await
                    .map_err(|e| classify_session(&e))
            })
            .await;
        if let Err(e) = remote {
            warn!(error = %e, "remote sign-out failed, clearing local session anyway");
        }

        if let Err(e) = self.store.remove(SESSION_TOKEN_KEY).await {
            warn!(error = %e, "failed to remove persisted session token");
        }
        info!("signed out");
    }

    /// Whether a session token is stored locally. Does not contact the
    /// backend, so the session may still turn out to be invalid.
    pub async fn has_persisted_session(&self) -> bool {
        self.stored_token().await.is_some()
    }

    /// Reconciles the persisted token with the backend.
    ///
    /// `Ok(None)` when there is no token, the backend no longer honours it, or
    /// no email can be resolved for the account. A rejected token is removed.
    pub async fn current_identity(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<Identity>, AuthError> {
        let _serial = self.serial.lock().await;

        let Some(token) = self.stored_token().await else {
            return Ok(None);
        };
        let scope = self.scope(cancel);

        let account = scope
            .run(async {
                self.backend
                    .current_account(&token)
                    .await
                    .map_err(|e| classify_session(&e))
            })
            .await?;
        let Some(account) = account else {
            info!("persisted session rejected by backend");
            if let Err(e) = self.store.remove(SESSION_TOKEN_KEY).await {
                warn!(error = %e, "failed to remove stale session token");
            }
            return Ok(None);
        };

        let email = match account.email {
            Some(email) => Some(email),
            None => {
                scope
                    .run(async {
                        self.directory
                            .email_for(&account.user_id)
                            .await
                            .map_err(|e| classify_session(&e))
                    })
                    .await?
            }
        };
        match email {
            Some(email) => Ok(Some(Identity::new(account.user_id, email))),
            None => {
                warn!(user_id = %account.user_id, "no email on record for account");
                Ok(None)
            }
        }
    }

    async fn stored_token(&self) -> Option<String> {
        match self.store.get(SESSION_TOKEN_KEY).await {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                warn!(error = %e, "failed to read persisted session token");
                None
            }
        }
    }
}
