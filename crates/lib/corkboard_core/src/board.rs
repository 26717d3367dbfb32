//! Board controller: what the screens call.
//!
//! Composes the session store with the two gateways. The screens read
//! [`Session`] snapshots (or subscribe to them) and never mutate state
//! directly.
//!
//! Writes capture the signed-in identity and the session's cancellation
//! token when they start. If the session ends or changes hands before the
//! write completes, the write fails with [`BoardError::SessionEnded`]
//! instead of completing under a stale identity.

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::auth::{AuthError, AuthGateway};
use crate::backend::firebase::FirebaseClient;
use crate::backend::{AuthBackend, CommentBackend, UserDirectory};
use crate::comments::{CommentError, CommentGateway};
use crate::config::{ClientConfig, ConfigError};
use crate::models::{Comment, Identity, Session};
use crate::session::SessionStore;
use crate::storage::{FileStore, KeyValueStore};

/// Errors surfaced to the user.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BoardError {
    /// Client-side empty-field checks.
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Data(#[from] CommentError),

    #[error("Not signed in")]
    NotAuthenticated,

    #[error("Only the author can change this comment")]
    NotOwner,

    #[error("The session ended before the request completed")]
    SessionEnded,
}

impl BoardError {
    /// Text suitable for an error dialog.
    pub fn user_message(&self) -> String {
        match self {
            BoardError::Validation(msg) => msg.clone(),
            BoardError::Auth(e) => e.user_message(),
            BoardError::Data(CommentError::EmptyText) => "Comment text is required.".into(),
            BoardError::Data(CommentError::NotFound(_)) => {
                "That comment no longer exists.".into()
            }
            BoardError::Data(CommentError::PermissionDenied(_)) => {
                "The server refused the change.".into()
            }
            BoardError::Data(_) => "Could not save your changes. Try again.".into(),
            BoardError::NotAuthenticated => "Sign in to continue.".into(),
            BoardError::NotOwner => "You can only change your own comments.".into(),
            BoardError::SessionEnded => "You were signed out before the change completed.".into(),
        }
    }

    /// Whether the view should offer a retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            BoardError::Data(e) => e.is_retryable(),
            BoardError::Auth(AuthError::Network(_) | AuthError::TimedOut(_)) => true,
            _ => false,
        }
    }
}

pub struct Board {
    session: Arc<SessionStore>,
    auth: Arc<AuthGateway>,
    comments: CommentGateway,
    listing: Mutex<Vec<Comment>>,
}

impl Board {
    pub fn new(
        auth_backend: Arc<dyn AuthBackend>,
        directory: Arc<dyn UserDirectory>,
        comment_backend: Arc<dyn CommentBackend>,
        store: Arc<dyn KeyValueStore>,
        config: &ClientConfig,
    ) -> Self {
        let auth = Arc::new(AuthGateway::new(
            auth_backend,
            directory,
            store,
            config.request_timeout,
        ));
        Self {
            session: Arc::new(SessionStore::new(auth.clone())),
            auth,
            comments: CommentGateway::new(
                comment_backend,
                config.request_timeout,
                config.list_retries,
            ),
            listing: Mutex::new(Vec::new()),
        }
    }

    /// Board over one backend that serves auth, profiles and comments.
    pub fn with_backend<B>(backend: Arc<B>, store: Arc<dyn KeyValueStore>, config: &ClientConfig) -> Self
    where
        B: AuthBackend + CommentBackend + UserDirectory + 'static,
    {
        Self::new(backend.clone(), backend.clone(), backend, store, config)
    }

    /// Board over the hosted backend, persisting the session token under
    /// the configured data directory.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ConfigError> {
        let client = Arc::new(FirebaseClient::new(config)?);
        let store = Arc::new(FileStore::new(config.store_path()));
        Ok(Self::with_backend(client, store, config))
    }

    pub fn session(&self) -> Session {
        self.session.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.session.subscribe()
    }

    /// Restores any persisted session. Call once at startup.
    pub async fn start(&self) -> Session {
        self.session.restore().await;
        self.session.state()
    }

    pub async fn register(&self, email: &str, password: &str) -> Result<Identity, BoardError> {
        require_credentials(email, password)?;
        let identity = self
            .auth
            .register(email, password, &CancellationToken::new())
            .await?;
        Ok(identity)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, BoardError> {
        require_credentials(email, password)?;
        let identity = self
            .auth
            .sign_in(email, password, &CancellationToken::new())
            .await?;
        self.session.login(&identity.email, &identity.user_id);
        Ok(identity)
    }

    pub async fn sign_out(&self) {
        self.session.logout().await;
        self.listing_slot().clear();
    }

    /// Last fetched comments, newest first.
    pub fn comments(&self) -> Vec<Comment> {
        self.listing_slot().clone()
    }

    /// UI gate for edit and delete. The backend must enforce its own rules.
    pub fn can_modify(&self, comment: &Comment) -> bool {
        self.session
            .state()
            .user_id()
            .is_some_and(|uid| comment.is_authored_by(uid))
    }

    /// Full re-fetch of the comment list.
    pub async fn refresh(&self) -> Result<Vec<Comment>, BoardError> {
        if !self.session.state().is_authenticated() {
            return Err(BoardError::NotAuthenticated);
        }
        let comments = self.comments.list(&self.session.request_token()).await?;
        *self.listing_slot() = comments.clone();
        Ok(comments)
    }

    /// Posts a comment as the signed-in user and returns its id.
    pub async fn post(&self, text: &str) -> Result<String, BoardError> {
        require_text(text)?;
        let (identity, cancel) = self.begin_write()?;

        let id = self
            .comments
            .create(&identity.user_id, text, &identity.email, &cancel)
            .await
            .map_err(|e| self.write_failure(e, &identity, &cancel))?;
        self.finish_write(&identity, &cancel)?;

        info!(comment_id = %id, "posted comment");
        self.refresh_after_write().await;
        Ok(id)
    }

    /// Replaces the text of one of the signed-in user's comments.
    pub async fn edit(&self, comment_id: &str, text: &str) -> Result<(), BoardError> {
        require_text(text)?;
        let (identity, cancel) = self.begin_write()?;
        self.check_owner(comment_id, &identity).await?;

        self.comments
            .update(comment_id, text, &cancel)
            .await
            .map_err(|e| self.write_failure(e, &identity, &cancel))?;
        self.finish_write(&identity, &cancel)?;

        self.refresh_after_write().await;
        Ok(())
    }

    /// Deletes one of the signed-in user's comments.
    pub async fn remove(&self, comment_id: &str) -> Result<(), BoardError> {
        let (identity, cancel) = self.begin_write()?;
        self.check_owner(comment_id, &identity).await?;

        self.comments
            .delete(comment_id, &cancel)
            .await
            .map_err(|e| self.write_failure(e, &identity, &cancel))?;
        self.finish_write(&identity, &cancel)?;

        self.refresh_after_write().await;
        Ok(())
    }

    fn listing_slot(&self) -> std::sync::MutexGuard<'_, Vec<Comment>> {
        self.listing.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn begin_write(&self) -> Result<(Identity, CancellationToken), BoardError> {
        let cancel = self.session.request_token();
        let identity = self
            .session
            .identity()
            .ok_or(BoardError::NotAuthenticated)?;
        Ok((identity, cancel))
    }

    fn session_still_owned_by(&self, identity: &Identity, cancel: &CancellationToken) -> bool {
        !cancel.is_cancelled() && self.session.state().user_id() == Some(identity.user_id.as_str())
    }

    fn finish_write(&self, identity: &Identity, cancel: &CancellationToken) -> Result<(), BoardError> {
        if self.session_still_owned_by(identity, cancel) {
            Ok(())
        } else {
            warn!(user_id = %identity.user_id, "session ended while a write was in flight");
            Err(BoardError::SessionEnded)
        }
    }

    fn write_failure(
        &self,
        err: CommentError,
        identity: &Identity,
        cancel: &CancellationToken,
    ) -> BoardError {
        if err == CommentError::Cancelled && !self.session_still_owned_by(identity, cancel) {
            BoardError::SessionEnded
        } else {
            BoardError::Data(err)
        }
    }

    async fn check_owner(&self, comment_id: &str, identity: &Identity) -> Result<(), BoardError> {
        let cached = self.find_listed(comment_id);
        let comment = match cached {
            Some(comment) => comment,
            None => {
                self.refresh().await?;
                self.find_listed(comment_id)
                    .ok_or_else(|| CommentError::NotFound(comment_id.to_string()))?
            }
        };
        if comment.is_authored_by(&identity.user_id) {
            Ok(())
        } else {
            Err(BoardError::NotOwner)
        }
    }

    fn find_listed(&self, comment_id: &str) -> Option<Comment> {
        self.listing_slot().iter().find(|c| c.id == comment_id).cloned()
    }

    async fn refresh_after_write(&self) {
        // The write already succeeded; a failed re-fetch only leaves the
        // listing stale.
        if let Err(e) = self.refresh().await {
            warn!(error = %e, "refresh after write failed");
        }
    }
}

fn require_credentials(email: &str, password: &str) -> Result<(), BoardError> {
    if email.trim().is_empty() || password.is_empty() {
        return Err(BoardError::Validation(
            "Email and password are required.".into(),
        ));
    }
    Ok(())
}

fn require_text(text: &str) -> Result<(), BoardError> {
    if text.trim().is_empty() {
        return Err(BoardError::Validation("Comment text is required.".into()));
    }
    Ok(())
}
