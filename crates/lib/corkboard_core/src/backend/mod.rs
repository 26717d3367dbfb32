//! Seams to the hosted collaborators: the remote auth service, the remote
//! record store and the user profile directory.
//!
//! Implementations report raw [`BackendError`]s. Classifying them into the
//! error kinds callers see is the gateways' job (see [`crate::auth`] and
//! [`crate::comments`]).

pub mod firebase;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Comment, Credential, Identity, NewComment};

/// Canonical rejection codes.
///
/// Backends normalise whatever their wire protocol reports to these strings
/// before handing errors up.
pub mod codes {
    pub const EMAIL_IN_USE: &str = "auth/email-already-in-use";
    pub const INVALID_EMAIL: &str = "auth/invalid-email";
    pub const WEAK_PASSWORD: &str = "auth/weak-password";
    pub const OPERATION_NOT_ALLOWED: &str = "auth/operation-not-allowed";
    pub const INVALID_CREDENTIAL: &str = "auth/invalid-credential";
    pub const USER_NOT_FOUND: &str = "auth/user-not-found";
    pub const WRONG_PASSWORD: &str = "auth/wrong-password";
    pub const USER_DISABLED: &str = "auth/user-disabled";
    pub const TOKEN_EXPIRED: &str = "auth/user-token-expired";
    pub const PERMISSION_DENIED: &str = "database/permission-denied";
    pub const NOT_FOUND: &str = "database/not-found";
}

/// Raw, unclassified backend failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("{code}: {message}")]
    Rejected { code: String, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl BackendError {
    pub fn rejected(code: &str, message: impl Into<String>) -> Self {
        Self::Rejected {
            code: code.to_string(),
            message: message.into(),
        }
    }

    /// Canonical code, if the backend rejected the call.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Rejected { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// Account as reported by the auth service when reconciling a stored token.
///
/// The email may be absent; callers fall back to the profile directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub user_id: String,
    pub email: Option<String>,
}

/// Remote authentication service.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Creates an account. The new user is not signed in: no session token
    /// is issued and the caller's current session is left untouched.
    async fn sign_up(&self, email: &str, password: &str) -> Result<Identity, BackendError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Credential, BackendError>;

    /// Ends the remote session tied to `session_token`, if there is one.
    async fn sign_out(&self, session_token: Option<&str>) -> Result<(), BackendError>;

    /// Resolves a stored session token to the account it belongs to.
    ///
    /// `Ok(None)` means the token is no longer valid.
    async fn current_account(&self, session_token: &str) -> Result<Option<Account>, BackendError>;
}

/// Remote ordered collection of comments.
#[async_trait]
pub trait CommentBackend: Send + Sync {
    /// Every stored comment, in no particular order.
    async fn fetch_all(&self) -> Result<Vec<Comment>, BackendError>;

    /// Creates a comment under its own id. The server assigns `createdAt`.
    /// Writing an id that is already stored succeeds and leaves the stored
    /// record, timestamp included, unchanged.
    async fn put(&self, comment: &NewComment) -> Result<(), BackendError>;

    /// Replaces the text of an existing comment. Fails with
    /// [`codes::NOT_FOUND`] if there is no such comment.
    async fn patch_text(&self, comment_id: &str, text: &str) -> Result<(), BackendError>;

    /// Deletes a comment. Deleting a missing id succeeds.
    async fn remove(&self, comment_id: &str) -> Result<(), BackendError>;
}

/// Per-user profile records written at registration.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn put_profile(&self, user_id: &str, email: &str) -> Result<(), BackendError>;

    async fn email_for(&self, user_id: &str) -> Result<Option<String>, BackendError>;
}
